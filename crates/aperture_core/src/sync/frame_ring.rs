//! # Frame Ring
//!
//! Fixed ring of per-frame slots.
//!
//! ```text
//!   frame:   0   1   2   3   4   5 ...
//!   slot:    0   1   2   0   1   2 ...   (F = 3)
//! ```
//!
//! A slot written at frame N is handed back at frame N + F, which is when
//! the GPU is guaranteed to be done with it.

use std::ops::{Index, IndexMut};

/// Upper bound on frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

/// Ring of `F` slots indexed by frame number.
#[derive(Debug, Clone)]
pub struct FrameRing<T> {
    slots: Vec<T>,
}

impl<T> FrameRing<T> {
    /// Creates a ring of `frames_in_flight` slots built by `init(slot_index)`.
    ///
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is zero or above [`MAX_FRAMES_IN_FLIGHT`].
    pub fn new(frames_in_flight: usize, init: impl FnMut(usize) -> T) -> Self {
        assert!(
            (1..=MAX_FRAMES_IN_FLIGHT).contains(&frames_in_flight),
            "frames in flight must be in 1..={MAX_FRAMES_IN_FLIGHT}, got {frames_in_flight}"
        );
        Self {
            slots: (0..frames_in_flight).map(init).collect(),
        }
    }

    /// Wraps slots built up front, slot `i` serving frames `i mod F`.
    ///
    /// # Panics
    ///
    /// Panics if `slots` is empty or longer than [`MAX_FRAMES_IN_FLIGHT`].
    pub fn from_slots(slots: Vec<T>) -> Self {
        assert!(
            (1..=MAX_FRAMES_IN_FLIGHT).contains(&slots.len()),
            "frames in flight must be in 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
            slots.len()
        );
        Self { slots }
    }

    /// Number of slots (F).
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a ring has at least one slot.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot index owned by `frame`.
    #[inline]
    #[must_use]
    pub fn slot_index(&self, frame: u64) -> usize {
        #[allow(clippy::cast_possible_truncation)]
        let index = (frame % self.slots.len() as u64) as usize;
        index
    }

    /// Slot owned by `frame`.
    #[inline]
    #[must_use]
    pub fn get(&self, frame: u64) -> &T {
        &self.slots[self.slot_index(frame)]
    }

    /// Mutable slot owned by `frame`.
    #[inline]
    pub fn get_mut(&mut self, frame: u64) -> &mut T {
        let index = self.slot_index(frame);
        &mut self.slots[index]
    }

    /// Iterates all slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }

    /// Iterates all slots mutably in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut()
    }
}

impl<T> Index<usize> for FrameRing<T> {
    type Output = T;

    fn index(&self, slot: usize) -> &T {
        &self.slots[slot]
    }
}

impl<T> IndexMut<usize> for FrameRing<T> {
    fn index_mut(&mut self, slot: usize) -> &mut T {
        &mut self.slots[slot]
    }
}
