//! # Entity Management
//!
//! Entities are opaque, stable identifiers consisting of:
//! - An index handed out by the [`EntityAllocator`]
//! - A generation counter for safe reuse
//!
//! The identifier says nothing about where the entity's components live.
//! Component stores keep their own dense layout and map entities to slots.

/// Opaque, stable identifier for a scene object.
///
/// The ID is split into two parts:
/// - Lower 32 bits: Allocation index
/// - Upper 32 bits: Generation counter for detecting stale references
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Entity(u64);

impl Entity {
    /// Null/invalid entity.
    pub const NULL: Self = Self(u64::MAX);

    /// Creates an entity from index and generation.
    ///
    /// # Arguments
    ///
    /// * `index` - The allocation index (0 to 2^32-1)
    /// * `generation` - The generation counter (0 to 2^32-1)
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the entity.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the entity.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Returns the raw 64-bit value.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Checks if this entity is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::NULL
    }
}

/// Hands out entities and recycles their indices with a bumped generation.
///
/// Freed indices go on a free list, so a stale handle to a destroyed entity
/// never compares equal to the entity that reuses its index.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    /// Current generation and liveness for every index ever handed out.
    slots: Vec<(u32, bool)>,
    /// Free list - indices of destroyed entities.
    free_list: Vec<u32>,
    /// Number of live entities.
    alive_count: usize,
}

impl EntityAllocator {
    /// Creates an empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new entity.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX - 1` indices are in use at once.
    pub fn create(&mut self) -> Entity {
        self.alive_count += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.1 = true;
            return Entity::new(index, slot.0);
        }

        assert!(self.slots.len() < u32::MAX as usize, "entity index space exhausted");
        #[allow(clippy::cast_possible_truncation)]
        let index = self.slots.len() as u32;
        self.slots.push((0, true));
        Entity::new(index, 0)
    }

    /// Destroys an entity, making its index available for reuse.
    ///
    /// Returns `false` if the entity was already dead or never existed.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }

        let index = entity.index();
        let slot = &mut self.slots[index as usize];
        slot.0 = slot.0.wrapping_add(1);
        slot.1 = false;
        self.free_list.push(index);
        self.alive_count -= 1;
        true
    }

    /// Returns true if the entity is alive.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        !entity.is_null()
            && self
                .slots
                .get(entity.index() as usize)
                .is_some_and(|&(generation, alive)| alive && generation == entity.generation())
    }

    /// Returns the number of live entities.
    #[inline]
    #[must_use]
    pub const fn alive_count(&self) -> usize {
        self.alive_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_roundtrip() {
        let entity = Entity::new(12345, 67890);
        assert_eq!(entity.index(), 12345);
        assert_eq!(entity.generation(), 67890);
        assert!(!entity.is_null());
        assert!(Entity::default().is_null());
    }

    #[test]
    fn test_reuse_bumps_generation() {
        let mut allocator = EntityAllocator::new();
        let a = allocator.create();
        assert!(allocator.destroy(a));
        assert!(!allocator.destroy(a));

        let b = allocator.create();
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(!allocator.is_alive(a));
        assert!(allocator.is_alive(b));
        assert_eq!(allocator.alive_count(), 1);
    }
}
