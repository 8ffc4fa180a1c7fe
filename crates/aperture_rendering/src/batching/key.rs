//! 64-bit sort keys.
//!
//! Both passes sort with one plain `u64` comparison; the pass decides the
//! field order:
//!
//! ```text
//!   opaque       [63..48 distance f16][47..28 geometry][27..8 sort bits][7..0 mask]
//!   transparent  [63..48 !distance f16][47..28 sort bits][27..8 geometry][7..0 mask]
//! ```
//!
//! Non-negative f16 bit patterns order like the values they encode, so the
//! distance field needs no decoding. Inverting it gives back-to-front.

use half::f16;

/// Bits kept from caller sort bits and geometry indices.
pub const FIELD_MASK: u32 = (1 << 20) - 1;

/// Half-precision bits of a camera distance; negative and NaN clamp to 0.
#[inline]
#[must_use]
pub fn distance_bits(distance: f32) -> u16 {
    f16::from_f32(distance.max(0.0)).to_bits()
}

/// Sort key of one visible instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchKey(pub u64);

impl BatchKey {
    /// Front-to-back, then geometry, then sort bits.
    #[must_use]
    pub fn opaque(geometry: u32, distance: f32, sort_bits: u32, camera_mask: u8) -> Self {
        Self(
            u64::from(distance_bits(distance)) << 48
                | u64::from(geometry & FIELD_MASK) << 28
                | u64::from(sort_bits & FIELD_MASK) << 8
                | u64::from(camera_mask),
        )
    }

    /// Back-to-front, then sort bits, then geometry.
    #[must_use]
    pub fn transparent(geometry: u32, distance: f32, sort_bits: u32, camera_mask: u8) -> Self {
        Self(
            u64::from(!distance_bits(distance)) << 48
                | u64::from(sort_bits & FIELD_MASK) << 28
                | u64::from(geometry & FIELD_MASK) << 8
                | u64::from(camera_mask),
        )
    }

    /// Camera mask field.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn camera_mask(self) -> u8 {
        self.0 as u8
    }

    /// Distance field as stored, inverted for transparent keys.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn distance_field(self) -> u16 {
        (self.0 >> 48) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_bits_are_monotone() {
        let samples = [0.0, 0.001, 0.5, 1.0, 7.25, 100.0, 4096.0, 65504.0, 1e9];
        for pair in samples.windows(2) {
            assert!(distance_bits(pair[0]) < distance_bits(pair[1]), "{pair:?}");
        }
        assert_eq!(distance_bits(-3.0), 0);
        assert_eq!(distance_bits(f32::NAN), 0);
    }

    #[test]
    fn test_opaque_orders_by_distance_first() {
        let near = BatchKey::opaque(900, 1.0, FIELD_MASK, 0xFF);
        let far = BatchKey::opaque(0, 2.0, 0, 0);
        assert!(near < far);

        let a = BatchKey::opaque(1, 5.0, 7, 1);
        let b = BatchKey::opaque(2, 5.0, 0, 1);
        assert!(a < b);
    }

    #[test]
    fn test_transparent_orders_back_to_front_then_sort_bits() {
        let near = BatchKey::transparent(0, 1.0, 0, 0);
        let far = BatchKey::transparent(900, 2.0, 900, 0);
        assert!(far < near);

        let a = BatchKey::transparent(9, 5.0, 1, 0);
        let b = BatchKey::transparent(1, 5.0, 2, 0);
        assert!(a < b);
    }

    #[test]
    fn test_fields_are_masked() {
        let key = BatchKey::opaque(u32::MAX, 0.0, u32::MAX, 0x5A);
        assert_eq!(key.camera_mask(), 0x5A);
        assert_eq!(key.distance_field(), 0);
        assert_eq!(key.0 >> 28 & u64::from(FIELD_MASK), u64::from(FIELD_MASK));
    }
}
