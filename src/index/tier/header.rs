//! Header byte layout for primary-tier slots.
//!
//! Low 2 bits: placement tag. Top 6 bits: overflow-chain offset field, where
//! 0 means "no chain" and `k` means "start the backward overflow probe at
//! `overflow_hash + (k - 1)`". The field value 63 doubles as a saturation
//! marker: the chain may extend beyond the forward probe window, so lookups
//! keep scanning backwards past offset 0.

pub(crate) const TAG_MASK: u8 = 0b11;

/// Slot has never been occupied.
pub(crate) const TAG_EMPTY: u8 = 0;
/// Occupant's home is one slot to the right.
pub(crate) const TAG_LEFT_OF_HOME: u8 = 1;
/// Occupant hashed to this slot.
pub(crate) const TAG_AT_HOME: u8 = 2;
/// Occupant's home is one slot to the left.
pub(crate) const TAG_RIGHT_OF_HOME: u8 = 3;

/// Offset field value marking a chain that may exceed the forward window.
pub(crate) const SPILL_SATURATED: u8 = 63;

#[inline]
pub(crate) fn tag(header: u8) -> u8 {
    header & TAG_MASK
}

/// The 6-bit chain offset field.
#[inline]
pub(crate) fn spill_field(header: u8) -> u8 {
    header >> 2
}

/// The offset field in place, tag bits cleared.
#[inline]
pub(crate) fn spill_bits(header: u8) -> u8 {
    header & !TAG_MASK
}

#[inline]
pub(crate) fn compose(spill_field: u8, tag: u8) -> u8 {
    debug_assert!(spill_field <= SPILL_SATURATED);
    debug_assert!(tag <= TAG_RIGHT_OF_HOME);
    (spill_field << 2) | tag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_split() {
        let header = compose(5, TAG_RIGHT_OF_HOME);
        assert_eq!(tag(header), TAG_RIGHT_OF_HOME);
        assert_eq!(spill_field(header), 5);
        assert_eq!(spill_bits(header), 5 << 2);
    }

    #[test]
    fn empty_is_all_zero() {
        assert_eq!(tag(0), TAG_EMPTY);
        assert_eq!(spill_field(0), 0);
    }

    #[test]
    fn saturation_is_max_field() {
        let header = compose(SPILL_SATURATED, TAG_LEFT_OF_HOME);
        assert_eq!(spill_field(header), 63);
        assert_eq!(header, 0b1111_1101);
    }
}
