//! Size-class arithmetic.
//!
//! An *order* is the base-2 logarithm of a page count. Every block handed out
//! by the allocator spans `2^order` pages.

/// Returns `true` if `n` is positive and has exactly one set bit.
#[inline]
pub const fn is_power_of_two(n: usize) -> bool {
    n != 0 && n & (n - 1) == 0
}

/// Returns the position of the highest set bit of `n`.
///
/// `n` must be nonzero.
#[inline]
pub fn order(n: usize) -> u8 {
    debug_assert!(n != 0, "order of zero is undefined");

    // At most `usize::BITS - 1`, which always fits.
    (usize::BITS - 1 - n.leading_zeros()) as u8
}

/// Returns the smallest power of two greater than or equal to `n`.
///
/// Zero rounds up to one. Returns `None` if the result does not fit in a
/// `usize`.
#[inline]
pub fn round_up_pow2(n: usize) -> Option<usize> {
    match n {
        0 | 1 => Some(1),
        n if is_power_of_two(n) => Some(n),
        n => 1usize.checked_shl(u32::from(order(n - 1)) + 1),
    }
}

/// Returns the number of `page_size`-byte pages needed to hold `bytes` bytes.
#[inline]
pub fn pages_for(bytes: usize, page_size: usize) -> usize {
    debug_assert!(page_size != 0);

    bytes / page_size + usize::from(bytes % page_size != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn powers_of_two() {
        assert!(!is_power_of_two(0));
        assert!(is_power_of_two(1));
        assert!(is_power_of_two(2));
        assert!(!is_power_of_two(3));
        assert!(is_power_of_two(1 << 40));
        assert!(!is_power_of_two((1 << 40) + 1));
        assert!(is_power_of_two(1 << (usize::BITS - 1)));
    }

    #[test]
    fn order_is_floor_log2() {
        assert_eq!(order(1), 0);
        assert_eq!(order(2), 1);
        assert_eq!(order(3), 1);
        assert_eq!(order(16), 4);
        assert_eq!(order(17), 4);
        assert_eq!(order(64), 6);
        assert_eq!(order(usize::MAX), (usize::BITS - 1) as u8);
    }

    #[test]
    fn round_up() {
        assert_eq!(round_up_pow2(0), Some(1));
        assert_eq!(round_up_pow2(1), Some(1));
        assert_eq!(round_up_pow2(3), Some(4));
        assert_eq!(round_up_pow2(5), Some(8));
        assert_eq!(round_up_pow2(8), Some(8));
        assert_eq!(round_up_pow2(1000), Some(1024));
        assert_eq!(round_up_pow2(1 << (usize::BITS - 1)), Some(1 << (usize::BITS - 1)));
        assert_eq!(round_up_pow2((1 << (usize::BITS - 1)) + 1), None);
        assert_eq!(round_up_pow2(usize::MAX), None);
    }

    #[test]
    fn pages_round_up() {
        assert_eq!(pages_for(0, 4096), 0);
        assert_eq!(pages_for(1, 4096), 1);
        assert_eq!(pages_for(4096, 4096), 1);
        assert_eq!(pages_for(4097, 4096), 2);
        assert_eq!(pages_for(5, 1), 5);
        assert_eq!(pages_for(usize::MAX, 2), usize::MAX / 2 + 1);
    }
}
