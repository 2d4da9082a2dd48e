//! Power-of-two sizer

/// Smallest power of two `>= n`, as `(exponent, value)` with `value == 1 << exponent`.
///
/// `size_for(0)` is `(0, 0)`. Inputs above `2^63` saturate to `(64, u64::MAX)`.
pub fn size_for(n: u64) -> (u32, u64) {
    if n == 0 {
        return (0, 0);
    }
    match n.checked_next_power_of_two() {
        Some(value) => (value.trailing_zeros(), value),
        None => (64, u64::MAX),
    }
}
