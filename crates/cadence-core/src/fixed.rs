//! Deterministic fixed-point arithmetic for stock levels and flow rates.
//!
//! Quantities moved between stocks use Q64.64 so that replaying the same
//! schedule always produces bit-identical levels, and population-scale
//! stocks (up to about 9.2e18) fit without overflow. Conversions from `f64` and
//! [`Decimal`] happen at the boundary only (initial values, time intervals);
//! the conservation loop itself never touches binary floats.

use fixed::types::I64F64;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Q64.64 fixed-point: 64 integer bits, 64 fractional bits.
pub type Fixed128 = I64F64;

/// Convert an f64 to Fixed128. Use only for initialization, never in the step loop.
///
/// # Panics
///
/// Panics if `v` is not finite or does not fit; prefer
/// [`checked_f64_to_fixed128`] for untrusted input.
#[inline]
pub fn f64_to_fixed128(v: f64) -> Fixed128 {
    Fixed128::from_num(v)
}

/// Fallible f64 conversion. `None` for NaN, infinities and out-of-range values.
#[inline]
pub fn checked_f64_to_fixed128(v: f64) -> Option<Fixed128> {
    if !v.is_finite() {
        return None;
    }
    Fixed128::checked_from_num(v)
}

/// Convert Fixed128 to f64. Use only for display and reporting.
#[inline]
pub fn fixed128_to_f64(v: Fixed128) -> f64 {
    v.to_num::<f64>()
}

/// Convert a decimal clock interval into the fixed-point domain.
///
/// Returns `None` if the interval does not fit into Q64.64.
pub fn decimal_to_fixed128(d: Decimal) -> Option<Fixed128> {
    if d.is_zero() {
        return Some(Fixed128::ZERO);
    }
    checked_f64_to_fixed128(d.to_f64()?)
}

/// Checked multiplication for Fixed128 that returns None on overflow.
#[inline]
pub fn checked_mul_128(a: Fixed128, b: Fixed128) -> Option<Fixed128> {
    a.checked_mul(b)
}

/// Checked division for Fixed128 that returns None on zero divisor or overflow.
#[inline]
pub fn checked_div_128(a: Fixed128, b: Fixed128) -> Option<Fixed128> {
    a.checked_div(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed128_basic_arithmetic() {
        let a = f64_to_fixed128(1.5);
        let b = f64_to_fixed128(2.0);
        assert_eq!(fixed128_to_f64(a + b), 3.5);
    }

    #[test]
    fn checked_conversion_rejects_non_finite() {
        assert!(checked_f64_to_fixed128(f64::NAN).is_none());
        assert!(checked_f64_to_fixed128(f64::INFINITY).is_none());
        assert!(checked_f64_to_fixed128(1e20).is_none());
        assert!(checked_f64_to_fixed128(1e12).is_some());
        assert_eq!(checked_f64_to_fixed128(-4.25), Some(f64_to_fixed128(-4.25)));
    }

    #[test]
    fn decimal_interval_conversion() {
        assert_eq!(decimal_to_fixed128(Decimal::new(25, 2)), Some(f64_to_fixed128(0.25)));
        assert_eq!(decimal_to_fixed128(Decimal::ZERO), Some(Fixed128::ZERO));
        assert_eq!(decimal_to_fixed128(Decimal::from(3)), Some(f64_to_fixed128(3.0)));
    }

    #[test]
    fn fixed128_checked_mul_overflow() {
        assert!(checked_mul_128(Fixed128::MAX, f64_to_fixed128(2.0)).is_none());
    }

    #[test]
    fn fixed128_checked_div_by_zero() {
        assert!(checked_div_128(f64_to_fixed128(1.0), Fixed128::ZERO).is_none());
    }

    #[test]
    fn fixed128_determinism() {
        let a = f64_to_fixed128(1.0 / 3.0);
        let b = f64_to_fixed128(1.0 / 3.0);
        assert_eq!(a * f64_to_fixed128(3.0), b * f64_to_fixed128(3.0));
    }
}
