//! IEEE-754 helpers that generated code calls out to.
//!
//! The `extern "C"` entry points at the bottom are what external references
//! point at; the plain Rust functions carry the semantics.

/// Comparison operator understood by [`eval_comparison`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `===`
    EqStrict,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Lte,
    /// `>=`
    Gte,
}

/// Evaluate a numeric comparison.
pub fn eval_comparison(op: CompareOp, lhs: f64, rhs: f64) -> bool {
    match op {
        CompareOp::Eq | CompareOp::EqStrict => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
        CompareOp::Lt => lhs < rhs,
        CompareOp::Gt => lhs > rhs,
        CompareOp::Lte => lhs <= rhs,
        CompareOp::Gte => lhs >= rhs,
    }
}

/// `x ** y` for an integer exponent, by binary decomposition.
///
/// Returns 1 for a zero exponent.
pub fn power_double_int(x: f64, y: i32) -> f64 {
    let mut m = if y < 0 { 1.0 / x } else { x };
    let mut n = y.unsigned_abs();
    let mut p = 1.0;
    while n != 0 {
        if n & 1 != 0 {
            p *= m;
        }
        m *= m;
        if n & 2 != 0 {
            p *= m;
        }
        m *= m;
        n >>= 2;
    }
    p
}

/// `x ** y` with JavaScript semantics.
///
/// Differs from C `pow` in two places: a NaN exponent always yields NaN, and
/// `(±1) ** ±Infinity` is NaN rather than 1.
pub fn power_double_double(x: f64, y: f64) -> f64 {
    if y.is_nan() || ((x == 1.0 || x == -1.0) && y.is_infinite()) {
        return f64::NAN;
    }
    x.powf(y)
}

/// `x ** y` taking the integer and square-root fast paths first.
pub fn power_helper(x: f64, y: f64) -> f64 {
    let y_int = y as i32;
    if y == y_int as f64 {
        return power_double_int(x, y_int);
    }
    if y == 0.5 {
        // `+ 0.0` turns -0 into +0.
        return if x.is_infinite() {
            f64::INFINITY
        } else {
            (x + 0.0).sqrt()
        };
    }
    if y == -0.5 {
        return if x.is_infinite() {
            0.0
        } else {
            1.0 / (x + 0.0).sqrt()
        };
    }
    power_double_double(x, y)
}

/// Floating point remainder with C `fmod` semantics.
pub fn modulo(x: f64, y: f64) -> f64 {
    x % y
}

pub(crate) extern "C" fn power_double_double_entry(x: f64, y: f64) -> f64 {
    power_double_double(x, y)
}

pub(crate) extern "C" fn power_double_int_entry(x: f64, y: i32) -> f64 {
    power_double_int(x, y)
}

pub(crate) extern "C" fn modulo_entry(x: f64, y: f64) -> f64 {
    modulo(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_double_int() {
        assert_eq!(power_double_int(2.0, 0), 1.0);
        assert_eq!(power_double_int(2.0, 10), 1024.0);
        assert_eq!(power_double_int(2.0, -2), 0.25);
        assert_eq!(power_double_int(-3.0, 3), -27.0);
        assert_eq!(power_double_int(0.5, 5), 0.03125);
    }

    #[test]
    fn test_power_double_double_js_special_cases() {
        assert!(power_double_double(2.0, f64::NAN).is_nan());
        assert!(power_double_double(1.0, f64::INFINITY).is_nan());
        assert!(power_double_double(-1.0, f64::NEG_INFINITY).is_nan());
        assert_eq!(power_double_double(4.0, 0.5), 2.0);
        // C pow would give 1 here; JS gives NaN only for infinite exponents.
        assert_eq!(power_double_double(1.0, 3.0), 1.0);
    }

    #[test]
    fn test_power_helper_fast_paths() {
        assert_eq!(power_helper(9.0, 0.5), 3.0);
        assert_eq!(power_helper(4.0, -0.5), 0.5);
        assert_eq!(power_helper(f64::NEG_INFINITY, 0.5), f64::INFINITY);
        assert_eq!(power_helper(f64::INFINITY, -0.5), 0.0);
        assert_eq!(power_helper(-0.0, 0.5), 0.0);
        assert!(power_helper(-0.0, 0.5).is_sign_positive());
        assert_eq!(power_helper(3.0, 2.0), 9.0);
    }

    #[test]
    fn test_modulo() {
        assert_eq!(modulo(7.5, 2.0), 1.5);
        assert_eq!(modulo(-7.5, 2.0), -1.5);
        assert!(modulo(1.0, 0.0).is_nan());
    }

    #[test]
    fn test_eval_comparison() {
        assert!(eval_comparison(CompareOp::Eq, 1.0, 1.0));
        assert!(eval_comparison(CompareOp::EqStrict, 0.0, -0.0));
        assert!(eval_comparison(CompareOp::Ne, f64::NAN, f64::NAN));
        assert!(eval_comparison(CompareOp::Lt, 1.0, 2.0));
        assert!(!eval_comparison(CompareOp::Gt, 1.0, 2.0));
        assert!(eval_comparison(CompareOp::Lte, 2.0, 2.0));
        assert!(!eval_comparison(CompareOp::Gte, f64::NAN, 0.0));
    }
}
