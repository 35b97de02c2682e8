//! Numerical guards.
//!
//! Values handed back to callers must never be NaN, infinite or outside
//! their documented range.

/// Replace NaN/Inf with `fallback`.
pub fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Clamp into `[min, max]`, mapping non-finite input to `min`.
pub fn clamp_finite(value: f64, min: f64, max: f64) -> f64 {
    finite_or(value, min).clamp(min, max)
}

pub fn clamp_unit(value: f64) -> f64 {
    clamp_finite(value, 0.0, 1.0)
}

/// `numerator / denominator`, or `fallback` when the denominator is zero or
/// the result is not finite.
pub fn safe_ratio(numerator: f64, denominator: f64, fallback: f64) -> f64 {
    if denominator == 0.0 {
        return fallback;
    }
    finite_or(numerator / denominator, fallback)
}

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn has_invalid_values(values: &[f64]) -> bool {
    values.iter().any(|v| !v.is_finite())
}
