//! Wright omega function on the real line.
//!
//! `ω(x)` is the unique positive `y` with `y + ln(y) = x`. Near the origin a
//! fixed 5th-order Taylor polynomial is used; elsewhere an asymptotic seed is
//! refined with two fourth-order Fritsch-Shafer-Crowley steps, which is
//! accurate to better than 2e-6 relative error over the whole audio range.

/// Inputs with `|x|` below this use the Taylor polynomial.
pub const OMEGA_SERIES_THRESHOLD: f64 = 0.5;

/// Below this `ω(x) = e^x` to full double precision.
const EXP_REGIME: f64 = -40.0;

/// Taylor coefficients of ω around 0 (ω(0) is the omega constant).
const SERIES: [f64; 6] = [
    0.5671432904097838,
    0.3618963236098023,
    0.0736778463779836,
    -0.0013437346889135,
    -0.0016355437889344,
    0.0002166542734346,
];

const REFINEMENT_STEPS: usize = 2;

/// Evaluate the Wright omega function.
///
/// Returns the principal real branch: the positive solution of
/// `y + ln(y) = x`. Pure and allocation-free.
#[inline]
pub fn wright_omega(x: f64) -> f64 {
    if x.abs() < OMEGA_SERIES_THRESHOLD {
        return series(x);
    }
    if x < EXP_REGIME {
        return x.exp();
    }

    let mut y = if x > 0.0 { x - x.ln() } else { x.exp() };
    for _ in 0..REFINEMENT_STEPS {
        y = fsc_step(x, y);
    }
    y
}

#[inline]
fn series(x: f64) -> f64 {
    SERIES
        .iter()
        .rev()
        .fold(0.0, |acc, &c| acc * x + c)
}

/// One Fritsch-Shafer-Crowley iteration on `y + ln(y) - x = 0`.
#[inline]
fn fsc_step(x: f64, y: f64) -> f64 {
    let r = x - y - y.ln();
    let a = (1.0 + y) * (1.0 + y + 2.0 * r / 3.0);
    y * (1.0 + r / (1.0 + y) * (a - 0.5 * r) / (a - r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn residual(x: f64) -> f64 {
        let y = wright_omega(x);
        y + y.ln() - x
    }

    #[test]
    fn test_omega_constant() {
        // ω(0) = W(1)
        assert_relative_eq!(wright_omega(0.0), 0.5671432904097838, epsilon = 1e-15);
        // ω(1) = 1 exactly
        assert_relative_eq!(wright_omega(1.0), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_residual_over_audio_range() {
        let n = 24_000;
        for i in 0..=n {
            let x = -60.0 + 120.0 * i as f64 / n as f64;
            let r = residual(x);
            assert!(r.abs() < 1e-5, "residual {} at x = {}", r, x);
        }
    }

    #[test]
    fn test_branch_continuity() {
        for &t in &[OMEGA_SERIES_THRESHOLD, -OMEGA_SERIES_THRESHOLD] {
            let inside = t - t.signum() * 1e-12;
            let jump = (wright_omega(inside) - wright_omega(t)).abs();
            assert!(jump < 1e-5, "jump {} at threshold {}", jump, t);
        }
    }

    #[test]
    fn test_large_arguments() {
        for &x in &[1e3, 1e5, 1e8] {
            let y = wright_omega(x);
            assert!(y.is_finite() && y > 0.0);
            assert!((y + y.ln() - x).abs() < 1e-6 * x);
        }
    }

    #[test]
    fn test_deep_negative_is_exponential() {
        assert_eq!(wright_omega(-50.0), (-50.0f64).exp());
        assert_eq!(wright_omega(-1e6), 0.0);
        assert!(!wright_omega(-745.0).is_nan());
    }

    #[test]
    fn test_monotonic() {
        let mut prev = wright_omega(-60.0);
        for i in 1..=1200 {
            let x = -60.0 + 0.1 * i as f64;
            let y = wright_omega(x);
            assert!(y >= prev, "not monotonic at x = {}", x);
            prev = y;
        }
    }
}
