//! Numerical kernels shared by the stage models.
//!
//! Two solvers cover every device equation in the crate:
//!
//! - [`wright_omega`] inverts `y + ln(y) = x` in closed form. Diode and
//!   bipolar junction equations of the Shockley form
//!   `v + a·exp(v/Vt) = b` reduce to it after a change of variables, so the
//!   diode, BJT and op-amp stages never iterate.
//! - [`NodeSolver`] runs a fixed number of Newton-Raphson steps on a single
//!   node voltage, clamping to the supply rails after every step. The CMOS and
//!   JFET push-pull stages find their output voltage this way.
//!
//! Both are allocation-free and hold no state, so they can be called from the
//! audio thread at any rate.

mod newton;
mod omega;

pub use newton::{NewtonConfig, NodeSolver};
pub use omega::{wright_omega, OMEGA_SERIES_THRESHOLD};

/// Magnitude below which carried filter state is flushed to zero.
pub const DENORMAL_THRESHOLD: f64 = 1e-20;

/// Flush tiny values to zero so decaying state never goes subnormal.
#[inline]
pub fn flush_denormal(x: f64) -> f64 {
    if x.abs() < DENORMAL_THRESHOLD {
        0.0
    } else {
        x
    }
}

/// Central finite-difference derivative with total step `dx`.
pub(crate) fn central_difference(f: impl Fn(f64) -> f64, x: f64, dx: f64) -> f64 {
    (f(x + 0.5 * dx) - f(x - 0.5 * dx)) / dx
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_flush_denormal() {
        assert_eq!(flush_denormal(1e-25), 0.0);
        assert_eq!(flush_denormal(-1e-25), 0.0);
        assert_eq!(flush_denormal(1e-3), 1e-3);
    }

    #[test]
    fn test_central_difference() {
        let d = central_difference(|x| x * x * x, 2.0, 1e-4);
        assert_relative_eq!(d, 12.0, epsilon = 1e-6);
    }
}
