//! Op-amp output rail clipper.
//!
//! The output stage of a single-supply op-amp driven into its rails behaves
//! like a pair of exponential junctions, so the approach to the rail has an
//! omega closed form (the "knee"). Below `x1 = bias - knee_factor·Vt` the
//! knee is replaced with the odd cubic `a·x³ + b·x` whose value and slope
//! match it at `x1`, which keeps small signals linear and cheap.

use log::debug;

use super::{ParamUpdate, StageConfig};
use crate::dsl::ParamValue;
use crate::error::{require_positive, Result, StageError};
use crate::solver::{central_difference, wright_omega};

const SLOPE_STEP: f64 = 2e-4;

/// Parameters for the rail clipper.
#[derive(Debug, Clone, PartialEq)]
pub struct OpAmpConfig {
    /// Input level around which the output reaches the rail
    pub bias: f64,
    /// Junction thermal voltage; smaller gives a sharper knee
    pub thermal_voltage: f64,
    /// Width of the knee region in multiples of the thermal voltage
    pub knee_factor: f64,
}

impl Default for OpAmpConfig {
    fn default() -> Self {
        Self {
            bias: 1.02,
            thermal_voltage: 0.0005,
            knee_factor: 100.0,
        }
    }
}

impl OpAmpConfig {
    /// Check the curve parameters.
    pub fn validate(&self) -> Result<()> {
        require_positive("opamp", "bias", self.bias)?;
        require_positive("opamp", "thermal voltage", self.thermal_voltage)?;
        require_positive("opamp", "knee factor", self.knee_factor)?;
        if self.bias - self.knee_factor * self.thermal_voltage <= 0.0 {
            return Err(StageError::config(
                "opamp",
                "knee region must start above zero (bias > knee_factor * vt)",
            ));
        }
        Ok(())
    }
}

impl StageConfig for OpAmpConfig {
    fn set_param(&mut self, key: &str, value: &ParamValue) -> ParamUpdate {
        match key {
            "bias" => value.assign(&mut self.bias),
            "vt" => value.assign(&mut self.thermal_voltage),
            "k" | "knee" => value.assign(&mut self.knee_factor),
            _ => ParamUpdate::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OpAmpCoefficients {
    bias: f64,
    vt: f64,
    v0: f64,
    x1: f64,
    a: f64,
    b: f64,
}

impl OpAmpCoefficients {
    fn new(config: &OpAmpConfig) -> Self {
        let bias = config.bias;
        let vt = config.thermal_voltage;
        let x1 = bias - config.knee_factor * vt;

        let mut coeffs = Self {
            bias,
            vt,
            v0: vt * wright_omega((bias + 1.0) / vt) - 2.0,
            x1,
            a: 0.0,
            b: 0.0,
        };
        let v1 = coeffs.knee(x1);
        let v1p = central_difference(|x| coeffs.knee(x), x1, SLOPE_STEP);
        coeffs.a = (v1p * x1 - v1) / (2.0 * x1 * x1 * x1);
        coeffs.b = (3.0 * v1 - v1p * x1) / (2.0 * x1);
        coeffs
    }

    /// Closed-form rail approach for `x ≥ 0`.
    #[inline]
    fn knee(&self, x: f64) -> f64 {
        let e = (-x / self.vt).exp();
        let vout = self.vt * wright_omega((self.bias - x + e) / self.vt) - e;
        (1.0 + self.v0 - vout) / (1.0 + self.v0)
    }

    #[inline]
    fn eval(&self, x: f64) -> f64 {
        let ax = x.abs();
        let y = if ax >= self.x1 {
            self.knee(ax)
        } else {
            (self.a * ax * ax + self.b) * ax
        };
        y.copysign(x)
    }
}

/// Stateless op-amp rail clipper.
#[derive(Debug, Clone)]
pub struct OpAmpClipper {
    config: OpAmpConfig,
    sample_rate: f64,
    coeffs: OpAmpCoefficients,
}

impl OpAmpClipper {
    pub fn new(config: OpAmpConfig, sample_rate: f64) -> Result<Self> {
        config.validate()?;
        super::validate_sample_rate(sample_rate)?;
        let coeffs = OpAmpCoefficients::new(&config);
        debug!(
            "opamp clipper: x1={:.4} a={:.5} b={:.5} v0={:.5}",
            coeffs.x1, coeffs.a, coeffs.b, coeffs.v0
        );
        Ok(Self {
            config,
            sample_rate,
            coeffs,
        })
    }

    /// The configuration this clipper was built from.
    pub fn config(&self) -> &OpAmpConfig {
        &self.config
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[inline]
    pub fn process_sample(&mut self, x: f64) -> f64 {
        self.coeffs.eval(x)
    }

    /// Process a block of samples.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        for (x, y) in input.iter().zip(output.iter_mut()) {
            *y = self.coeffs.eval(*x as f64) as f32;
        }
    }

    /// Stateless; kept for a uniform stage interface.
    pub fn reset(&mut self) {}

    /// Change the sample rate; the curve does not depend on it.
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<()> {
        super::validate_sample_rate(sample_rate)?;
        self.sample_rate = sample_rate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn clipper() -> OpAmpClipper {
        OpAmpClipper::new(OpAmpConfig::default(), 48_000.0).unwrap()
    }

    #[test]
    fn test_small_signal_nearly_unity() {
        let mut op = clipper();
        assert_eq!(op.process_sample(0.0), 0.0);
        assert_relative_eq!(op.process_sample(0.1), 0.09866, epsilon = 1e-4);
    }

    #[test]
    fn test_odd_symmetry() {
        let mut op = clipper();
        for i in 0..200 {
            let x = 0.013 * i as f64;
            assert_eq!(op.process_sample(-x), -op.process_sample(x));
        }
    }

    #[test]
    fn test_cubic_meets_knee() {
        let c = clipper().coeffs;
        let h = 1e-6;
        assert_abs_diff_eq!(c.eval(c.x1 - h), c.eval(c.x1 + h), epsilon = 1e-5);
        let left = (c.eval(c.x1 - h) - c.eval(c.x1 - 2.0 * h)) / h;
        let right = (c.eval(c.x1 + 2.0 * h) - c.eval(c.x1 + h)) / h;
        assert_relative_eq!(left, right, max_relative = 1e-4);
    }

    #[test]
    fn test_reaches_rail() {
        let mut op = clipper();
        assert_relative_eq!(op.process_sample(1.05), 1.0, epsilon = 1e-6);
        for &x in &[2.0, 10.0, 1e3] {
            let y = op.process_sample(x);
            assert!(y <= 1.0 + 1e-12 && y > 0.999, "y({}) = {}", x, y);
        }
    }

    #[test]
    fn test_monotonic() {
        let mut op = clipper();
        let mut prev = op.process_sample(-3.0);
        for i in 1..=6000 {
            let x = -3.0 + 0.001 * i as f64;
            let y = op.process_sample(x);
            assert!(y >= prev - 1e-12, "decreasing at {}", x);
            prev = y;
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let bad = OpAmpConfig {
            knee_factor: 5000.0,
            ..OpAmpConfig::default()
        };
        assert!(OpAmpClipper::new(bad, 48_000.0).is_err());
        let bad = OpAmpConfig {
            thermal_voltage: 0.0,
            ..OpAmpConfig::default()
        };
        assert!(OpAmpClipper::new(bad, 48_000.0).is_err());
    }
}
