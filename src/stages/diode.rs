//! Diode-pair clipper.
//!
//! A series resistor `Re` feeds a node loaded by a capacitor `C` and an
//! anti-parallel diode pair. Discretizing the node equation with the
//! trapezoidal rule leaves, at each sample, an implicit equation of the form
//!
//! ```text
//!   v + Re·Is·(exp(v/Vt) - 1) / g = k2·q
//! ```
//!
//! which the Wright omega function solves without iteration:
//!
//! ```text
//!   r = sign(q),  w = k2·q + k3·r
//!   v = w - Vt·r·ω(k4·r·w + k5)
//! ```
//!
//! `q` combines the new input with the carried state `p`, and `p` is updated
//! from the output after every sample.

use log::debug;

use super::{ParamUpdate, StageConfig};
use crate::dsl::ParamValue;
use crate::error::{require_positive, Result};
use crate::solver::{flush_denormal, wright_omega};

/// Which polarity the diodes clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipSide {
    /// Both diodes present (symmetric clipping)
    #[default]
    Both,
    /// Only positive excursions clip
    Up,
    /// Only negative excursions clip
    Down,
}

impl ClipSide {
    /// Parse a side selector.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "both" | "sym" | "symmetric" => Some(Self::Both),
            "up" | "pos" | "positive" => Some(Self::Up),
            "down" | "neg" | "negative" => Some(Self::Down),
            _ => None,
        }
    }

    fn conducts(self, q: f64) -> bool {
        match self {
            Self::Both => true,
            Self::Up => q > 0.0,
            Self::Down => q < 0.0,
        }
    }
}

/// Parameters for a diode-pair clipper.
#[derive(Debug, Clone, PartialEq)]
pub struct DiodeConfig {
    /// Node capacitance (F)
    pub capacitance: f64,
    /// Series resistance (Ω)
    pub resistance: f64,
    /// Diode saturation current (A)
    pub saturation_current: f64,
    /// Thermal voltage (V)
    pub thermal_voltage: f64,
    /// Clipping polarity
    pub side: ClipSide,
    /// Inputs with |vin| below this skip the diode solve (V)
    pub linear_threshold: f64,
}

impl Default for DiodeConfig {
    fn default() -> Self {
        Self::silicon()
    }
}

impl DiodeConfig {
    /// Silicon signal diodes (1N914-like).
    pub fn silicon() -> Self {
        Self {
            capacitance: 10e-9,
            resistance: 2200.0,
            saturation_current: 200e-9,
            thermal_voltage: 0.02585,
            side: ClipSide::Both,
            linear_threshold: 0.02,
        }
    }

    /// Germanium diodes: larger leakage, softer knee.
    pub fn germanium() -> Self {
        Self {
            capacitance: 50e-9,
            resistance: 500.0,
            saturation_current: 5e-6,
            ..Self::silicon()
        }
    }

    /// Set the clipping polarity.
    pub fn with_side(mut self, side: ClipSide) -> Self {
        self.side = side;
        self
    }

    /// Check physical constraints.
    pub fn validate(&self) -> Result<()> {
        require_positive("diode", "capacitance", self.capacitance)?;
        require_positive("diode", "resistance", self.resistance)?;
        require_positive("diode", "saturation current", self.saturation_current)?;
        require_positive("diode", "thermal voltage", self.thermal_voltage)?;
        require_positive("diode", "linear threshold", self.linear_threshold)
    }
}

impl StageConfig for DiodeConfig {
    fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "si" | "silicon" => Some(Self::silicon()),
            "ge" | "germanium" => Some(Self::germanium()),
            _ => None,
        }
    }

    fn set_param(&mut self, key: &str, value: &ParamValue) -> ParamUpdate {
        match key {
            "c" => value.assign(&mut self.capacitance),
            "re" | "r" => value.assign(&mut self.resistance),
            "is" => value.assign(&mut self.saturation_current),
            "vt" => value.assign(&mut self.thermal_voltage),
            "threshold" => value.assign(&mut self.linear_threshold),
            "side" => match value.as_ident().and_then(ClipSide::from_str) {
                Some(side) => {
                    self.side = side;
                    ParamUpdate::Applied
                }
                None => ParamUpdate::Invalid(format!(
                    "expected one of both/up/down, got '{}'",
                    value
                )),
            },
            _ => ParamUpdate::Unknown,
        }
    }
}

/// Trapezoidal-rule constants derived from configuration and sample rate.
#[derive(Debug, Clone, Copy)]
struct DiodeCoefficients {
    k1: f64,
    k2: f64,
    k3: f64,
    k4: f64,
    k5: f64,
    k6: f64,
    a1: f64,
    /// Small-signal gain with the diode conductance at zero bias
    k_linear: f64,
    vt: f64,
}

impl DiodeCoefficients {
    fn new(config: &DiodeConfig, sample_rate: f64) -> Self {
        let b0 = 2.0 * sample_rate;
        let b1 = -2.0 * sample_rate;
        let a1 = 1.0;

        let rc = config.resistance * config.capacitance;
        let g = rc * b0 + 1.0;

        let k2 = rc / g;
        let k3 = config.saturation_current * config.resistance / g;
        let k4 = 1.0 / config.thermal_voltage;

        Self {
            k1: 1.0 / rc,
            k2,
            k3,
            k4,
            k5: (k3 / config.thermal_voltage).ln(),
            k6: b1 - a1 * b0,
            a1,
            k_linear: k2 / (1.0 + k3 * k4),
            vt: config.thermal_voltage,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct DiodeState {
    /// Carried trapezoidal state
    p: f64,
}

/// Diode-pair clipping stage.
#[derive(Debug, Clone)]
pub struct DiodeClipper {
    config: DiodeConfig,
    sample_rate: f64,
    coeffs: DiodeCoefficients,
    state: DiodeState,
}

impl DiodeClipper {
    /// Create a clipper at rest.
    pub fn new(config: DiodeConfig, sample_rate: f64) -> Result<Self> {
        config.validate()?;
        super::validate_sample_rate(sample_rate)?;

        let coeffs = DiodeCoefficients::new(&config, sample_rate);
        debug!(
            "diode clipper: k1={:.4e} k2={:.4e} k3={:.4e} k5={:.4} k6={:.4e} side={:?}",
            coeffs.k1, coeffs.k2, coeffs.k3, coeffs.k5, coeffs.k6, config.side
        );

        Ok(Self {
            config,
            sample_rate,
            coeffs,
            state: DiodeState::default(),
        })
    }

    /// The configuration this clipper was built from.
    pub fn config(&self) -> &DiodeConfig {
        &self.config
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Process one sample.
    #[inline]
    pub fn process_sample(&mut self, vin: f64) -> f64 {
        let c = &self.coeffs;
        let q = c.k1 * vin - self.state.p;

        // the non-conducting side is the bare RC network at any level
        let vout = if !self.config.side.conducts(q) {
            c.k2 * q
        } else if vin.abs() < self.config.linear_threshold {
            c.k_linear * q
        } else {
            let r = sign(q);
            let w = c.k2 * q + c.k3 * r;
            w - c.vt * r * wright_omega(c.k4 * r * w + c.k5)
        };

        self.state.p = flush_denormal(c.k6 * vout - c.a1 * self.state.p);
        vout
    }

    /// Process a block of samples.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        for (x, y) in input.iter().zip(output.iter_mut()) {
            *y = self.process_sample(*x as f64) as f32;
        }
    }

    /// Return to rest.
    pub fn reset(&mut self) {
        self.state = DiodeState::default();
    }

    /// Rebuild coefficients for a new sample rate and return to rest.
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<()> {
        super::validate_sample_rate(sample_rate)?;
        self.coeffs = DiodeCoefficients::new(&self.config, sample_rate);
        self.sample_rate = sample_rate;
        self.reset();
        Ok(())
    }
}

#[inline]
fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::f64::consts::PI;

    const FS: f64 = 48_000.0;

    fn single_cycle(amplitude: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|n| amplitude * (2.0 * PI * n as f64 / len as f64).sin())
            .collect()
    }

    #[test]
    fn test_odd_symmetry() {
        let mut pos = DiodeClipper::new(DiodeConfig::default(), FS).unwrap();
        let mut neg = DiodeClipper::new(DiodeConfig::default(), FS).unwrap();

        let input: Vec<f64> = (0..2000)
            .map(|n| 0.8 * (n as f64 * 0.013).sin() + 0.3 * (n as f64 * 0.071).cos())
            .collect();
        for &x in &input {
            let a = pos.process_sample(x);
            let b = neg.process_sample(-x);
            assert_eq!(a, -b, "asymmetric response to {}", x);
        }
    }

    #[test]
    fn test_zero_input_is_fixed_point() {
        let mut d = DiodeClipper::new(DiodeConfig::default(), FS).unwrap();
        for _ in 0..10_000 {
            assert_eq!(d.process_sample(0.0), 0.0);
        }
    }

    #[test]
    fn test_decays_back_to_zero() {
        let mut d = DiodeClipper::new(DiodeConfig::germanium(), FS).unwrap();
        for &x in &[0.5, 0.3, -0.2] {
            d.process_sample(x);
        }
        let mut last = 1.0;
        for _ in 0..1000 {
            last = d.process_sample(0.0);
        }
        assert_eq!(last, 0.0);
        assert_eq!(d.process_sample(0.0), 0.0);
    }

    #[test]
    fn test_bypass_boundary_continuity() {
        for side in [ClipSide::Both, ClipSide::Up, ClipSide::Down] {
            let mut d = DiodeClipper::new(DiodeConfig::default().with_side(side), FS).unwrap();
            for n in 0..100 {
                d.process_sample(0.0199 * (n as f64 * 0.01).sin());
            }
            let th = d.config().linear_threshold;
            let e = 1e-9;
            for &(below, above) in &[(th - e, th + e), (-th + e, -th - e)] {
                let a = d.clone().process_sample(below);
                let b = d.clone().process_sample(above);
                assert_abs_diff_eq!(a, b, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_non_conducting_side_skips_bypass() {
        let config = DiodeConfig::default().with_side(ClipSide::Down);
        let th = config.linear_threshold;
        let mut rc_only = DiodeClipper::new(config, FS).unwrap();
        let mut both = DiodeClipper::new(DiodeConfig::default(), FS).unwrap();
        // from rest a small positive step sees no diode on the down-only clipper
        let a = rc_only.process_sample(0.5 * th);
        let b = both.process_sample(0.5 * th);
        assert!(a > b);
        let c = rc_only.coeffs;
        assert_relative_eq!(a, c.k2 * c.k1 * 0.5 * th, epsilon = 1e-12);
    }

    #[test]
    fn test_small_signal_passthrough() {
        let mut d = DiodeClipper::new(DiodeConfig::default(), FS).unwrap();
        let amplitude = 0.015;
        for x in single_cycle(amplitude, 480) {
            let y = d.process_sample(x);
            assert!((y - x).abs() < 0.05 * amplitude, "{} vs {}", y, x);
        }
    }

    #[test]
    fn test_large_signal_flattens_symmetrically() {
        let mut d = DiodeClipper::new(DiodeConfig::default(), FS).unwrap();
        let amplitude = 0.15;
        let out: Vec<f64> = single_cycle(amplitude, 480)
            .into_iter()
            .map(|x| d.process_sample(x))
            .collect();

        let max = out.iter().cloned().fold(f64::MIN, f64::max);
        let min = out.iter().cloned().fold(f64::MAX, f64::min);
        assert!(max - min < 0.9 * 2.0 * amplitude);
        assert!(max > 0.05);
        assert_abs_diff_eq!(max, -min, epsilon = 1e-6);
    }

    #[test]
    fn test_single_sided_clipping() {
        let mut up = DiodeClipper::new(DiodeConfig::default().with_side(ClipSide::Up), FS).unwrap();
        let out: Vec<f64> = single_cycle(0.5, 480)
            .into_iter()
            .map(|x| up.process_sample(x))
            .collect();
        let max = out.iter().cloned().fold(f64::MIN, f64::max);
        let min = out.iter().cloned().fold(f64::MAX, f64::min);
        // positive half clips, negative half only sees the RC network
        assert!(max < 0.3);
        assert!(-min > 0.4);
    }

    #[test]
    fn test_block_matches_samples() {
        let input: Vec<f32> = (0..1024).map(|n| 0.7 * (n as f32 * 0.05).sin()).collect();

        let mut a = DiodeClipper::new(DiodeConfig::germanium(), FS).unwrap();
        let mut whole = vec![0.0f32; input.len()];
        a.process_block(&input, &mut whole);

        let mut b = DiodeClipper::new(DiodeConfig::germanium(), FS).unwrap();
        let mut chunked = vec![0.0f32; input.len()];
        for (i, o) in input.chunks(37).zip(chunked.chunks_mut(37)) {
            b.process_block(i, o);
        }
        assert_eq!(whole, chunked);
    }

    #[test]
    fn test_set_sample_rate_resets_state() {
        let mut d = DiodeClipper::new(DiodeConfig::default(), FS).unwrap();
        d.process_sample(0.8);
        d.set_sample_rate(96_000.0).unwrap();
        let mut fresh = DiodeClipper::new(DiodeConfig::default(), 96_000.0).unwrap();
        assert_eq!(d.sample_rate(), 96_000.0);
        assert_eq!(d.process_sample(0.4), fresh.process_sample(0.4));
        assert!(d.set_sample_rate(0.0).is_err());
        assert_eq!(d.sample_rate(), 96_000.0);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let bad = DiodeConfig {
            capacitance: 0.0,
            ..DiodeConfig::default()
        };
        assert!(DiodeClipper::new(bad, FS).is_err());
        let bad = DiodeConfig {
            resistance: -10.0,
            ..DiodeConfig::default()
        };
        assert!(DiodeClipper::new(bad, FS).is_err());
        let bad = DiodeConfig {
            linear_threshold: 0.0,
            ..DiodeConfig::default()
        };
        assert!(DiodeClipper::new(bad, FS).is_err());
        assert!(DiodeClipper::new(DiodeConfig::default(), 0.0).is_err());
        assert!(DiodeClipper::new(DiodeConfig::default(), -48_000.0).is_err());
    }

    #[test]
    fn test_params() {
        let mut config = DiodeConfig::preset("germanium").unwrap();
        assert_eq!(
            config.set_param("side", &ParamValue::Ident("down".into())),
            ParamUpdate::Applied
        );
        assert_eq!(config.side, ClipSide::Down);
        assert_eq!(
            config.set_param("is", &ParamValue::Number(1e-6)),
            ParamUpdate::Applied
        );
        assert_eq!(config.saturation_current, 1e-6);
        assert_eq!(
            config.set_param("gain", &ParamValue::Number(2.0)),
            ParamUpdate::Unknown
        );
        assert!(matches!(
            config.set_param("side", &ParamValue::Ident("sideways".into())),
            ParamUpdate::Invalid(_)
        ));
    }
}
