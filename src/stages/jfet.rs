//! Complementary JFET push-pull stage and its closed-form approximation.
//!
//! [`JfetStage`] ties an N-channel and a P-channel junction FET between
//! ground and the supply with a common gate, and solves for the output node
//! where the two square-law drain currents cancel, exactly like the CMOS
//! stage. [`JfetShaper`] replaces the solve with a piecewise curve that costs
//! a handful of flops.

use log::{debug, info};

use super::{ParamUpdate, StageConfig};
use crate::dsl::ParamValue;
use crate::error::{require_finite, require_positive, Result, StageError};
use crate::solver::{NewtonConfig, NodeSolver};

/// Largest deviation between a fitted [`JfetShaper`] and the default
/// [`JfetStage`] over the stage's input swing (normalized output units).
pub const SHAPER_TOLERANCE: f64 = 0.15;

/// Parameters for the push-pull JFET stage.
#[derive(Debug, Clone, PartialEq)]
pub struct JfetConfig {
    /// Supply voltage (V)
    pub supply_voltage: f64,
    /// Drain current at vgs = 0 (A)
    pub idss: f64,
    /// Pinch-off magnitude (V); Vto = -pinch_off for N, +pinch_off for P
    pub pinch_off: f64,
    /// Channel-length modulation (1/V)
    pub lambda: f64,
    /// Input bias point; half the supply when unset
    pub bias: Option<f64>,
    pub newton: NewtonConfig,
}

impl Default for JfetConfig {
    fn default() -> Self {
        Self {
            supply_voltage: 9.0,
            idss: 5e-3,
            pinch_off: 0.5,
            lambda: 0.02,
            bias: None,
            newton: NewtonConfig::default().with_epsilon(1e-12),
        }
    }
}

impl JfetConfig {
    /// Resolved input bias point.
    pub fn bias(&self) -> f64 {
        self.bias.unwrap_or(0.5 * self.supply_voltage)
    }

    /// Check physical constraints.
    pub fn validate(&self) -> Result<()> {
        require_positive("jfet", "supply voltage", self.supply_voltage)?;
        require_positive("jfet", "idss", self.idss)?;
        require_positive("jfet", "pinch-off voltage", self.pinch_off)?;
        require_finite("jfet", "lambda", self.lambda)?;
        if self.lambda < 0.0 {
            return Err(StageError::config("jfet", "lambda must not be negative"));
        }
        require_finite("jfet", "bias", self.bias())?;
        self.newton.validate("jfet", self.supply_voltage)
    }
}

impl StageConfig for JfetConfig {
    fn set_param(&mut self, key: &str, value: &ParamValue) -> ParamUpdate {
        match key {
            "vdd" => value.assign(&mut self.supply_voltage),
            "idss" => value.assign(&mut self.idss),
            "vp" | "pinchoff" => value.assign(&mut self.pinch_off),
            "lambda" => value.assign(&mut self.lambda),
            "bias" => value.assign_some(&mut self.bias),
            "iterations" => value.assign_count(&mut self.newton.iterations),
            "rail_low" => value.assign_some(&mut self.newton.rail_low),
            "rail_high" => value.assign_some(&mut self.newton.rail_high),
            "epsilon" => value.assign(&mut self.newton.epsilon),
            _ => ParamUpdate::Unknown,
        }
    }
}

/// Square-law constants shared by both channels.
#[derive(Debug, Clone, Copy)]
struct SquareLaw {
    beta: f64,
    vto: f64,
    lambda: f64,
}

impl SquareLaw {
    /// N-channel drain current and `∂i/∂vds`.
    #[inline]
    fn n_channel(&self, vgs: f64, vds: f64) -> (f64, f64) {
        let vov = vgs + self.vto;
        if vov <= 0.0 {
            return (0.0, 0.0);
        }
        let clm = 1.0 + self.lambda * vds;
        if vds < vov {
            let i = self.beta * (vov * vds - 0.5 * vds * vds);
            (i * clm, self.beta * (vov - vds) * clm + i * self.lambda)
        } else {
            let i = 0.5 * self.beta * vov * vov;
            (i * clm, i * self.lambda)
        }
    }

    /// P-channel drain current and `∂i/∂vds` (negative current, positive slope).
    #[inline]
    fn p_channel(&self, vgs: f64, vds: f64) -> (f64, f64) {
        let vov = vgs - self.vto;
        if vov >= 0.0 {
            return (0.0, 0.0);
        }
        let clm = 1.0 - self.lambda * vds;
        if vds > vov {
            let i = -self.beta * (vov * vds - 0.5 * vds * vds);
            (i * clm, -self.beta * (vov - vds) * clm - i * self.lambda)
        } else {
            let i = -0.5 * self.beta * vov * vov;
            (i * clm, -i * self.lambda)
        }
    }
}

/// Push-pull JFET gain stage.
#[derive(Debug, Clone)]
pub struct JfetStage {
    config: JfetConfig,
    sample_rate: f64,
    law: SquareLaw,
    solver: NodeSolver,
    bias: f64,
    quiescent: f64,
    output_scale: f64,
}

impl JfetStage {
    /// Create a stage and solve its operating point.
    pub fn new(config: JfetConfig, sample_rate: f64) -> Result<Self> {
        config.validate()?;
        super::validate_sample_rate(sample_rate)?;

        let law = SquareLaw {
            beta: 2.0 * config.idss / (config.pinch_off * config.pinch_off),
            vto: config.pinch_off,
            lambda: config.lambda,
        };
        let mut stage = Self {
            law,
            solver: NodeSolver::new(&config.newton, config.supply_voltage),
            bias: config.bias(),
            quiescent: 0.0,
            output_scale: 2.0 / config.supply_voltage,
            sample_rate,
            config,
        };
        stage.quiescent = stage.solve(stage.bias);

        debug!(
            "jfet stage: beta={:.4e} bias={:.4} V quiescent={:.6} V",
            law.beta, stage.bias, stage.quiescent
        );
        Ok(stage)
    }

    /// The configuration this stage was built from.
    pub fn config(&self) -> &JfetConfig {
        &self.config
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Output voltage at the bias point.
    pub fn quiescent(&self) -> f64 {
        self.quiescent
    }

    #[inline]
    fn node_current(&self, vin: f64, vout: f64) -> (f64, f64) {
        let vdd = self.config.supply_voltage;
        let (i_n, g_n) = self.law.n_channel(vin, vout);
        let (i_p, g_p) = self.law.p_channel(vin - vdd, vout - vdd);
        (i_n + i_p, g_n + g_p)
    }

    /// Output node voltage for an absolute input voltage, starting mid-rail.
    #[inline]
    pub fn solve(&self, vin: f64) -> f64 {
        self.solve_from(vin, self.solver.midpoint())
    }

    /// Output node voltage starting from `guess`.
    #[inline]
    pub fn solve_from(&self, vin: f64, guess: f64) -> f64 {
        self.solver.solve(guess, |vout| self.node_current(vin, vout))
    }

    #[inline]
    fn transfer(&self, s: f64) -> f64 {
        (self.quiescent - self.solve(s + self.bias)) * self.output_scale
    }

    /// Process one AC-coupled sample; output normalized to ±1 at the rails.
    #[inline]
    pub fn process_sample(&mut self, s: f64) -> f64 {
        self.transfer(s)
    }

    /// Process a block of samples.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        for (x, y) in input.iter().zip(output.iter_mut()) {
            *y = self.transfer(*x as f64) as f32;
        }
    }

    /// Stateless; kept for a uniform stage interface.
    pub fn reset(&mut self) {}

    /// Change the sample rate; the transfer curve does not depend on it.
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<()> {
        super::validate_sample_rate(sample_rate)?;
        self.sample_rate = sample_rate;
        Ok(())
    }
}

/// Parameters for the closed-form shaper.
#[derive(Debug, Clone, PartialEq)]
pub struct JfetShaperConfig {
    /// End of the linear region, in `[0, 1)`
    pub knee: f64,
    /// Curvature of the quadratic region
    pub gamma: f64,
    /// Input scaling; fitted against the default [`JfetStage`] when unset
    pub input_gain: Option<f64>,
}

impl Default for JfetShaperConfig {
    fn default() -> Self {
        Self {
            knee: 0.5,
            gamma: 0.3,
            input_gain: None,
        }
    }
}

impl JfetShaperConfig {
    /// Check the curve parameters.
    pub fn validate(&self) -> Result<()> {
        require_finite("jfet shaper", "knee", self.knee)?;
        if !(0.0..1.0).contains(&self.knee) {
            return Err(StageError::config(
                "jfet shaper",
                format!("knee must lie in [0, 1), got {}", self.knee),
            ));
        }
        require_positive("jfet shaper", "gamma", self.gamma)?;
        if let Some(gain) = self.input_gain {
            require_positive("jfet shaper", "input gain", gain)?;
        }
        Ok(())
    }
}

impl StageConfig for JfetShaperConfig {
    fn set_param(&mut self, key: &str, value: &ParamValue) -> ParamUpdate {
        match key {
            "knee" => value.assign(&mut self.knee),
            "gamma" => value.assign(&mut self.gamma),
            "gain" => value.assign_some(&mut self.input_gain),
            _ => ParamUpdate::Unknown,
        }
    }
}

/// Region boundaries of the shaper curve.
///
/// On `|x|` with `d = |x| - knee` and `a = γ·(1 - knee)`:
///
/// | region | range | `f(|x|)` |
/// |---|---|---|
/// | linear passthrough | `|x| < knee` | `|x|` |
/// | quadratic | `knee ≤ |x| < x_sat` | `knee + d - a·d²` |
/// | hard saturation | `|x| ≥ x_sat` | `f_sat` |
///
/// `x_sat = knee + 1/(2a)` is where the quadratic's slope reaches zero and
/// `f_sat = knee + 1/(4a)` is its value there, so both value and slope are
/// continuous at both boundaries. Output is `sign(x)·f/f_sat`.
#[derive(Debug, Clone, Copy)]
struct ShaperCurve {
    knee: f64,
    a: f64,
    x_sat: f64,
    f_sat: f64,
}

impl ShaperCurve {
    fn new(knee: f64, gamma: f64) -> Self {
        let a = gamma * (1.0 - knee);
        Self {
            knee,
            a,
            x_sat: knee + 0.5 / a,
            f_sat: knee + 0.25 / a,
        }
    }

    #[inline]
    fn eval(&self, x: f64) -> f64 {
        let ax = x.abs();
        let f = if ax < self.knee {
            ax
        } else if ax < self.x_sat {
            let d = ax - self.knee;
            self.knee + d - self.a * d * d
        } else {
            self.f_sat
        };
        (f / self.f_sat).copysign(x)
    }
}

/// Cheap piecewise-quadratic stand-in for [`JfetStage`].
#[derive(Debug, Clone)]
pub struct JfetShaper {
    config: JfetShaperConfig,
    sample_rate: f64,
    curve: ShaperCurve,
    input_gain: f64,
}

impl JfetShaper {
    /// Create a shaper, fitting the input gain against the default JFET
    /// stage when none is configured.
    pub fn new(config: JfetShaperConfig, sample_rate: f64) -> Result<Self> {
        match config.input_gain {
            Some(_) => Self::build(config, sample_rate, None),
            None => {
                let reference = JfetStage::new(JfetConfig::default(), sample_rate)?;
                Self::fit(config, &reference)
            }
        }
    }

    /// Create a shaper whose input gain minimizes the largest deviation from
    /// `reference` over the reference's input swing.
    pub fn fit(config: JfetShaperConfig, reference: &JfetStage) -> Result<Self> {
        config.validate()?;
        let curve = ShaperCurve::new(config.knee, config.gamma);

        let swing = 0.5 * reference.config().supply_voltage;
        let grid: Vec<(f64, f64)> = (0..=450)
            .map(|i| {
                let s = swing * i as f64 / 450.0;
                (s, reference.transfer(s))
            })
            .collect();
        let worst = |gain: f64| {
            grid.iter()
                .map(|&(s, y)| (curve.eval(gain * s) - y).abs())
                .fold(0.0, f64::max)
        };

        // coarse scan, then refine around the best candidate
        let mut best = (f64::INFINITY, 1.0);
        for k in 1..=400 {
            let gain = 0.01 * k as f64;
            let err = worst(gain);
            if err < best.0 {
                best = (err, gain);
            }
        }
        let centre = best.1;
        for k in -100..=100 {
            let gain = centre + 1e-4 * k as f64;
            if gain <= 0.0 {
                continue;
            }
            let err = worst(gain);
            if err < best.0 {
                best = (err, gain);
            }
        }

        info!(
            "jfet shaper fitted: knee={} gamma={} gain={:.4} max error={:.4}",
            config.knee, config.gamma, best.1, best.0
        );
        Self::build(config, reference.sample_rate(), Some(best.1))
    }

    fn build(config: JfetShaperConfig, sample_rate: f64, fitted: Option<f64>) -> Result<Self> {
        config.validate()?;
        super::validate_sample_rate(sample_rate)?;
        let curve = ShaperCurve::new(config.knee, config.gamma);
        let input_gain = fitted.or(config.input_gain).unwrap_or(1.0);
        debug!(
            "jfet shaper: a={:.4} x_sat={:.4} f_sat={:.4} gain={:.4}",
            curve.a, curve.x_sat, curve.f_sat, input_gain
        );
        Ok(Self {
            config,
            sample_rate,
            curve,
            input_gain,
        })
    }

    /// The configuration this shaper was built from.
    pub fn config(&self) -> &JfetShaperConfig {
        &self.config
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Gain applied before the curve, fitted or configured.
    pub fn input_gain(&self) -> f64 {
        self.input_gain
    }

    /// Input level (before gain) at which the output saturates.
    pub fn saturation_input(&self) -> f64 {
        self.curve.x_sat / self.input_gain
    }

    #[inline]
    pub fn process_sample(&mut self, s: f64) -> f64 {
        self.curve.eval(self.input_gain * s)
    }

    /// Process a block of samples.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        for (x, y) in input.iter().zip(output.iter_mut()) {
            *y = self.curve.eval(self.input_gain * *x as f64) as f32;
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

    const FS: f64 = 48_000.0;

    fn stage() -> JfetStage {
        JfetStage::new(JfetConfig::default(), FS).unwrap()
    }

    #[test]
    fn test_quiescent_at_mid_supply() {
        let mut j = stage();
        assert_abs_diff_eq!(j.quiescent(), 4.5, epsilon = 1e-9);
        assert_eq!(j.process_sample(0.0), 0.0);
    }

    #[test]
    fn test_push_pull_symmetry() {
        let mut j = stage();
        for &s in &[0.05, 0.1, 0.5, 1.0, 2.0, 4.5] {
            let pos = j.process_sample(s);
            let neg = j.process_sample(-s);
            assert_abs_diff_eq!(pos, -neg, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_known_values() {
        let mut j = stage();
        assert_relative_eq!(j.process_sample(0.1), 0.135043, epsilon = 1e-5);
        assert_relative_eq!(j.process_sample(1.0), 0.616850, epsilon = 1e-5);
        assert_relative_eq!(j.process_sample(4.5), 0.996549, epsilon = 1e-5);
    }

    #[test]
    fn test_output_bounded() {
        let mut j = stage();
        for i in 0..=200 {
            let s = -20.0 + 0.2 * i as f64;
            let y = j.process_sample(s);
            assert!(y.abs() <= 1.0 + 1e-12, "y({}) = {}", s, y);
        }
    }

    #[test]
    fn test_solve_stays_on_rails() {
        let j = stage();
        for &vin in &[-50.0, -5.0, 0.0, 4.5, 9.0, 14.0, 50.0] {
            let v = j.solve(vin);
            assert!((0.0..=9.0).contains(&v));
        }
    }

    #[test]
    fn test_rails_follow_supply() {
        let config = JfetConfig {
            supply_voltage: 12.0,
            ..JfetConfig::default()
        };
        let j = JfetStage::new(config, FS).unwrap();
        assert_eq!(j.solve(-50.0), 12.0);
        assert_abs_diff_eq!(j.solve(50.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(j.quiescent(), 6.0, epsilon = 1e-9);

        let bad = JfetConfig {
            supply_voltage: 6.0,
            newton: NewtonConfig::default().with_rails(0.0, 9.0),
            ..JfetConfig::default()
        };
        assert!(JfetStage::new(bad, FS).is_err());
    }

    #[test]
    fn test_shaper_regions_are_continuous() {
        let curve = ShaperCurve::new(0.5, 0.3);
        let h = 1e-7;
        for &b in &[curve.knee, curve.x_sat] {
            assert_abs_diff_eq!(curve.eval(b - h), curve.eval(b + h), epsilon = 1e-6);
            let left = (curve.eval(b - h) - curve.eval(b - 2.0 * h)) / h;
            let right = (curve.eval(b + 2.0 * h) - curve.eval(b + h)) / h;
            assert_abs_diff_eq!(left, right, epsilon = 1e-5);
        }
        // slope 1 before the knee, flat past saturation
        assert_relative_eq!(curve.eval(0.2), 0.2 / curve.f_sat);
        assert_eq!(curve.eval(100.0), 1.0);
        assert_eq!(curve.eval(-100.0), -1.0);
    }

    #[test]
    fn test_shaper_agrees_with_solver() {
        let mut j = stage();
        let mut shaper = JfetShaper::fit(JfetShaperConfig::default(), &j).unwrap();
        for i in 0..=900 {
            let s = -4.5 + 0.01 * i as f64;
            let diff = (shaper.process_sample(s) - j.process_sample(s)).abs();
            assert!(diff < SHAPER_TOLERANCE, "diff {} at {}", diff, s);
        }
        assert_relative_eq!(shaper.input_gain(), 1.43, epsilon = 0.02);
    }

    #[test]
    fn test_shaper_saturates() {
        let mut shaper = JfetShaper::new(
            JfetShaperConfig {
                input_gain: Some(1.0),
                ..JfetShaperConfig::default()
            },
            FS,
        )
        .unwrap();
        assert_eq!(shaper.input_gain(), 1.0);
        let s_sat = shaper.saturation_input();
        assert_eq!(shaper.process_sample(s_sat * 2.0), 1.0);
        assert_eq!(shaper.process_sample(-1e9), -1.0);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let bad = JfetConfig {
            pinch_off: 0.0,
            ..JfetConfig::default()
        };
        assert!(JfetStage::new(bad, FS).is_err());
        let bad = JfetConfig {
            lambda: -0.1,
            ..JfetConfig::default()
        };
        assert!(JfetStage::new(bad, FS).is_err());
        let bad = JfetShaperConfig {
            knee: 1.0,
            ..JfetShaperConfig::default()
        };
        assert!(JfetShaper::new(bad, FS).is_err());
        let bad = JfetShaperConfig {
            gamma: 0.0,
            ..JfetShaperConfig::default()
        };
        assert!(JfetShaper::new(bad, FS).is_err());
    }
}
