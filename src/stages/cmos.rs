//! CMOS inverter stage.
//!
//! An unbuffered CMOS inverter run as a linear amplifier: the NMOS pulls the
//! output towards ground, the PMOS towards the supply, and the output settles
//! where their drain currents cancel. Each device is a three-region companion
//! model (cutoff, triode, saturation) whose threshold voltage and
//! transconductance are polynomial fits in `vgs`. The node equation
//! `i_n(vout) + i_p(vout) = 0` is solved with a fixed Newton budget.

use log::{debug, trace};

use super::{ParamUpdate, StageConfig};
use crate::dsl::ParamValue;
use crate::error::{require_finite, require_positive, Result};
use crate::solver::{NewtonConfig, NodeSolver};

/// Bisection steps used to locate the self-bias point.
const BIAS_BISECTION_STEPS: usize = 100;

/// N-channel fit: `Vt = vtc1 + vtc2·vgs`, `α = alpha1 + alpha2·vgs`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NmosFit {
    pub vtc1: f64,
    pub vtc2: f64,
    pub alpha1: f64,
    pub alpha2: f64,
}

impl Default for NmosFit {
    fn default() -> Self {
        Self {
            vtc1: 1.208306917691355,
            vtc2: 0.3139084341943607,
            alpha1: 0.020662094888127674,
            alpha2: -0.0017181795239085821,
        }
    }
}

impl NmosFit {
    /// Drain current and `∂i/∂vds`.
    #[inline]
    pub fn current(&self, vgs: f64, vds: f64) -> (f64, f64) {
        let vt = self.vtc2 * vgs + self.vtc1;
        let alpha = self.alpha2 * vgs + self.alpha1;
        let vov = vgs - vt;

        if vov <= 0.0 {
            (0.0, 0.0)
        } else if vds <= vov {
            (alpha * (vov - 0.5 * vds) * vds, alpha * (vov - vds))
        } else {
            (0.5 * alpha * vov * vov, 0.0)
        }
    }
}

/// P-channel fit: `Vt = vtc1 + vtc2·vgs`, cubic `α(vgs)`, and a
/// channel-length modulation factor `1 - δ·vds`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PmosFit {
    pub vtc1: f64,
    pub vtc2: f64,
    /// Coefficients of `α(vgs)` in ascending powers
    pub alpha: [f64; 4],
    pub delta: f64,
}

impl Default for PmosFit {
    fn default() -> Self {
        Self {
            vtc1: -0.25610349392710086,
            vtc2: 0.27051216771368214,
            alpha: [
                -0.0003577445606469842,
                -0.0008620153809796321,
                -0.00016848836814836602,
                -1.0800821774906936e-5,
            ],
            delta: 0.06,
        }
    }
}

impl PmosFit {
    /// Drain current and `∂i/∂vds` (both in the NMOS sign convention).
    #[inline]
    pub fn current(&self, vgs: f64, vds: f64) -> (f64, f64) {
        let [a1, a2, a3, a4] = self.alpha;
        let alpha = a1 + vgs * (a2 + vgs * (a3 + vgs * a4));
        let vt = self.vtc1 + self.vtc2 * vgs;
        let vov = vgs - vt;

        if vgs >= vt {
            return (0.0, 0.0);
        }

        let clm = 1.0 - self.delta * vds;
        if vds >= vov {
            let ids = -alpha * (vov - 0.5 * vds) * vds * clm;
            let gds = -alpha
                * (1.5 * self.delta * vds * vds - (2.0 * self.delta * vov + 1.0) * vds + vov);
            (ids, gds)
        } else {
            let vov2 = vov * vov;
            (-0.5 * alpha * vov2 * clm, 0.5 * alpha * self.delta * vov2)
        }
    }
}

/// Parameters for a CMOS inverter stage.
#[derive(Debug, Clone, PartialEq)]
pub struct CmosConfig {
    /// Supply voltage Vdd (V)
    pub supply_voltage: f64,
    /// Input bias point (V); the self-bias point when unset
    pub bias: Option<f64>,
    pub nmos: NmosFit,
    pub pmos: PmosFit,
    pub newton: NewtonConfig,
}

impl Default for CmosConfig {
    fn default() -> Self {
        Self {
            supply_voltage: 9.0,
            bias: None,
            nmos: NmosFit::default(),
            pmos: PmosFit::default(),
            newton: NewtonConfig::default(),
        }
    }
}

impl CmosConfig {
    /// Check physical constraints.
    pub fn validate(&self) -> Result<()> {
        require_positive("cmos", "supply voltage", self.supply_voltage)?;
        if let Some(bias) = self.bias {
            require_finite("cmos", "bias", bias)?;
        }
        require_finite("cmos", "pmos delta", self.pmos.delta)?;
        self.newton.validate("cmos", self.supply_voltage)
    }
}

impl StageConfig for CmosConfig {
    fn set_param(&mut self, key: &str, value: &ParamValue) -> ParamUpdate {
        match key {
            "vdd" => value.assign(&mut self.supply_voltage),
            "bias" => value.assign_some(&mut self.bias),
            "delta" => value.assign(&mut self.pmos.delta),
            "iterations" => value.assign_count(&mut self.newton.iterations),
            "rail_low" => value.assign_some(&mut self.newton.rail_low),
            "rail_high" => value.assign_some(&mut self.newton.rail_high),
            "epsilon" => value.assign(&mut self.newton.epsilon),
            _ => ParamUpdate::Unknown,
        }
    }
}

/// CMOS inverter gain stage.
#[derive(Debug, Clone)]
pub struct CmosStage {
    config: CmosConfig,
    sample_rate: f64,
    solver: NodeSolver,
    /// Resolved input bias point
    bias: f64,
    /// Output voltage at the bias point
    quiescent: f64,
    /// Maps output volts to normalized units
    output_scale: f64,
}

impl CmosStage {
    /// Create a stage and solve its operating point.
    pub fn new(config: CmosConfig, sample_rate: f64) -> Result<Self> {
        config.validate()?;
        super::validate_sample_rate(sample_rate)?;

        let mut stage = Self {
            solver: NodeSolver::new(&config.newton, config.supply_voltage),
            output_scale: 2.0 / config.supply_voltage,
            bias: 0.0,
            quiescent: 0.0,
            sample_rate,
            config,
        };
        stage.bias = match stage.config.bias {
            Some(bias) => bias,
            None => stage.self_bias_point(),
        };
        stage.quiescent = stage.solve(stage.bias);

        debug!(
            "cmos stage: vdd={} V bias={:.6} V quiescent={:.6} V iterations={}",
            stage.config.supply_voltage,
            stage.bias,
            stage.quiescent,
            stage.config.newton.iterations
        );
        if (stage.quiescent - stage.bias).abs() > 1e-3 {
            trace!(
                "cmos bias {:.6} V is not self-consistent (vout = {:.6} V)",
                stage.bias,
                stage.quiescent
            );
        }
        Ok(stage)
    }

    /// The configuration this stage was built from.
    pub fn config(&self) -> &CmosConfig {
        &self.config
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Input bias point in volts, resolved at construction.
    pub fn bias(&self) -> f64 {
        self.bias
    }

    /// Output voltage at the bias point.
    pub fn quiescent(&self) -> f64 {
        self.quiescent
    }

    /// Sum of drain currents into the output node and its derivative.
    #[inline]
    fn node_current(&self, vin: f64, vout: f64) -> (f64, f64) {
        let vdd = self.config.supply_voltage;
        let (i_n, g_n) = self.config.nmos.current(vin, vout);
        let (i_p, g_p) = self.config.pmos.current(vin - vdd, vout - vdd);
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

    /// Input voltage at which the inverter output equals its input.
    pub fn self_bias_point(&self) -> f64 {
        let (mut lo, mut hi) = self.solver.rails();
        for _ in 0..BIAS_BISECTION_STEPS {
            let mid = 0.5 * (lo + hi);
            if self.solve(mid) > mid {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        0.5 * (lo + hi)
    }

    /// Process one AC-coupled sample. The output is inverted, normalized so
    /// a full rail swing spans ±1 about the quiescent point.
    #[inline]
    pub fn process_sample(&mut self, s: f64) -> f64 {
        self.transfer(s)
    }

    #[inline]
    fn transfer(&self, s: f64) -> f64 {
        (self.quiescent - self.solve(s + self.bias)) * self.output_scale
    }

    /// Process a block of samples.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        for (x, y) in input.iter().zip(output.iter_mut()) {
            *y = self.transfer(*x as f64) as f32;
        }
    }

    /// No sample-to-sample state; kept for a uniform stage interface.
    pub fn reset(&mut self) {}

    /// Change the sample rate; the transfer curve does not depend on it.
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<()> {
        super::validate_sample_rate(sample_rate)?;
        self.sample_rate = sample_rate;
        Ok(())
    }
}

/// Input range covered by [`CmosTable`] (relative to the bias point).
pub const TABLE_INPUT_MIN: f64 = -1.8;
pub const TABLE_INPUT_MAX: f64 = 5.1;
const TABLE_NEGATIVE_NODES: usize = 4096;
const TABLE_POSITIVE_NODES: usize = 8192;

/// Precomputed [`CmosStage`] transfer curve.
///
/// Nodes are spaced quadratically away from zero so the steep region around
/// the bias point is sampled densely. Lookups interpolate linearly and clamp
/// inputs to `[TABLE_INPUT_MIN, TABLE_INPUT_MAX]`.
#[derive(Debug, Clone)]
pub struct CmosTable {
    stage: CmosStage,
    table: Vec<f64>,
}

impl CmosTable {
    /// Build the stage and tabulate it.
    pub fn new(config: CmosConfig, sample_rate: f64) -> Result<Self> {
        Ok(Self::from_stage(CmosStage::new(config, sample_rate)?))
    }

    /// Tabulate an existing stage.
    pub fn from_stage(stage: CmosStage) -> Self {
        let neg_last = (TABLE_NEGATIVE_NODES - 1) as f64;
        let pos_last = (TABLE_POSITIVE_NODES - 1) as f64;

        let mut table = Vec::with_capacity(TABLE_NEGATIVE_NODES + TABLE_POSITIVE_NODES - 1);
        for i in 0..TABLE_NEGATIVE_NODES - 1 {
            let t = 1.0 - i as f64 / neg_last;
            table.push(stage.transfer(TABLE_INPUT_MIN * t * t));
        }
        table.push(0.0);
        for j in 1..TABLE_POSITIVE_NODES {
            let t = j as f64 / pos_last;
            table.push(stage.transfer(TABLE_INPUT_MAX * t * t));
        }

        debug!("cmos table: {} nodes over [{}, {}]", table.len(), TABLE_INPUT_MIN, TABLE_INPUT_MAX);
        Self { stage, table }
    }

    /// The stage behind the table.
    pub fn stage(&self) -> &CmosStage {
        &self.stage
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Interpolated transfer value.
    #[inline]
    pub fn lookup(&self, s: f64) -> f64 {
        let neg_last = (TABLE_NEGATIVE_NODES - 1) as f64;
        let pos_last = (TABLE_POSITIVE_NODES - 1) as f64;
        let last = (self.table.len() - 1) as f64;
        if s.is_nan() {
            return 0.0;
        }

        let idx = if s < 0.0 {
            neg_last * (1.0 - (s / TABLE_INPUT_MIN).min(1.0).sqrt())
        } else {
            neg_last + pos_last * (s / TABLE_INPUT_MAX).min(1.0).sqrt()
        };
        let idx = idx.clamp(0.0, last);

        let i0 = idx as usize;
        let i1 = (i0 + 1).min(self.table.len() - 1);
        let t = idx - i0 as f64;
        let (y0, y1) = (self.table[i0], self.table[i1]);
        y0 + (y1 - y0) * t
    }

    #[inline]
    pub fn process_sample(&mut self, s: f64) -> f64 {
        self.lookup(s)
    }

    /// Process a block of samples.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        for (x, y) in input.iter().zip(output.iter_mut()) {
            *y = self.lookup(*x as f64) as f32;
        }
    }

    /// Stateless; kept for a uniform stage interface.
    pub fn reset(&mut self) {}

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.stage.sample_rate()
    }

    /// Change the sample rate; the table is left as built.
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<()> {
        self.stage.set_sample_rate(sample_rate)
    }
}
