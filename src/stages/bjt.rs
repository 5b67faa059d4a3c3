//! Common-collector bipolar stage.
//!
//! With the collector tied to the supply `Vp`, the Ebers-Moll emitter
//! equation for an emitter resistor `Re` reduces to
//!
//! ```text
//!   v_x = Is·Re·(exp((v - Vp)/Vt) + 1/βf)
//!   y   = Vt·ω((v + v_x)/Vt + k) - v_x,   k = ln((Is·Re/Vt)·(1 + 1/βf))
//! ```
//!
//! which is valid up to the point where the base-collector junction takes
//! over. Past `saturation_voltage` the curve continues as a tanh that meets
//! the closed form with matching value and slope and approaches `Vp`.

use log::debug;

use super::{ParamUpdate, StageConfig};
use crate::dsl::ParamValue;
use crate::error::{require_finite, require_positive, Result, StageError};
use crate::solver::{central_difference, wright_omega};

/// Step of the finite difference taken at the saturation point.
const SLOPE_STEP: f64 = 1e-4;

/// Parameters for a bipolar stage.
#[derive(Debug, Clone, PartialEq)]
pub struct BjtConfig {
    /// Supply voltage Vp (V)
    pub supply_voltage: f64,
    /// Thermal voltage (V)
    pub thermal_voltage: f64,
    /// Saturation current Is (A)
    pub saturation_current: f64,
    /// Forward current gain βf
    pub beta_f: f64,
    /// Emitter resistance (Ω)
    pub emitter_resistance: f64,
    /// Input bias point; half the supply when unset
    pub bias: Option<f64>,
    /// Start of the tanh extension; `supply + 0.8` when unset
    pub saturation_voltage: Option<f64>,
}

impl Default for BjtConfig {
    fn default() -> Self {
        Self {
            supply_voltage: 9.0,
            thermal_voltage: 0.026,
            saturation_current: 0.1e-15,
            beta_f: 100.0,
            emitter_resistance: 1000.0,
            bias: None,
            saturation_voltage: None,
        }
    }
}

impl BjtConfig {
    pub fn bias(&self) -> f64 {
        self.bias.unwrap_or(0.5 * self.supply_voltage)
    }

    pub fn saturation_voltage(&self) -> f64 {
        self.saturation_voltage.unwrap_or(self.supply_voltage + 0.8)
    }

    /// Check physical constraints.
    pub fn validate(&self) -> Result<()> {
        require_positive("bjt", "supply voltage", self.supply_voltage)?;
        require_positive("bjt", "thermal voltage", self.thermal_voltage)?;
        require_positive("bjt", "saturation current", self.saturation_current)?;
        require_positive("bjt", "forward gain", self.beta_f)?;
        require_positive("bjt", "emitter resistance", self.emitter_resistance)?;
        require_finite("bjt", "bias", self.bias())?;
        require_finite("bjt", "saturation voltage", self.saturation_voltage())
    }
}

impl StageConfig for BjtConfig {
    fn set_param(&mut self, key: &str, value: &ParamValue) -> ParamUpdate {
        match key {
            "vp" | "vcc" => value.assign(&mut self.supply_voltage),
            "vt" => value.assign(&mut self.thermal_voltage),
            "is" => value.assign(&mut self.saturation_current),
            "bf" => value.assign(&mut self.beta_f),
            "re" => value.assign(&mut self.emitter_resistance),
            "bias" => value.assign_some(&mut self.bias),
            "vsat" => value.assign_some(&mut self.saturation_voltage),
            _ => ParamUpdate::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BjtCoefficients {
    vp: f64,
    vt: f64,
    is_re: f64,
    inv_beta: f64,
    k: f64,
    bias: f64,
    v_sat: f64,
    y_sat: f64,
    /// tanh argument scale, y'(v_sat) / (Vp - y_sat)
    alpha: f64,
    quiescent: f64,
}

impl BjtCoefficients {
    fn new(config: &BjtConfig) -> Result<Self> {
        let vt = config.thermal_voltage;
        let is_re = config.saturation_current * config.emitter_resistance;
        let inv_beta = 1.0 / config.beta_f;

        let mut coeffs = Self {
            vp: config.supply_voltage,
            vt,
            is_re,
            inv_beta,
            k: ((is_re / vt) * (1.0 + inv_beta)).ln(),
            bias: config.bias(),
            v_sat: config.saturation_voltage(),
            y_sat: 0.0,
            alpha: 0.0,
            quiescent: 0.0,
        };

        coeffs.y_sat = coeffs.closed_form(coeffs.v_sat);
        let slope = central_difference(|v| coeffs.closed_form(v), coeffs.v_sat, SLOPE_STEP);
        let headroom = coeffs.vp - coeffs.y_sat;

        if !(headroom > 0.0 && slope.is_finite() && slope > 0.0) {
            return Err(StageError::config(
                "bjt",
                format!(
                    "saturation voltage {} V leaves no room for the extension \
                     (y = {:.6} V, slope = {:.6})",
                    coeffs.v_sat, coeffs.y_sat, slope
                ),
            ));
        }
        coeffs.alpha = slope / headroom;
        coeffs.quiescent = coeffs.transfer(coeffs.bias);
        Ok(coeffs)
    }

    #[inline]
    fn closed_form(&self, v: f64) -> f64 {
        let v_x = self.is_re * (((v - self.vp) / self.vt).exp() + self.inv_beta);
        self.vt * wright_omega((v + v_x) / self.vt + self.k) - v_x
    }

    #[inline]
    fn transfer(&self, v: f64) -> f64 {
        if v < self.v_sat {
            self.closed_form(v)
        } else {
            self.y_sat + (self.vp - self.y_sat) * (self.alpha * (v - self.v_sat)).tanh()
        }
    }
}

/// Bipolar gain stage.
#[derive(Debug, Clone)]
pub struct BjtStage {
    config: BjtConfig,
    sample_rate: f64,
    coeffs: BjtCoefficients,
}

impl BjtStage {
    /// Create a stage and derive its operating point.
    pub fn new(config: BjtConfig, sample_rate: f64) -> Result<Self> {
        config.validate()?;
        super::validate_sample_rate(sample_rate)?;
        let coeffs = BjtCoefficients::new(&config)?;
        debug!(
            "bjt stage: k={:.4} y_sat={:.5} alpha={:.5} quiescent={:.5}",
            coeffs.k, coeffs.y_sat, coeffs.alpha, coeffs.quiescent
        );
        Ok(Self {
            config,
            sample_rate,
            coeffs,
        })
    }

    /// The configuration this stage was built from.
    pub fn config(&self) -> &BjtConfig {
        &self.config
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Emitter voltage for an absolute base voltage.
    pub fn transfer(&self, v: f64) -> f64 {
        self.coeffs.transfer(v)
    }

    /// Emitter voltage at the bias point.
    pub fn quiescent(&self) -> f64 {
        self.coeffs.quiescent
    }

    /// Process one AC-coupled sample: biased in, quiescent level removed out.
    #[inline]
    pub fn process_sample(&mut self, s: f64) -> f64 {
        self.coeffs.transfer(s + self.coeffs.bias) - self.coeffs.quiescent
    }

    /// Process a block of samples.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        for (x, y) in input.iter().zip(output.iter_mut()) {
            *y = self.process_sample(*x as f64) as f32;
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
