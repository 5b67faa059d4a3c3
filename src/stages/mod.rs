//! Nonlinear stage models.
//!
//! Every stage follows the same lifecycle: build it once from a
//! configuration and a sample rate (deriving all discretization constants),
//! then feed it samples in order. Stages are plain values; none of them
//! allocates, logs or fails while processing.
//!
//! - [`DiodeClipper`]: diode pair against a capacitor, solved with omega
//! - [`BjtStage`]: common-collector transistor, closed form plus tanh ceiling
//! - [`CmosStage`] / [`CmosTable`]: inverter solved by Newton, or tabulated
//! - [`JfetStage`] / [`JfetShaper`]: push-pull JFETs, or a fitted closed form
//! - [`OpAmpClipper`]: output stage pushed into its rails
//! - [`TriodeStage`]: common-cathode tube as a wave digital filter
//!
//! [`Stage`] wraps all of them behind one interface for chains.

mod bjt;
mod cmos;
mod diode;
mod jfet;
mod opamp;
mod triode;

pub use bjt::{BjtConfig, BjtStage};
pub use cmos::{CmosConfig, CmosStage, CmosTable, NmosFit, PmosFit, TABLE_INPUT_MAX, TABLE_INPUT_MIN};
pub use diode::{ClipSide, DiodeClipper, DiodeConfig};
pub use jfet::{JfetConfig, JfetShaper, JfetShaperConfig, JfetStage, SHAPER_TOLERANCE};
pub use opamp::{OpAmpClipper, OpAmpConfig};
pub use triode::{TriodeConfig, TriodeStage};

use std::collections::HashMap;

use log::trace;

use crate::dsl::{ModelDef, ParamValue, StageDef, StageKind};
use crate::error::{require_positive, Result, StageError};

/// Outcome of applying one `key=value` pair to a configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamUpdate {
    Applied,
    /// The configuration has no such key
    Unknown,
    /// The key exists but the value has the wrong shape
    Invalid(String),
}

/// A stage configuration that can be built from a description.
pub trait StageConfig: Default + Sized {
    /// Named built-in parameter set, usable in place of a model.
    fn preset(_name: &str) -> Option<Self> {
        None
    }

    /// Apply one parameter.
    fn set_param(&mut self, key: &str, value: &ParamValue) -> ParamUpdate;
}

impl ParamValue {
    /// Store a numeric value.
    pub(crate) fn assign(&self, slot: &mut f64) -> ParamUpdate {
        match self.as_number() {
            Some(v) => {
                *slot = v;
                ParamUpdate::Applied
            }
            None => ParamUpdate::Invalid(format!("expected a number, got '{}'", self)),
        }
    }

    /// Store a numeric value into an optional override.
    pub(crate) fn assign_some(&self, slot: &mut Option<f64>) -> ParamUpdate {
        let mut v = 0.0;
        let update = self.assign(&mut v);
        if update == ParamUpdate::Applied {
            *slot = Some(v);
        }
        update
    }

    /// Store a non-negative whole number.
    pub(crate) fn assign_count(&self, slot: &mut usize) -> ParamUpdate {
        match self.as_number() {
            Some(v) if v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 => {
                *slot = v as usize;
                ParamUpdate::Applied
            }
            _ => ParamUpdate::Invalid(format!("expected a whole number, got '{}'", self)),
        }
    }
}

/// Reject sample rates that are not positive and finite.
pub(crate) fn validate_sample_rate(sample_rate: f64) -> Result<()> {
    require_positive("stage", "sample rate", sample_rate)
}

/// Any stage, with a uniform processing interface.
#[derive(Debug, Clone)]
pub enum Stage {
    Diode(DiodeClipper),
    Bjt(BjtStage),
    Cmos(CmosStage),
    CmosTable(CmosTable),
    Jfet(JfetStage),
    Shaper(JfetShaper),
    OpAmp(OpAmpClipper),
    Triode(TriodeStage),
}

macro_rules! each_stage {
    ($self:expr, $s:ident => $body:expr) => {
        match $self {
            Stage::Diode($s) => $body,
            Stage::Bjt($s) => $body,
            Stage::Cmos($s) => $body,
            Stage::CmosTable($s) => $body,
            Stage::Jfet($s) => $body,
            Stage::Shaper($s) => $body,
            Stage::OpAmp($s) => $body,
            Stage::Triode($s) => $body,
        }
    };
}

impl Stage {
    /// Build a stage from its description.
    ///
    /// The configuration starts from the stage's defaults (or a built-in
    /// preset named in place of a model), then takes the referenced model's
    /// parameters, then the stage's own.
    pub fn from_def(
        def: &StageDef,
        models: &HashMap<String, ModelDef>,
        sample_rate: f64,
    ) -> Result<Self> {
        let stage = match def.kind {
            StageKind::Diode => Stage::Diode(DiodeClipper::new(configure(def, models)?, sample_rate)?),
            StageKind::Bjt => Stage::Bjt(BjtStage::new(configure(def, models)?, sample_rate)?),
            StageKind::Cmos => Stage::Cmos(CmosStage::new(configure(def, models)?, sample_rate)?),
            StageKind::CmosTable => {
                Stage::CmosTable(CmosTable::new(configure(def, models)?, sample_rate)?)
            }
            StageKind::Jfet => Stage::Jfet(JfetStage::new(configure(def, models)?, sample_rate)?),
            StageKind::Shaper => {
                Stage::Shaper(JfetShaper::new(configure(def, models)?, sample_rate)?)
            }
            StageKind::OpAmp => {
                Stage::OpAmp(OpAmpClipper::new(configure(def, models)?, sample_rate)?)
            }
            StageKind::Triode => {
                Stage::Triode(TriodeStage::new(configure(def, models)?, sample_rate)?)
            }
        };
        Ok(stage)
    }

    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Diode(_) => StageKind::Diode,
            Stage::Bjt(_) => StageKind::Bjt,
            Stage::Cmos(_) => StageKind::Cmos,
            Stage::CmosTable(_) => StageKind::CmosTable,
            Stage::Jfet(_) => StageKind::Jfet,
            Stage::Shaper(_) => StageKind::Shaper,
            Stage::OpAmp(_) => StageKind::OpAmp,
            Stage::Triode(_) => StageKind::Triode,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        each_stage!(self, s => s.sample_rate())
    }

    #[inline]
    pub fn process_sample(&mut self, x: f64) -> f64 {
        each_stage!(self, s => s.process_sample(x))
    }

    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        each_stage!(self, s => s.process_block(input, output))
    }

    pub fn reset(&mut self) {
        each_stage!(self, s => s.reset())
    }

    /// Rebuild for a new sample rate. On error the stage is unchanged.
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<()> {
        each_stage!(self, s => s.set_sample_rate(sample_rate))
    }
}

fn configure<C: StageConfig>(def: &StageDef, models: &HashMap<String, ModelDef>) -> Result<C> {
    let mut config = C::default();

    if let Some(name) = &def.model_ref {
        match models.get(name) {
            Some(model) => {
                if model.kind != def.kind.model_kind() {
                    return Err(StageError::ModelKindMismatch {
                        model: name.clone(),
                        model_kind: model.kind.to_string(),
                        stage: def.name.clone(),
                        stage_kind: def.kind.to_string(),
                    });
                }
                apply_params(&mut config, def, &model.params)?;
            }
            None => {
                config = C::preset(name).ok_or_else(|| StageError::UndefinedModel {
                    model: name.clone(),
                    stage: def.name.clone(),
                })?;
            }
        }
    }

    apply_params(&mut config, def, &def.params)?;
    Ok(config)
}

fn apply_params<C: StageConfig>(
    config: &mut C,
    def: &StageDef,
    params: &[(String, ParamValue)],
) -> Result<()> {
    for (key, value) in params {
        match config.set_param(key, value) {
            ParamUpdate::Applied => trace!("{} {}: {} = {}", def.kind, def.name, key, value),
            ParamUpdate::Unknown => {
                return Err(StageError::UnknownParameter {
                    stage: def.name.clone(),
                    kind: def.kind.to_string(),
                    param: key.clone(),
                })
            }
            ParamUpdate::Invalid(message) => {
                return Err(StageError::InvalidParameter {
                    stage: def.name.clone(),
                    param: key.clone(),
                    message,
                })
            }
        }
    }
    Ok(())
}
