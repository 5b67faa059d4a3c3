//! Series composition of stages.
//!
//! A [`Chain`] owns its stages in signal order and feeds every sample
//! through all of them before taking the next, so block boundaries never
//! change the output.

mod validate;

pub use validate::validate_chain;

use log::info;

use crate::dsl::{self, ChainAst};
use crate::error::Result;
use crate::stages::Stage;

/// A stage with the name it was given in the description.
#[derive(Debug, Clone)]
pub struct NamedStage {
    pub name: String,
    pub stage: Stage,
}

/// An ordered, validated chain of stages at one sample rate.
#[derive(Debug, Clone)]
pub struct Chain {
    stages: Vec<NamedStage>,
    sample_rate: f64,
}

impl Chain {
    /// Build a chain from a parsed description.
    pub fn from_ast(ast: ChainAst, sample_rate: f64) -> Result<Self> {
        validate_chain(&ast, sample_rate)?;

        let stages = ast
            .stages
            .iter()
            .map(|def| {
                Ok(NamedStage {
                    name: def.name.clone(),
                    stage: Stage::from_def(def, &ast.models, sample_rate)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let chain = Self {
            stages,
            sample_rate,
        };
        info!(
            "built chain at {} Hz: {}",
            sample_rate,
            chain.names().collect::<Vec<_>>().join(" -> ")
        );
        Ok(chain)
    }

    /// Parse and build a chain in one step.
    pub fn parse(description: &str, sample_rate: f64) -> Result<Self> {
        Self::from_ast(dsl::parse(description)?, sample_rate)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Number of stages (never zero).
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in signal order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.name.as_str())
    }

    pub fn stages(&self) -> &[NamedStage] {
        &self.stages
    }

    /// Look up a stage by name.
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name).map(|s| &s.stage)
    }

    /// Run one sample through every stage.
    #[inline]
    pub fn process_sample(&mut self, x: f64) -> f64 {
        self.stages
            .iter_mut()
            .fold(x, |acc, s| s.stage.process_sample(acc))
    }

    /// Process a block of samples.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        for (x, y) in input.iter().zip(output.iter_mut()) {
            *y = self.process_sample(*x as f64) as f32;
        }
    }

    /// Return every stage to its initial state.
    pub fn reset(&mut self) {
        for s in &mut self.stages {
            s.stage.reset();
        }
    }

    /// Rebuild every stage for a new sample rate, or none of them.
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<()> {
        let mut rebuilt = self.stages.clone();
        for s in &mut rebuilt {
            s.stage.set_sample_rate(sample_rate)?;
        }
        self.stages = rebuilt;
        self.sample_rate = sample_rate;
        info!("chain sample rate set to {} Hz", sample_rate);
        Ok(())
    }
}
