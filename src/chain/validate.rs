//! Chain validation.

use std::collections::HashSet;

use log::warn;

use crate::dsl::ChainAst;
use crate::error::{Result, StageError};
use crate::stages::validate_sample_rate;

/// Validate a parsed chain before any stage is built.
///
/// Checks:
/// - The chain has at least one stage
/// - Stage names are unique
/// - The sample rate is positive and finite
///
/// Model references and parameters are checked when each stage is built.
pub fn validate_chain(ast: &ChainAst, sample_rate: f64) -> Result<()> {
    if ast.stages.is_empty() {
        return Err(StageError::EmptyChain);
    }

    let mut names = HashSet::with_capacity(ast.stages.len());
    for stage in &ast.stages {
        if !names.insert(stage.name.as_str()) {
            return Err(StageError::DuplicateStage {
                name: stage.name.clone(),
            });
        }
    }

    validate_sample_rate(sample_rate)?;

    for model in ast.models.values() {
        let used = ast
            .stages
            .iter()
            .any(|s| s.model_ref.as_deref() == Some(model.name.as_str()));
        if !used {
            warn!("model '{}' (line {}) is never used", model.name, model.line);
        }
    }

    Ok(())
}
