//! Error types for the analog stage library.
//!
//! This module provides a unified error type [`StageError`] covering
//! chain-description parsing, stage configuration and audio I/O. Per-sample
//! processing never fails, so every variant here is raised at construction
//! or at the I/O boundary.

use thiserror::Error;

/// Result type alias using [`StageError`].
pub type Result<T> = std::result::Result<T, StageError>;

/// Unified error type for all stage operations.
#[derive(Error, Debug)]
pub enum StageError {
    // ============ DSL Parsing Errors ============
    /// Error during lexical analysis
    #[error("Lexer error at line {line}, column {column}: {message}")]
    LexerError {
        line: usize,
        column: usize,
        message: String,
    },

    /// Error during parsing
    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    /// Unknown stage kind
    #[error("Unknown stage kind '{kind}' at line {line}")]
    UnknownStageKind { kind: String, line: usize },

    /// Parameter not understood by a stage
    #[error("Unknown parameter '{param}' for {kind} stage '{stage}'")]
    UnknownParameter {
        stage: String,
        kind: String,
        param: String,
    },

    /// Invalid parameter value
    #[error("Invalid parameter '{param}' for stage '{stage}': {message}")]
    InvalidParameter {
        stage: String,
        param: String,
        message: String,
    },

    /// Undefined model reference
    #[error("Undefined model '{model}' referenced by stage '{stage}'")]
    UndefinedModel { model: String, stage: String },

    /// Model used by a stage of a different kind
    #[error("Model '{model}' is a {model_kind} model but stage '{stage}' is a {stage_kind}")]
    ModelKindMismatch {
        model: String,
        model_kind: String,
        stage: String,
        stage_kind: String,
    },

    /// Duplicate stage name
    #[error("Duplicate stage name '{name}'")]
    DuplicateStage { name: String },

    /// Duplicate model name
    #[error("Duplicate model name '{name}'")]
    DuplicateModel { name: String },

    // ============ Configuration Errors ============
    /// A stage configuration violates a physical constraint
    #[error("Invalid {stage} configuration: {message}")]
    InvalidConfig { stage: &'static str, message: String },

    /// A chain with no stages
    #[error("Stage chain is empty")]
    EmptyChain,

    // ============ I/O Errors ============
    /// Error reading chain file
    #[error("Failed to read chain file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Error reading audio input
    #[error("Audio input error: {message}")]
    AudioInputError { message: String },

    /// Error writing audio output
    #[error("Audio output error: {message}")]
    AudioOutputError { message: String },

    // ============ WASM Errors ============
    /// WASM-specific error
    #[cfg(feature = "wasm")]
    #[error("WASM error: {message}")]
    WasmError { message: String },
}

impl StageError {
    /// Create a lexer error
    pub fn lexer(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::LexerError {
            line,
            column,
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::ParseError {
            line,
            message: message.into(),
        }
    }

    /// Create a configuration error for the named stage type
    pub fn config(stage: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            stage,
            message: message.into(),
        }
    }
}

/// Reject values that are not strictly positive and finite.
pub(crate) fn require_positive(stage: &'static str, name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(StageError::config(
            stage,
            format!("{} must be positive and finite, got {}", name, value),
        ))
    }
}

/// Reject values that are not finite.
pub(crate) fn require_finite(stage: &'static str, name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(StageError::config(
            stage,
            format!("{} must be finite, got {}", name, value),
        ))
    }
}
