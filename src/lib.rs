//! # Analog Stages
//!
//! Per-sample models of the nonlinear stages found in guitar effects:
//! diode clippers, transistor and FET gain stages, op-amp rail clipping and
//! a triode preamp.
//!
//! This library provides:
//! - Closed-form junction solutions through the Wright omega function
//! - Fixed-budget Newton solvers for push-pull CMOS and JFET stages
//! - A wave digital filter triode with its DC operating point
//! - A small text language for describing stage chains
//!
//! ## Architecture
//!
//! - [`solver`] - Wright omega and the clamped single-node Newton solver
//! - [`stages`] - The stage models and the [`Stage`] dispatch enum
//! - [`chain`] - Series composition of stages
//! - [`dsl`] - Parser for the chain description language
//! - [`audio`] - Raw PCM I/O (CLI only)
//!
//! ## Usage
//!
//! ### Library
//!
//! ```no_run
//! use analog_stages::stages::{DiodeClipper, DiodeConfig};
//!
//! let mut clipper = DiodeClipper::new(DiodeConfig::germanium(), 48_000.0)?;
//! let y = clipper.process_sample(0.5);
//! # Ok::<(), analog_stages::StageError>(())
//! ```
//!
//! ### Native CLI
//!
//! ```bash
//! ffmpeg -i input.wav -f f32le -ac 1 -ar 48000 - | stages fuzz.stg | ffmpeg -f f32le -ac 1 -ar 48000 -i - output.wav
//! ```
//!
//! ### WASM
//!
//! ```javascript
//! import { WasmStageChain } from 'analog_stages';
//!
//! const chain = new WasmStageChain(description, 48000);
//! chain.process_block(inputBuffer, outputBuffer);
//! ```
//!
//! ## Processing model
//!
//! Each stage is built once from a configuration and a sample rate; every
//! constant the per-sample path needs is derived then. Processing is
//! single-threaded, allocation-free and infallible: iteration counts are
//! fixed, Newton steps are clamped to the supply rails, and out-of-range
//! inputs hit saturation curves instead of errors.

pub mod chain;
pub mod dsl;
pub mod error;
pub mod solver;
pub mod stages;

#[cfg(feature = "cli")]
pub mod audio;

// Re-export main types for convenience
pub use chain::Chain;
pub use error::{Result, StageError};
pub use stages::Stage;

// WASM bindings
#[cfg(feature = "wasm")]
mod wasm;

#[cfg(feature = "wasm")]
pub use wasm::WasmStageChain;

/// Default sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: f32 = 48000.0;
