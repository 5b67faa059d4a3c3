//! stages - run audio through a chain of analog stage models.
//!
//! # Usage
//!
//! ```bash
//! ffmpeg -i input.wav -f f32le -ac 1 -ar 48000 - | stages fuzz.stg | ffmpeg -f f32le -ac 1 -ar 48000 -i - output.wav
//! ```
//!
//! Set `RUST_LOG=debug` to see the constants each stage derives.

use std::path::PathBuf;

use clap::Parser;
use log::info;

use analog_stages::{
    audio::{process_audio, BUFFER_SIZE},
    dsl,
    error::Result,
    Chain, DEFAULT_SAMPLE_RATE,
};

/// Analog stage chain processor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the chain description file
    #[arg(value_name = "CHAIN_FILE")]
    chain_file: PathBuf,

    /// Sample rate in Hz
    #[arg(short, long, default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: f32,

    /// Samples per processing block
    #[arg(short, long, default_value_t = BUFFER_SIZE)]
    block_size: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let ast = dsl::parse_file(&args.chain_file)?;
    let mut chain = Chain::from_ast(ast, args.sample_rate as f64)?;
    info!(
        "processing {} through {} stages",
        args.chain_file.display(),
        chain.len()
    );

    process_audio(&mut chain, args.block_size)?;

    Ok(())
}
