//! Audio I/O for the CLI frontend.
//!
//! Reads raw mono `f32` little-endian PCM and writes the same format.

use std::io::{self, Read, Write};

use log::debug;

use crate::chain::Chain;
use crate::error::{Result, StageError};

/// Default block size for audio processing (in samples).
pub const BUFFER_SIZE: usize = 256;

const BYTES_PER_SAMPLE: usize = 4;

/// Raw PCM reader.
pub struct AudioInput<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl AudioInput<io::Stdin> {
    /// Read from stdin.
    pub fn stdin() -> Self {
        Self::new(io::stdin())
    }
}

impl<R: Read> AudioInput<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: vec![0u8; BUFFER_SIZE * BYTES_PER_SAMPLE],
        }
    }

    /// Fill `samples` from the stream.
    ///
    /// Returns the number of samples read; fewer than requested only at end
    /// of stream, and 0 once it is exhausted. A trailing partial sample is
    /// dropped.
    pub fn read_block(&mut self, samples: &mut [f32]) -> Result<usize> {
        let bytes_wanted = samples.len() * BYTES_PER_SAMPLE;
        if self.buffer.len() < bytes_wanted {
            self.buffer.resize(bytes_wanted, 0);
        }
        let buffer = &mut self.buffer[..bytes_wanted];

        let mut filled = 0;
        while filled < bytes_wanted {
            match self.reader.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(StageError::AudioInputError {
                        message: e.to_string(),
                    })
                }
            }
        }

        let samples_read = filled / BYTES_PER_SAMPLE;
        for (sample, bytes) in samples
            .iter_mut()
            .zip(buffer[..samples_read * BYTES_PER_SAMPLE].chunks_exact(BYTES_PER_SAMPLE))
        {
            *sample = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }

        Ok(samples_read)
    }
}

/// Raw PCM writer.
pub struct AudioOutput<W> {
    writer: W,
    buffer: Vec<u8>,
}

impl AudioOutput<io::Stdout> {
    /// Write to stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> AudioOutput<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: Vec::with_capacity(BUFFER_SIZE * BYTES_PER_SAMPLE),
        }
    }

    /// Write a block of samples.
    pub fn write_block(&mut self, samples: &[f32]) -> Result<()> {
        self.buffer.clear();
        for sample in samples {
            self.buffer.extend_from_slice(&sample.to_le_bytes());
        }

        self.writer
            .write_all(&self.buffer)
            .map_err(|e| StageError::AudioOutputError {
                message: e.to_string(),
            })
    }

    /// Flush the output stream.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| StageError::AudioOutputError {
            message: e.to_string(),
        })
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Stream `input` through `chain` into `output`, `block_size` samples at a
/// time. Returns the number of samples processed.
pub fn process_stream<R: Read, W: Write>(
    chain: &mut Chain,
    input: &mut AudioInput<R>,
    output: &mut AudioOutput<W>,
    block_size: usize,
) -> Result<usize> {
    let block_size = block_size.max(1);
    let mut in_samples = vec![0.0f32; block_size];
    let mut out_samples = vec![0.0f32; block_size];
    let mut total = 0;

    loop {
        let samples_read = input.read_block(&mut in_samples)?;
        if samples_read == 0 {
            break;
        }

        chain.process_block(&in_samples[..samples_read], &mut out_samples[..samples_read]);
        output.write_block(&out_samples[..samples_read])?;
        total += samples_read;
    }

    output.flush()?;
    Ok(total)
}

/// Process audio from stdin to stdout.
pub fn process_audio(chain: &mut Chain, block_size: usize) -> Result<()> {
    let mut input = AudioInput::stdin();
    let mut output = AudioOutput::stdout();
    let total = process_stream(chain, &mut input, &mut output, block_size)?;
    debug!(
        "processed {} samples ({:.2} s)",
        total,
        total as f64 / chain.sample_rate()
    );
    Ok(())
}
