//! WASM bindings.
//!
//! JavaScript-friendly wrapper around [`Chain`] for use in an AudioWorklet.
//!
//! ## Usage (JavaScript)
//!
//! ```javascript
//! import init, { WasmStageChain } from 'analog_stages';
//!
//! await init();
//!
//! const chain = new WasmStageChain(`
//!   .model GE diode (c=50n re=500 is=5u)
//!   bjt    Q1
//!   diode  D1 GE
//! `, 48000);
//!
//! // In AudioWorkletProcessor.process():
//! chain.process_block(inputs[0][0], outputs[0][0]);
//! ```

use wasm_bindgen::prelude::*;

use crate::chain::Chain;
use crate::error::StageError;

/// Initialize panic hook for better error messages in browser console.
#[wasm_bindgen(start)]
pub fn init_panic_hook() {
    console_error_panic_hook::set_once();
}

fn to_js(err: StageError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// WASM-compatible stage chain.
#[wasm_bindgen]
pub struct WasmStageChain {
    chain: Chain,
}

#[wasm_bindgen]
impl WasmStageChain {
    /// Build a chain from its description.
    ///
    /// # Example
    /// ```javascript
    /// const chain = new WasmStageChain("opamp OP1\ntriode V1", 48000);
    /// ```
    #[wasm_bindgen(constructor)]
    pub fn new(description: &str, sample_rate: f32) -> Result<WasmStageChain, JsValue> {
        let chain = Chain::parse(description, sample_rate as f64).map_err(to_js)?;
        Ok(WasmStageChain { chain })
    }

    /// Process a block of audio samples into `output`.
    ///
    /// Only `min(input.len(), output.len())` samples are processed.
    #[wasm_bindgen]
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        self.chain.process_block(input, output);
    }

    /// Process a block of audio samples, returning a new Float32Array.
    #[wasm_bindgen]
    pub fn process_block_alloc(&mut self, input: &[f32]) -> Vec<f32> {
        let mut output = vec![0.0; input.len()];
        self.chain.process_block(input, &mut output);
        output
    }

    /// Return every stage to its initial state.
    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.chain.reset();
    }

    /// Rebuild for a new sample rate; on error nothing changes.
    #[wasm_bindgen]
    pub fn set_sample_rate(&mut self, sample_rate: f32) -> Result<(), JsValue> {
        self.chain.set_sample_rate(sample_rate as f64).map_err(to_js)
    }

    #[wasm_bindgen(getter)]
    pub fn sample_rate(&self) -> f32 {
        self.chain.sample_rate() as f32
    }

    /// Stage names in signal order.
    #[wasm_bindgen]
    pub fn stage_names(&self) -> Vec<String> {
        self.chain.names().map(str::to_string).collect()
    }
}

/// Get the library version.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Get the default sample rate.
#[wasm_bindgen]
pub fn default_sample_rate() -> f32 {
    crate::DEFAULT_SAMPLE_RATE
}
