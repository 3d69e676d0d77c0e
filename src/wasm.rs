//! WebAssembly bindings for the target-size PDF compressor

use js_sys::Function;
use wasm_bindgen::prelude::*;

use crate::{CompressOptions, CompressionResult, DeviceProfile, QualityMode};

/// Initialize panic hook for better error messages in browser console
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

fn parse_mode(mode: Option<String>) -> Result<QualityMode, JsError> {
    match mode {
        Some(name) => name.parse().map_err(|e: String| JsError::new(&e)),
        None => Ok(QualityMode::Balanced),
    }
}

/// Bridge progress events into an optional JS callback. Without a callback
/// they land on the browser console instead.
fn progress_sink(callback: Option<Function>) -> impl FnMut(u8, &str) {
    move |percent, message| match &callback {
        Some(function) => {
            let _ = function.call2(
                &JsValue::NULL,
                &JsValue::from_f64(f64::from(percent)),
                &JsValue::from_str(message),
            );
        }
        None => {
            web_sys::console::debug_1(&JsValue::from_str(&format!("[{percent:3}%] {message}")));
        }
    }
}

/// Compress a PDF in a single pass at a fixed quality/scale
///
/// # Arguments
/// * `pdf_bytes` - The input PDF file as a byte array
/// * `quality` - Encoder quality 0-1 (default: the mode's most aggressive preset)
/// * `scale` - Resolution scale 0-1 (default: like `quality`)
/// * `mode` - "highest", "balanced", or "fast" (default: "balanced")
/// * `on_progress` - Optional callback receiving (percent, message)
///
/// # Returns
/// The compressed PDF as a byte array, or throws an error
#[wasm_bindgen]
pub fn compress_pdf(
    pdf_bytes: &[u8],
    quality: Option<f32>,
    scale: Option<f32>,
    mode: Option<String>,
    on_progress: Option<Function>,
) -> Result<Vec<u8>, JsError> {
    let options = CompressOptions {
        quality,
        scale,
        mode: parse_mode(mode)?,
    };
    let output = crate::compress_simple(pdf_bytes, &options, progress_sink(on_progress))
        .map_err(|e| JsError::new(&e.to_string()))?;
    Ok(output.bytes)
}

/// Compress a PDF toward a target output size
///
/// # Arguments
/// * `pdf_bytes` - The input PDF file as a byte array
/// * `target_bytes` - Requested output size in bytes; omit for maximum compression
/// * `mode` - "highest", "balanced", or "fast" (default: "balanced")
/// * `turbo` - Fewer, coarser search steps for constrained devices (default: false)
/// * `on_progress` - Optional callback receiving (percent, message)
///
/// # Returns
/// A `CompressionResultJs` object with the output bytes and search statistics
#[wasm_bindgen]
pub fn compress_pdf_to_target(
    pdf_bytes: &[u8],
    target_bytes: Option<f64>,
    mode: Option<String>,
    turbo: Option<bool>,
    on_progress: Option<Function>,
) -> Result<CompressionResultJs, JsError> {
    let mode = parse_mode(mode)?;
    let device = DeviceProfile {
        turbo_enabled: turbo.unwrap_or(false),
    };
    let target = target_bytes.map(|value| value as u64);

    let result =
        crate::compress_to_target(pdf_bytes, target, mode, &device, progress_sink(on_progress))
            .map_err(|e| JsError::new(&e.to_string()))?;

    Ok(CompressionResultJs::from_result(result))
}

#[derive(serde::Serialize)]
struct Summary<'a> {
    original_size: u64,
    compressed_size: u64,
    target_size: Option<u64>,
    quality_used: f32,
    scale_used: f32,
    attempts: u32,
    accuracy_percent: f32,
    outcome: &'a str,
}

/// Result of a target-size compression with search statistics
#[wasm_bindgen]
pub struct CompressionResultJs {
    bytes: Vec<u8>,
    original_size: u64,
    compressed_size: u64,
    target_size: Option<u64>,
    quality_used: f32,
    scale_used: f32,
    attempts: u32,
    accuracy_percent: f32,
    outcome: String,
}

impl CompressionResultJs {
    fn from_result(result: CompressionResult) -> Self {
        Self {
            bytes: result.compressed_bytes,
            original_size: result.original_size,
            compressed_size: result.compressed_size,
            target_size: result.target_size,
            quality_used: result.quality_used,
            scale_used: result.scale_used,
            attempts: result.attempts,
            accuracy_percent: result.accuracy_percent,
            outcome: result.outcome.as_str().to_string(),
        }
    }
}

#[wasm_bindgen]
impl CompressionResultJs {
    /// Get the compressed PDF bytes
    #[wasm_bindgen(getter)]
    pub fn pdf_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn original_size(&self) -> f64 {
        self.original_size as f64
    }

    #[wasm_bindgen(getter)]
    pub fn compressed_size(&self) -> f64 {
        self.compressed_size as f64
    }

    #[wasm_bindgen(getter)]
    pub fn target_size(&self) -> Option<f64> {
        self.target_size.map(|value| value as f64)
    }

    #[wasm_bindgen(getter)]
    pub fn quality_used(&self) -> f32 {
        self.quality_used
    }

    #[wasm_bindgen(getter)]
    pub fn scale_used(&self) -> f32 {
        self.scale_used
    }

    #[wasm_bindgen(getter)]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[wasm_bindgen(getter)]
    pub fn accuracy_percent(&self) -> f32 {
        self.accuracy_percent
    }

    /// "converged", "best-effort", or "cancelled"
    #[wasm_bindgen(getter)]
    pub fn outcome(&self) -> String {
        self.outcome.clone()
    }

    /// All statistics as a JSON string
    #[wasm_bindgen(getter)]
    pub fn summary_json(&self) -> String {
        serde_json::to_string(&Summary {
            original_size: self.original_size,
            compressed_size: self.compressed_size,
            target_size: self.target_size,
            quality_used: self.quality_used,
            scale_used: self.scale_used,
            attempts: self.attempts,
            accuracy_percent: self.accuracy_percent,
            outcome: &self.outcome,
        })
        .unwrap_or_else(|_| "{}".to_string())
    }
}
