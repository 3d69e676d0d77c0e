//! Target-size PDF compression CLI
//!
//! Command-line interface for compressing a PDF toward a requested output
//! size, or at a fixed quality/scale.

use clap::Parser;
use squeeze_pdf::{
    compress_document, compress_simple, CancelToken, CompressOptions, CompressionTarget,
    DeviceProfile, QualityMode,
};
use std::fs;
use std::path::PathBuf;

/// Compress a PDF toward a target output size
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input PDF file path
    #[arg(short, long)]
    input: PathBuf,

    /// Output PDF file path
    #[arg(short, long)]
    output: PathBuf,

    /// Target output size, e.g. 500k, 2m, or a plain byte count.
    /// Omit for maximum compression.
    #[arg(short, long, value_parser = parse_size)]
    target_size: Option<u64>,

    /// Quality mode: highest, balanced, or fast
    #[arg(short, long, default_value = "balanced", value_parser = parse_mode)]
    mode: QualityMode,

    /// Fixed encoder quality in [0, 1]; switches to single-pass mode
    #[arg(short, long)]
    quality: Option<f32>,

    /// Fixed resolution scale in (0, 1]; switches to single-pass mode
    #[arg(short, long)]
    scale: Option<f32>,

    /// Relative tolerance around the target size
    #[arg(long, default_value = "0.02")]
    tolerance: f32,

    /// Fewer, coarser search steps for slow hardware
    #[arg(long)]
    turbo: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_size(value: &str) -> Result<u64, String> {
    let value = value.trim().to_ascii_lowercase();
    let (digits, multiplier) = if let Some(rest) = value.strip_suffix('k') {
        (rest, 1024)
    } else if let Some(rest) = value.strip_suffix('m') {
        (rest, 1024 * 1024)
    } else {
        (value.as_str(), 1)
    };
    let count: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid size: {value}"))?;
    Ok(count * multiplier)
}

fn parse_mode(value: &str) -> Result<QualityMode, String> {
    value.parse()
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let source = fs::read(&args.input)?;

    println!("PDF Size Compressor");
    println!("===================");
    println!("Input: {:?} ({} bytes)", args.input, source.len());

    let verbose = args.verbose;
    let mut last_message = String::new();
    let progress = move |percent: u8, message: &str| {
        if verbose && message != last_message {
            println!("  [{percent:3}%] {message}");
            last_message = message.to_string();
        }
    };

    if args.target_size.is_none() && (args.quality.is_some() || args.scale.is_some()) {
        let options = CompressOptions {
            quality: args.quality,
            scale: args.scale,
            mode: args.mode,
        };
        let output = compress_simple(&source, &options, progress)?;
        fs::write(&args.output, &output.bytes)?;
        println!("\nDone! {} -> {} bytes", source.len(), output.size_bytes);
    } else {
        let target = CompressionTarget {
            target_bytes: args.target_size,
            tolerance_percent: args.tolerance,
            mode: args.mode,
        };
        let device = DeviceProfile {
            turbo_enabled: args.turbo,
        };
        let result = compress_document(&source, &target, &device, &CancelToken::new(), progress)?;
        fs::write(&args.output, &result.compressed_bytes)?;

        println!(
            "\nDone! {} -> {} bytes in {} attempt(s) ({})",
            result.original_size,
            result.compressed_size,
            result.attempts,
            result.outcome.as_str()
        );
        if result.target_size.is_some() {
            println!("Target accuracy: {:.1}%", result.accuracy_percent);
        }
    }

    println!("Output saved to: {:?}", args.output);
    Ok(())
}
