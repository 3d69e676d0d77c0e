//! Target-size PDF compression engine
//!
//! Core logic for compressing a PDF toward a requested output size. Shared
//! between CLI and WASM targets.
//!
//! Each page of the source document is rendered to a pixel buffer, the
//! rasters are JPEG-encoded, and a raster-only output document is rebuilt
//! around them. A bounded search over the joint quality/resolution space
//! repeats that pass until the output size lands within tolerance of the
//! target, then hands back the best artifact observed.

#[cfg(target_arch = "wasm32")]
pub mod wasm;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream};
use pdfium_render::prelude::*;
use thiserror::Error;

/// Render density for `scale = 1.0`, in dots per inch. PDF user space is
/// 72 points per inch, so full scale renders at 2x the point grid.
pub const BASE_RASTER_DPI: f32 = 144.0;

/// Default relative tolerance around the target size.
pub const DEFAULT_TOLERANCE_PERCENT: f32 = 0.02;

/// Floor for the resolution scale. Below this the raster is unreadable.
const MIN_SCALE: f32 = 0.05;

/// Per-page raster budget. Exceeding it lowers the attempt's effective
/// scale instead of failing the call.
const MAX_PIXELS_PER_PAGE: u64 = 12_000_000;

/// The JPEG encoder takes u16 dimensions; stay comfortably below.
const MAX_RASTER_DIM: u32 = 65_000;

/// Named quality presets bundling a region of the parameter space and a
/// search budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityMode {
    /// Bias quality and resolution toward the top of their ranges;
    /// prioritizes legibility of text rendered as image content.
    Highest,
    #[default]
    Balanced,
    /// Lower both knobs for speed and smaller output.
    Fast,
}

impl std::str::FromStr for QualityMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "highest" => Ok(Self::Highest),
            "balanced" => Ok(Self::Balanced),
            "fast" => Ok(Self::Fast),
            other => Err(format!("unknown quality mode: {other}")),
        }
    }
}

/// Options for the single-pass compression path
#[derive(Debug, Clone, Default)]
pub struct CompressOptions {
    /// Encoder quality in [0, 1]. Falls back to the mode's most aggressive
    /// preset when unset.
    pub quality: Option<f32>,
    /// Resolution scale in (0, 1]. Falls back like `quality`.
    pub scale: Option<f32>,
    pub mode: QualityMode,
}

impl CompressOptions {
    fn resolve_point(&self) -> Result<ParameterPoint, CompressError> {
        let bounds = resolve_initial_bounds(self.mode, &DeviceProfile::default());
        let fallback = bounds.point_at(0.0);
        let quality = self.quality.unwrap_or(fallback.quality);
        let scale = self.scale.unwrap_or(fallback.scale);
        if !(0.0..=1.0).contains(&quality) {
            return Err(CompressError::InvalidInput(format!(
                "quality {quality} outside [0, 1]"
            )));
        }
        if !(scale > 0.0 && scale <= 1.0) {
            return Err(CompressError::InvalidInput(format!(
                "scale {scale} outside (0, 1]"
            )));
        }
        Ok(ParameterPoint { quality, scale })
    }
}

/// What the caller asked the search to achieve
#[derive(Debug, Clone, Copy)]
pub struct CompressionTarget {
    /// Requested output size in bytes. `None` means maximum compression
    /// with no size goal.
    pub target_bytes: Option<u64>,
    /// Allowed relative deviation before the search counts as converged.
    pub tolerance_percent: f32,
    pub mode: QualityMode,
}

impl Default for CompressionTarget {
    fn default() -> Self {
        Self {
            target_bytes: None,
            tolerance_percent: DEFAULT_TOLERANCE_PERCENT,
            mode: QualityMode::Balanced,
        }
    }
}

/// Host capability input, read once at call start.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceProfile {
    /// Trade search precision for wall-clock time on constrained hardware.
    pub turbo_enabled: bool,
}

/// The two knobs that jointly determine output fidelity and size.
/// Raising either never decreases the expected output size.
#[derive(Debug, Clone, Copy)]
pub struct ParameterPoint {
    /// Encoder quality in [0, 1]
    pub quality: f32,
    /// Resolution scale in (0, 1]
    pub scale: f32,
}

/// Parameter ranges and search budget resolved from mode and device
#[derive(Debug, Clone, Copy)]
pub struct SearchBounds {
    pub quality_range: (f32, f32),
    pub scale_range: (f32, f32),
    pub max_attempts: u32,
    pub turbo: bool,
}

impl SearchBounds {
    /// Map a composite compression level in [0, 1] onto the active ranges.
    /// Level 0 is the most aggressive point, level 1 the gentlest.
    pub fn point_at(&self, level: f32) -> ParameterPoint {
        let level = level.clamp(0.0, 1.0);
        let (q_lo, q_hi) = self.quality_range;
        let (s_lo, s_hi) = self.scale_range;
        ParameterPoint {
            quality: q_lo + (q_hi - q_lo) * level,
            scale: s_lo + (s_hi - s_lo) * level,
        }
    }
}

/// Resolve a mode and device profile into parameter ranges and an attempt
/// budget. The breakpoints are empirical and replaceable; only the bounds
/// and their ordering are relied on elsewhere.
pub fn resolve_initial_bounds(mode: QualityMode, device: &DeviceProfile) -> SearchBounds {
    let (quality_range, scale_range, max_attempts) = match mode {
        QualityMode::Highest => ((0.70, 0.97), (0.75, 1.0), 8),
        QualityMode::Balanced => ((0.45, 0.92), (0.55, 1.0), 6),
        QualityMode::Fast => ((0.30, 0.85), (0.40, 0.90), 4),
    };
    let max_attempts = if device.turbo_enabled {
        (max_attempts / 2).max(2)
    } else {
        max_attempts
    };
    SearchBounds {
        quality_range,
        scale_range,
        max_attempts,
        turbo: device.turbo_enabled,
    }
}

/// How the search terminated. Non-convergence is an expected outcome, not
/// an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Output size within tolerance of the target
    Converged,
    /// Attempt budget exhausted; closest artifact returned
    BestEffort,
    /// Cancelled cooperatively; best artifact so far returned
    Cancelled,
}

impl SearchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchOutcome::Converged => "converged",
            SearchOutcome::BestEffort => "best-effort",
            SearchOutcome::Cancelled => "cancelled",
        }
    }
}

/// Result of a target-size compression call
#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub original_size: u64,
    pub compressed_size: u64,
    pub target_size: Option<u64>,
    pub compressed_bytes: Vec<u8>,
    pub quality_used: f32,
    pub scale_used: f32,
    pub attempts: u32,
    /// 100 * (1 - |size - target| / target), clamped to [0, 100].
    /// 100.0 when no target was requested.
    pub accuracy_percent: f32,
    pub outcome: SearchOutcome,
}

/// Result of the single-pass compression path
#[derive(Debug, Clone)]
pub struct SimpleOutput {
    pub bytes: Vec<u8>,
    pub size_bytes: u64,
}

/// Error type for compression operations
#[derive(Debug, Error)]
pub enum CompressError {
    /// Source bytes are not a well-formed document, or the request itself
    /// is malformed (for example a zero-byte target). No attempt is made.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A page's content could not be rendered. Fatal for the whole call;
    /// carries the offending page index for diagnostics.
    #[error("failed to rasterize page {page}: {reason}")]
    RasterizationFailed { page: usize, reason: String },
    #[error("failed to encode page raster: {0}")]
    EncodingFailed(String),
    #[error("failed to assemble output document: {0}")]
    AssemblyFailed(String),
    #[error("page renderer unavailable: {0}")]
    RendererUnavailable(String),
}

/// Cooperative cancellation handle, checked between pages and between
/// attempts. A cancelled call still returns the best result obtained so
/// far.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Monotone progress sink: percent never decreases within a call.
struct ProgressReporter<'a> {
    sink: &'a mut dyn FnMut(u8, &str),
    last: u8,
}

impl<'a> ProgressReporter<'a> {
    fn new(sink: &'a mut dyn FnMut(u8, &str)) -> Self {
        Self { sink, last: 0 }
    }

    fn report(&mut self, percent: f32, message: &str) {
        let percent = (percent.clamp(0.0, 100.0) as u8).max(self.last);
        self.last = percent;
        (self.sink)(percent, message);
    }
}

/// Intrinsic page dimensions in points (72 points = 1 inch)
#[derive(Debug, Clone, Copy)]
pub struct PageGeometry {
    pub width_pt: f32,
    pub height_pt: f32,
}

/// One rendered page as a packed RGB8 buffer
#[derive(Debug, Clone)]
pub struct RasterPage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Pixel dimensions for a page at a given scale. Deterministic: the same
/// scale always yields the same ceil-rounded dimensions.
pub fn raster_dimensions(geometry: &PageGeometry, scale: f32) -> (u32, u32) {
    let px_per_pt = scale * BASE_RASTER_DPI / 72.0;
    let width = (geometry.width_pt * px_per_pt).ceil().max(1.0) as u32;
    let height = (geometry.height_pt * px_per_pt).ceil().max(1.0) as u32;
    (width, height)
}

/// Renders single pages of an already-opened document into pixel buffers.
/// The engine is generic over this seam; hosts that manage document
/// loading themselves (and tests) supply their own implementation.
pub trait PageRasterizer {
    fn page_count(&self) -> usize;

    /// Intrinsic dimensions of a page. `page` must be < `page_count()`.
    fn page_geometry(&self, page: usize) -> PageGeometry;

    /// Render a page's visual content at the given scale into an RGB
    /// raster sized per [`raster_dimensions`].
    fn rasterize(&mut self, page: usize, scale: f32) -> Result<RasterPage, CompressError>;
}

/// Production rasterizer backed by pdfium
pub struct PdfiumRasterizer<'a, 'b> {
    document: &'a PdfDocument<'b>,
    geometries: Vec<PageGeometry>,
}

impl<'a, 'b> PdfiumRasterizer<'a, 'b> {
    pub fn new(document: &'a PdfDocument<'b>) -> Self {
        let geometries = document
            .pages()
            .iter()
            .map(|page| PageGeometry {
                width_pt: page.width().value,
                height_pt: page.height().value,
            })
            .collect();
        Self {
            document,
            geometries,
        }
    }
}

impl PageRasterizer for PdfiumRasterizer<'_, '_> {
    fn page_count(&self) -> usize {
        self.geometries.len()
    }

    fn page_geometry(&self, page: usize) -> PageGeometry {
        self.geometries[page]
    }

    fn rasterize(&mut self, page: usize, scale: f32) -> Result<RasterPage, CompressError> {
        let geometry =
            self.geometries
                .get(page)
                .copied()
                .ok_or_else(|| CompressError::RasterizationFailed {
                    page,
                    reason: "page index out of range".to_string(),
                })?;
        let (width, height) = raster_dimensions(&geometry, scale);

        let pdf_page = self.document.pages().get(page as u16).map_err(|e| {
            CompressError::RasterizationFailed {
                page,
                reason: e.to_string(),
            }
        })?;

        let bitmap = pdf_page
            .render_with_config(
                &PdfRenderConfig::new()
                    .set_target_width(width as i32)
                    .set_target_height(height as i32),
            )
            .map_err(|e| CompressError::RasterizationFailed {
                page,
                reason: e.to_string(),
            })?;

        let rendered = bitmap.as_image().into_rgb8();
        Ok(RasterPage {
            width: rendered.width(),
            height: rendered.height(),
            pixels: rendered.into_raw(),
        })
    }
}

/// Encode an RGB raster as a baseline JPEG. Maps quality [0, 1] onto the
/// codec's 1-100 scale. Side-effect free; safe to re-invoke on the same
/// buffer with different quality values.
pub fn encode_page_jpeg(raster: &RasterPage, quality: f32) -> Result<Vec<u8>, CompressError> {
    if raster.width > u16::MAX as u32 || raster.height > u16::MAX as u32 {
        return Err(CompressError::EncodingFailed(format!(
            "raster {}x{} exceeds encoder limits",
            raster.width, raster.height
        )));
    }
    let quality = (quality.clamp(0.0, 1.0) * 100.0).round().max(1.0) as u8;

    let mut jpeg_bytes = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut jpeg_bytes, quality);
    encoder.set_sampling_factor(jpeg_encoder::SamplingFactor::R_4_2_0);
    encoder
        .encode(
            &raster.pixels,
            raster.width as u16,
            raster.height as u16,
            jpeg_encoder::ColorType::Rgb,
        )
        .map_err(|e| CompressError::EncodingFailed(e.to_string()))?;

    Ok(jpeg_bytes)
}

/// One encoded page ready for assembly
#[derive(Debug, Clone)]
pub struct EncodedPage {
    pub jpeg: Vec<u8>,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub width_pt: f32,
    pub height_pt: f32,
}

/// Build a raster-only output document: one page per encoded image, page
/// order and count preserved, each page box equal to the source page's
/// intrinsic size so the raster fills it at the original aspect ratio.
pub fn assemble_document(pages: Vec<EncodedPage>) -> Result<Vec<u8>, CompressError> {
    if pages.is_empty() {
        return Err(CompressError::AssemblyFailed(
            "no pages to assemble".to_string(),
        ));
    }
    let page_count = pages.len();

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(page_count);

    for page in pages {
        let mut image_dict = Dictionary::new();
        image_dict.set("Type", Object::Name(b"XObject".to_vec()));
        image_dict.set("Subtype", Object::Name(b"Image".to_vec()));
        image_dict.set("Width", Object::Integer(page.pixel_width as i64));
        image_dict.set("Height", Object::Integer(page.pixel_height as i64));
        image_dict.set("ColorSpace", Object::Name(b"DeviceRGB".to_vec()));
        image_dict.set("BitsPerComponent", Object::Integer(8));
        image_dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
        let image_id = doc.add_object(Object::Stream(Stream::new(image_dict, page.jpeg)));

        // Scale the unit image square up to the page box and paint it.
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(page.width_pt),
                        Object::Real(0.0),
                        Object::Real(0.0),
                        Object::Real(page.height_pt),
                        Object::Real(0.0),
                        Object::Real(0.0),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_bytes = content
            .encode()
            .map_err(|e| CompressError::AssemblyFailed(e.to_string()))?;
        let content_id = doc.add_object(Object::Stream(Stream::new(
            Dictionary::new(),
            content_bytes,
        )));

        let mut xobjects = Dictionary::new();
        xobjects.set("Im0", Object::Reference(image_id));
        let mut resources = Dictionary::new();
        resources.set("XObject", Object::Dictionary(xobjects));

        let mut page_dict = Dictionary::new();
        page_dict.set("Type", Object::Name(b"Page".to_vec()));
        page_dict.set("Parent", Object::Reference(pages_id));
        page_dict.set(
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(page.width_pt),
                Object::Real(page.height_pt),
            ]),
        );
        page_dict.set("Resources", Object::Dictionary(resources));
        page_dict.set("Contents", Object::Reference(content_id));
        kids.push(Object::Reference(
            doc.add_object(Object::Dictionary(page_dict)),
        ));
    }

    let mut pages_dict = Dictionary::new();
    pages_dict.set("Type", Object::Name(b"Pages".to_vec()));
    pages_dict.set("Count", Object::Integer(page_count as i64));
    pages_dict.set("Kids", Object::Array(kids));
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(Object::Dictionary(catalog));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    doc.compress();

    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|e| CompressError::AssemblyFailed(e.to_string()))?;
    Ok(output)
}

/// Outcome of one full compression pass. Oversized or undersized output is
/// a reportable result, never an error.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub quality: f32,
    pub scale: f32,
    pub size: u64,
    pub bytes: Vec<u8>,
}

struct RasterSet {
    scale_key: u32,
    pages: Vec<RasterPage>,
}

/// Executes one full pass (rasterize all pages, encode, assemble) for a
/// parameter point. Rasters are cached keyed on the effective scale alone,
/// so quality-only refinements skip the rendering cost entirely.
pub struct AttemptRunner<'r, R: PageRasterizer> {
    rasterizer: &'r mut R,
    geometries: Vec<PageGeometry>,
    cache: Option<RasterSet>,
}

fn scale_cache_key(scale: f32) -> u32 {
    (scale * 1000.0).round() as u32
}

impl<'r, R: PageRasterizer> AttemptRunner<'r, R> {
    pub fn new(rasterizer: &'r mut R) -> Self {
        let geometries = (0..rasterizer.page_count())
            .map(|page| rasterizer.page_geometry(page))
            .collect();
        Self {
            rasterizer,
            geometries,
            cache: None,
        }
    }

    /// Run one pass to completion. `on_step` receives the fraction of the
    /// attempt finished and a stage message.
    pub fn run(
        &mut self,
        point: ParameterPoint,
        on_step: impl FnMut(f32, &str),
    ) -> Result<AttemptOutcome, CompressError> {
        self.run_abortable(point, None, on_step)
            .map(|record| record.expect("attempt without abort token always completes"))
    }

    /// Run one pass, aborting between pages if the token fires. Returns
    /// `None` only when aborted.
    pub fn run_abortable(
        &mut self,
        point: ParameterPoint,
        abort: Option<&CancelToken>,
        mut on_step: impl FnMut(f32, &str),
    ) -> Result<Option<AttemptOutcome>, CompressError> {
        let page_total = self.geometries.len();
        let effective_scale = self.fit_scale(point.scale);
        let scale_key = scale_cache_key(effective_scale);

        if self.cache.as_ref().map(|set| set.scale_key) != Some(scale_key) {
            let mut rendered = Vec::with_capacity(page_total);
            for page in 0..page_total {
                if abort.is_some_and(CancelToken::is_cancelled) {
                    return Ok(None);
                }
                on_step(
                    0.6 * page as f32 / page_total as f32,
                    &format!("Rendering page {} of {}", page + 1, page_total),
                );
                rendered.push(self.rasterizer.rasterize(page, effective_scale)?);
            }
            self.cache = Some(RasterSet {
                scale_key,
                pages: rendered,
            });
        }

        let rasters = match self.cache.as_ref() {
            Some(set) => &set.pages,
            None => return Ok(None),
        };
        let mut encoded = Vec::with_capacity(page_total);
        for (page, raster) in rasters.iter().enumerate() {
            if abort.is_some_and(CancelToken::is_cancelled) {
                return Ok(None);
            }
            on_step(
                0.6 + 0.3 * page as f32 / page_total as f32,
                &format!("Encoding page {} of {}", page + 1, page_total),
            );
            let jpeg = encode_page_jpeg(raster, point.quality)?;
            let geometry = self.geometries[page];
            encoded.push(EncodedPage {
                jpeg,
                pixel_width: raster.width,
                pixel_height: raster.height,
                width_pt: geometry.width_pt,
                height_pt: geometry.height_pt,
            });
        }

        on_step(0.92, "Building document");
        let bytes = assemble_document(encoded)?;
        let size = bytes.len() as u64;
        log::debug!(
            "pass at quality {:.2} scale {:.2} produced {} bytes",
            point.quality,
            effective_scale,
            size
        );
        Ok(Some(AttemptOutcome {
            quality: point.quality,
            scale: effective_scale,
            size,
            bytes,
        }))
    }

    /// Lower the requested scale until every page fits the raster budget.
    fn fit_scale(&self, requested: f32) -> f32 {
        let mut scale = requested.clamp(MIN_SCALE, 1.0);
        while scale > MIN_SCALE && self.exceeds_raster_budget(scale) {
            let reduced = (scale * 0.7).max(MIN_SCALE);
            log::warn!("raster budget exceeded at scale {scale:.3}, retrying at {reduced:.3}");
            scale = reduced;
        }
        // Snap to a 0.01 grid so visually indistinguishable steps share
        // one raster cache entry.
        ((scale * 100.0).round() / 100.0).max(MIN_SCALE)
    }

    fn exceeds_raster_budget(&self, scale: f32) -> bool {
        self.geometries.iter().any(|geometry| {
            let (width, height) = raster_dimensions(geometry, scale);
            width.max(height) > MAX_RASTER_DIM
                || u64::from(width) * u64::from(height) > MAX_PIXELS_PER_PAGE
        })
    }
}

fn accuracy_percent(size: u64, target: u64) -> f32 {
    if target == 0 {
        return 0.0;
    }
    let deviation = (size as f64 - target as f64).abs() / target as f64;
    (100.0 * (1.0 - deviation)).clamp(0.0, 100.0) as f32
}

fn attempt_window(attempt: u32, max_attempts: u32) -> (f32, f32) {
    let span = 92.0 / max_attempts.max(1) as f32;
    let start = 4.0 + span * attempt as f32;
    (start, start + span)
}

/// Single-pass compression over any rasterizer; no size search.
pub fn compress_simple_with<R: PageRasterizer>(
    rasterizer: &mut R,
    options: &CompressOptions,
    mut on_progress: impl FnMut(u8, &str),
) -> Result<SimpleOutput, CompressError> {
    let point = options.resolve_point()?;
    if rasterizer.page_count() == 0 {
        return Err(CompressError::InvalidInput(
            "document has no pages".to_string(),
        ));
    }

    let mut sink = |percent: u8, message: &str| on_progress(percent, message);
    let mut progress = ProgressReporter::new(&mut sink);
    progress.report(2.0, "Preparing document");

    let mut runner = AttemptRunner::new(rasterizer);
    let record = runner.run(point, |fraction, message| {
        progress.report(4.0 + 92.0 * fraction, message);
    })?;
    progress.report(100.0, "Done");

    Ok(SimpleOutput {
        size_bytes: record.size,
        bytes: record.bytes,
    })
}

/// Search-driven compression over any rasterizer.
///
/// With a target, runs up to the mode's attempt budget, bisecting a
/// composite compression level that maps monotonically onto the mode's
/// quality/scale ranges, and returns the attempt closest to the target
/// (ties prefer not exceeding it). Exhausting the budget is not an error.
/// With no target, runs exactly one pass at the mode's most aggressive
/// preset point.
pub fn compress_to_target_with<R: PageRasterizer>(
    rasterizer: &mut R,
    original_size: u64,
    target: &CompressionTarget,
    device: &DeviceProfile,
    cancel: &CancelToken,
    mut on_progress: impl FnMut(u8, &str),
) -> Result<CompressionResult, CompressError> {
    if target.target_bytes == Some(0) {
        return Err(CompressError::InvalidInput(
            "target size must be greater than zero".to_string(),
        ));
    }
    if rasterizer.page_count() == 0 {
        return Err(CompressError::InvalidInput(
            "document has no pages".to_string(),
        ));
    }

    let bounds = resolve_initial_bounds(target.mode, device);
    let mut sink = |percent: u8, message: &str| on_progress(percent, message);
    let mut progress = ProgressReporter::new(&mut sink);
    progress.report(2.0, "Preparing document");

    let mut runner = AttemptRunner::new(rasterizer);

    let Some(target_bytes) = target.target_bytes else {
        // Maximum compression: one pass at the most aggressive preset.
        let record = runner.run(bounds.point_at(0.0), |fraction, message| {
            progress.report(4.0 + 92.0 * fraction, message);
        })?;
        progress.report(100.0, "Done");
        return Ok(CompressionResult {
            original_size,
            compressed_size: record.size,
            target_size: None,
            compressed_bytes: record.bytes,
            quality_used: record.quality,
            scale_used: record.scale,
            attempts: 1,
            accuracy_percent: 100.0,
            outcome: SearchOutcome::Converged,
        });
    };

    let goal = target_bytes as f64;
    let tolerance = f64::from(target.tolerance_percent.max(0.0));

    let mut best: Option<AttemptOutcome> = None;
    let mut best_deviation = f64::INFINITY;
    let mut attempts: u32 = 0;
    let mut outcome = SearchOutcome::BestEffort;

    // Bracket on the composite level. The first probe runs at the top of
    // the range: an already-small document terminates right there, since
    // nothing larger is reachable.
    let (mut low, mut high) = (0.0_f32, 1.0_f32);
    let mut level = 1.0_f32;
    let mut tried: Vec<u32> = Vec::new();

    while attempts < bounds.max_attempts {
        let level_key = (level * 1000.0).round() as u32;
        if tried.contains(&level_key) {
            break; // bracket collapsed onto an already-measured point
        }
        tried.push(level_key);

        let point = bounds.point_at(level);
        let (window_start, window_end) = attempt_window(attempts, bounds.max_attempts);
        let pass = attempts + 1;
        let abort = if best.is_some() { Some(cancel) } else { None };
        let record = runner.run_abortable(point, abort, |fraction, message| {
            progress.report(
                window_start + (window_end - window_start) * fraction,
                &format!("Pass {pass}: {message}"),
            );
        })?;
        let Some(record) = record else {
            outcome = SearchOutcome::Cancelled;
            break;
        };
        attempts += 1;

        let size = record.size as f64;
        let deviation = (size - goal).abs();
        let replaces_best = deviation < best_deviation
            || (deviation == best_deviation
                && size <= goal
                && best.as_ref().is_some_and(|held| held.size as f64 > goal));
        if replaces_best {
            best = Some(record);
            best_deviation = deviation;
        } // a rejected record drops its buffer here

        if deviation / goal <= tolerance {
            outcome = SearchOutcome::Converged;
            break;
        }
        if cancel.is_cancelled() {
            outcome = SearchOutcome::Cancelled;
            break;
        }

        if size > goal {
            high = level;
        } else {
            if level >= high {
                break; // undersized at the bracket ceiling
            }
            low = level;
        }
        if high - low < 0.002 {
            break;
        }

        level = if attempts == 1 && size > goal {
            // Model the first probe's overshoot with the empirical
            // size-vs-level curve rather than blind bisection.
            let estimated = (goal / size).powf(0.6) as f32;
            estimated.clamp(low + 0.01, high - 0.01)
        } else if bounds.turbo {
            low + (high - low) * 0.35
        } else {
            (low + high) * 0.5
        };
    }

    let best = best.ok_or_else(|| {
        CompressError::InvalidInput("no compression attempt was executed".to_string())
    })?;

    progress.report(97.0, "Selecting best result");
    let accuracy = accuracy_percent(best.size, target_bytes);
    log::debug!(
        "search finished: {} attempts, {} bytes against target {}, {:.1}% accuracy ({})",
        attempts,
        best.size,
        target_bytes,
        accuracy,
        outcome.as_str()
    );
    let result = CompressionResult {
        original_size,
        compressed_size: best.size,
        target_size: Some(target_bytes),
        compressed_bytes: best.bytes,
        quality_used: best.quality,
        scale_used: best.scale,
        attempts,
        accuracy_percent: accuracy,
        outcome,
    };
    progress.report(100.0, "Done");
    Ok(result)
}

fn ensure_pdf_header(source: &[u8]) -> Result<(), CompressError> {
    if source.is_empty() {
        return Err(CompressError::InvalidInput("empty input".to_string()));
    }
    let window = &source[..source.len().min(1024)];
    if !window.windows(5).any(|candidate| candidate == b"%PDF-") {
        return Err(CompressError::InvalidInput(
            "missing %PDF header".to_string(),
        ));
    }
    Ok(())
}

fn bind_pdfium() -> Result<Pdfium, CompressError> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        let bindings = Pdfium::bind_to_system_library()
            .map_err(|e| CompressError::RendererUnavailable(e.to_string()))?;
        Ok(Pdfium::new(bindings))
    }
    #[cfg(target_arch = "wasm32")]
    {
        Ok(Pdfium::default())
    }
}

/// Single-pass compression of PDF bytes; used by the slider-driven
/// compression-level UI mode.
pub fn compress_simple(
    source: &[u8],
    options: &CompressOptions,
    on_progress: impl FnMut(u8, &str),
) -> Result<SimpleOutput, CompressError> {
    ensure_pdf_header(source)?;
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(source, None)
        .map_err(|e| CompressError::InvalidInput(format!("failed to open document: {e}")))?;
    let mut rasterizer = PdfiumRasterizer::new(&document);
    compress_simple_with(&mut rasterizer, options, on_progress)
}

/// Search-driven compression of PDF bytes toward a target size with the
/// default tolerance. `target_bytes = None` takes the single-attempt
/// maximum-compression path.
pub fn compress_to_target(
    source: &[u8],
    target_bytes: Option<u64>,
    mode: QualityMode,
    device: &DeviceProfile,
    on_progress: impl FnMut(u8, &str),
) -> Result<CompressionResult, CompressError> {
    let target = CompressionTarget {
        target_bytes,
        tolerance_percent: DEFAULT_TOLERANCE_PERCENT,
        mode,
    };
    compress_document(source, &target, device, &CancelToken::new(), on_progress)
}

/// Full-control variant of [`compress_to_target`]: explicit tolerance and
/// cooperative cancellation.
pub fn compress_document(
    source: &[u8],
    target: &CompressionTarget,
    device: &DeviceProfile,
    cancel: &CancelToken,
    on_progress: impl FnMut(u8, &str),
) -> Result<CompressionResult, CompressError> {
    if target.target_bytes == Some(0) {
        return Err(CompressError::InvalidInput(
            "target size must be greater than zero".to_string(),
        ));
    }
    ensure_pdf_header(source)?;
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(source, None)
        .map_err(|e| CompressError::InvalidInput(format!("failed to open document: {e}")))?;
    let mut rasterizer = PdfiumRasterizer::new(&document);
    compress_to_target_with(
        &mut rasterizer,
        source.len() as u64,
        target,
        device,
        cancel,
        on_progress,
    )
}
