//! Search behavior driven through a synthetic in-memory rasterizer, so no
//! native page renderer is needed.

use squeeze_pdf::{
    compress_simple_with, compress_to_target_with, raster_dimensions, resolve_initial_bounds,
    AttemptRunner, CancelToken, CompressError, CompressOptions, CompressionTarget, DeviceProfile,
    PageGeometry, PageRasterizer, QualityMode, RasterPage, SearchOutcome,
};

/// Procedurally textured pages: enough detail that JPEG size responds to
/// both quality and resolution.
struct SyntheticRasterizer {
    pages: usize,
    rasterize_calls: usize,
}

impl SyntheticRasterizer {
    fn new(pages: usize) -> Self {
        Self {
            pages,
            rasterize_calls: 0,
        }
    }
}

impl PageRasterizer for SyntheticRasterizer {
    fn page_count(&self) -> usize {
        self.pages
    }

    fn page_geometry(&self, _page: usize) -> PageGeometry {
        // 3x4 inches; small enough to keep every search pass cheap
        PageGeometry {
            width_pt: 216.0,
            height_pt: 288.0,
        }
    }

    fn rasterize(&mut self, page: usize, scale: f32) -> Result<RasterPage, CompressError> {
        self.rasterize_calls += 1;
        let geometry = self.page_geometry(page);
        let (width, height) = raster_dimensions(&geometry, scale);
        let seed = page as u32 * 29;
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let base = ((x * 13 + y * 7 + seed) % 251) as u8;
                let grain = (((x * x + y * y) >> 2) % 31) as u8;
                pixels.push(base ^ grain);
                pixels.push(base.wrapping_add(grain.wrapping_mul(3)));
                pixels.push(base.wrapping_mul(2) ^ grain);
            }
        }
        Ok(RasterPage {
            width,
            height,
            pixels,
        })
    }
}

fn balanced_target(target_bytes: Option<u64>, tolerance_percent: f32) -> CompressionTarget {
    CompressionTarget {
        target_bytes,
        tolerance_percent,
        mode: QualityMode::Balanced,
    }
}

/// Output size of a single pass at the given level of the Balanced range.
fn size_at_level(level: f32) -> u64 {
    let bounds = resolve_initial_bounds(QualityMode::Balanced, &DeviceProfile::default());
    let point = bounds.point_at(level);
    let mut rasterizer = SyntheticRasterizer::new(2);
    let options = CompressOptions {
        quality: Some(point.quality),
        scale: Some(point.scale),
        mode: QualityMode::Balanced,
    };
    compress_simple_with(&mut rasterizer, &options, |_, _| {})
        .unwrap()
        .size_bytes
}

#[test]
fn always_returns_a_usable_artifact() {
    // A one-byte target is unreachable; the search must still hand back
    // the closest document it produced.
    let mut rasterizer = SyntheticRasterizer::new(2);
    let result = compress_to_target_with(
        &mut rasterizer,
        10_000_000,
        &balanced_target(Some(1), 0.02),
        &DeviceProfile::default(),
        &CancelToken::new(),
        |_, _| {},
    )
    .unwrap();

    assert!(!result.compressed_bytes.is_empty());
    assert!(result.compressed_size > 0);
    assert!(result.attempts <= 6);
    assert!(result.accuracy_percent >= 0.0 && result.accuracy_percent <= 100.0);
    assert_ne!(result.outcome, SearchOutcome::Converged);
}

#[test]
fn no_target_runs_exactly_one_attempt() {
    let mut rasterizer = SyntheticRasterizer::new(1);
    let original_size = 100_000_000;
    let result = compress_to_target_with(
        &mut rasterizer,
        original_size,
        &balanced_target(None, 0.02),
        &DeviceProfile::default(),
        &CancelToken::new(),
        |_, _| {},
    )
    .unwrap();

    assert_eq!(result.attempts, 1);
    assert!(result.compressed_size < original_size);
    assert_eq!(result.accuracy_percent, 100.0);
    assert_eq!(result.outcome, SearchOutcome::Converged);
}

#[test]
fn no_target_matches_the_aggressive_preset_pass() {
    // Maximum compression and a single pass at the mode's most aggressive
    // preset are the same operation.
    let mut search_rasterizer = SyntheticRasterizer::new(2);
    let searched = compress_to_target_with(
        &mut search_rasterizer,
        10_000_000,
        &balanced_target(None, 0.02),
        &DeviceProfile::default(),
        &CancelToken::new(),
        |_, _| {},
    )
    .unwrap();

    let mut simple_rasterizer = SyntheticRasterizer::new(2);
    let options = CompressOptions {
        quality: None,
        scale: None,
        mode: QualityMode::Balanced,
    };
    let simple = compress_simple_with(&mut simple_rasterizer, &options, |_, _| {}).unwrap();

    assert_eq!(searched.compressed_size, simple.size_bytes);
}

#[test]
fn turbo_respects_its_reduced_attempt_ceiling() {
    let device = DeviceProfile { turbo_enabled: true };
    let bounds = resolve_initial_bounds(QualityMode::Balanced, &device);
    let mut rasterizer = SyntheticRasterizer::new(2);
    let result = compress_to_target_with(
        &mut rasterizer,
        10_000_000,
        &balanced_target(Some(1), 0.02),
        &device,
        &CancelToken::new(),
        |_, _| {},
    )
    .unwrap();

    assert!(result.attempts <= bounds.max_attempts);
}

#[test]
fn exact_target_converges_on_the_first_attempt() {
    let top_size = size_at_level(1.0);
    let mut rasterizer = SyntheticRasterizer::new(2);
    let result = compress_to_target_with(
        &mut rasterizer,
        10_000_000,
        &balanced_target(Some(top_size), 0.02),
        &DeviceProfile::default(),
        &CancelToken::new(),
        |_, _| {},
    )
    .unwrap();

    assert_eq!(result.attempts, 1);
    assert_eq!(result.outcome, SearchOutcome::Converged);
    assert_eq!(result.compressed_size, top_size);
    assert_eq!(result.accuracy_percent, 100.0);
}

#[test]
fn converged_accuracy_meets_the_tolerance_bound() {
    let floor_size = size_at_level(0.0);
    let top_size = size_at_level(1.0);
    let tolerance = 0.35;
    let target = (floor_size + top_size) / 2;

    let mut rasterizer = SyntheticRasterizer::new(2);
    let result = compress_to_target_with(
        &mut rasterizer,
        10_000_000,
        &balanced_target(Some(target), tolerance),
        &DeviceProfile::default(),
        &CancelToken::new(),
        |_, _| {},
    )
    .unwrap();

    assert!(result.attempts <= 6);
    if result.outcome == SearchOutcome::Converged {
        assert!(result.accuracy_percent >= 100.0 * (1.0 - tolerance) - 0.1);
    }
}

#[test]
fn tighter_tolerance_never_takes_fewer_attempts() {
    let floor_size = size_at_level(0.0);
    let top_size = size_at_level(1.0);
    let target = Some((floor_size + top_size) / 2);

    let mut loose_rasterizer = SyntheticRasterizer::new(2);
    let loose = compress_to_target_with(
        &mut loose_rasterizer,
        10_000_000,
        &balanced_target(target, 0.6),
        &DeviceProfile::default(),
        &CancelToken::new(),
        |_, _| {},
    )
    .unwrap();

    let mut tight_rasterizer = SyntheticRasterizer::new(2);
    let tight = compress_to_target_with(
        &mut tight_rasterizer,
        10_000_000,
        &balanced_target(target, 0.01),
        &DeviceProfile::default(),
        &CancelToken::new(),
        |_, _| {},
    )
    .unwrap();

    assert!(tight.attempts >= loose.attempts);
}

#[test]
fn oversized_target_is_recognized_without_wasted_attempts() {
    // Target far above anything the document can produce: the top of the
    // range is the closest artifact and nothing larger is reachable.
    let top_size = size_at_level(1.0);
    let bounds = resolve_initial_bounds(QualityMode::Balanced, &DeviceProfile::default());

    let mut rasterizer = SyntheticRasterizer::new(2);
    let result = compress_to_target_with(
        &mut rasterizer,
        10_000_000,
        &balanced_target(Some(top_size * 10), 0.02),
        &DeviceProfile::default(),
        &CancelToken::new(),
        |_, _| {},
    )
    .unwrap();

    assert!(result.attempts <= 2);
    assert!((result.quality_used - bounds.point_at(1.0).quality).abs() < 1e-6);
    assert_eq!(result.compressed_size, top_size);
}

#[test]
fn cancelled_call_still_returns_best_so_far() {
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut rasterizer = SyntheticRasterizer::new(2);
    let result = compress_to_target_with(
        &mut rasterizer,
        10_000_000,
        &balanced_target(Some(1), 0.02),
        &DeviceProfile::default(),
        &cancel,
        |_, _| {},
    )
    .unwrap();

    // The first attempt always completes so there is something to return.
    assert_eq!(result.attempts, 1);
    assert_eq!(result.outcome, SearchOutcome::Cancelled);
    assert!(!result.compressed_bytes.is_empty());
}

#[test]
fn zero_byte_target_is_invalid_before_any_rasterization() {
    let mut rasterizer = SyntheticRasterizer::new(2);
    let err = compress_to_target_with(
        &mut rasterizer,
        10_000_000,
        &balanced_target(Some(0), 0.02),
        &DeviceProfile::default(),
        &CancelToken::new(),
        |_, _| {},
    )
    .unwrap_err();

    assert!(matches!(err, CompressError::InvalidInput(_)));
    assert_eq!(rasterizer.rasterize_calls, 0);
}

#[test]
fn empty_document_is_invalid() {
    let mut rasterizer = SyntheticRasterizer::new(0);
    let err = compress_to_target_with(
        &mut rasterizer,
        0,
        &balanced_target(Some(1000), 0.02),
        &DeviceProfile::default(),
        &CancelToken::new(),
        |_, _| {},
    )
    .unwrap_err();

    assert!(matches!(err, CompressError::InvalidInput(_)));
}

#[test]
fn rasters_are_reused_across_quality_only_changes() {
    let mut rasterizer = SyntheticRasterizer::new(3);
    let mut runner = AttemptRunner::new(&mut rasterizer);
    let bounds = resolve_initial_bounds(QualityMode::Balanced, &DeviceProfile::default());
    let point = bounds.point_at(0.5);

    let first = runner.run(point, |_, _| {}).unwrap();
    let second = runner
        .run(
            squeeze_pdf::ParameterPoint {
                quality: (point.quality - 0.2).max(0.05),
                scale: point.scale,
            },
            |_, _| {},
        )
        .unwrap();
    assert!(second.size < first.size);
    drop(runner);
    assert_eq!(rasterizer.rasterize_calls, 3);

    // A scale change invalidates the cache and re-renders every page.
    let mut runner = AttemptRunner::new(&mut rasterizer);
    runner.run(bounds.point_at(0.5), |_, _| {}).unwrap();
    runner.run(bounds.point_at(0.1), |_, _| {}).unwrap();
    drop(runner);
    assert_eq!(rasterizer.rasterize_calls, 3 + 6);
}

#[test]
fn output_parses_as_a_valid_document_with_matching_pages() {
    let mut rasterizer = SyntheticRasterizer::new(3);
    let result = compress_to_target_with(
        &mut rasterizer,
        10_000_000,
        &balanced_target(None, 0.02),
        &DeviceProfile::default(),
        &CancelToken::new(),
        |_, _| {},
    )
    .unwrap();

    let doc = lopdf::Document::load_mem(&result.compressed_bytes).unwrap();
    assert_eq!(doc.get_pages().len(), 3);
}

#[test]
fn progress_is_monotone_and_finishes_at_one_hundred() {
    let mut events: Vec<(u8, String)> = Vec::new();
    let mut rasterizer = SyntheticRasterizer::new(2);
    compress_to_target_with(
        &mut rasterizer,
        10_000_000,
        &balanced_target(Some(1), 0.02),
        &DeviceProfile::default(),
        &CancelToken::new(),
        |percent, message| events.push((percent, message.to_string())),
    )
    .unwrap();

    assert!(!events.is_empty());
    for window in events.windows(2) {
        assert!(window[0].0 <= window[1].0);
    }
    assert_eq!(events.last().unwrap().0, 100);
}
