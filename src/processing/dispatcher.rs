//! # Pipeline Dispatcher
//!
//! Owns the selected backend, the transfer buffer and the colour cache, and
//! drives one frame at a time through the pipeline:
//!
//! 1. **Analyze**: coverage, signed distance fields and glyph pixels (backend)
//! 2. **Populate**: pixel coords, coverage, region ids and region colours into the buffer
//! 3. **Dispatch**: submit, then hand the buffer to a blocking backend worker
//! 4. **Wait**: poll the flags word with a bounded timeout (the only suspension point)
//! 5. **Composite**: blend adjusted colours into a copy of the frame
//!
//! ## Compositing
//!
//! Each glyph pixel moves from its original colour toward the adjusted one by
//! `α + ½·w·(1 − α)`, where `w = 4α(1 − α)` is the edge weight. Solid ink takes
//! the adjusted colour outright; anti-aliased edges get extra emphasis.
//! When the blend would fall below the target for a pixel whose adjustment
//! reaches it, the adjusted colour is written outright instead. Adjusted
//! pixels are written fully opaque.
//!
//! ## Failure Handling
//!
//! [`Dispatcher::enhance`] passes the original frame through when the
//! failure only affects this frame (timeout, backend error, buffer still
//! busy). Capacity overflow and invalid input are returned to the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use contrast_kernel::{
    ColourCache, CoverageField, DistanceFields, EnhanceParams, edge_weight, estimate_region_colours,
};
use log::{debug, warn};

use crate::backend::{Backend, BackendKind, Capabilities, FrameAnalysis, PixelReport, RemediationJob};
use crate::config::EnhanceConfig;
use crate::core::TransferBuffer;
use crate::error::{RemediationError, RemediationResult, classify};
use crate::frame::RgbaFrame;

/// Outcome of one frame.
#[derive(Debug, Clone)]
pub struct EnhanceReport {
    pub frame: RgbaFrame,
    pub backend: BackendKind,
    pub glyph_pixels: usize,
    pub regions: usize,
    /// Pixels whose colour was changed.
    pub adjusted_pixels: usize,
    /// Pixels that still miss the target after adjustment (lightness bound hit).
    pub unresolved_pixels: usize,
    pub reports: Vec<PixelReport>,
    pub elapsed: Duration,
}

impl EnhanceReport {
    fn passthrough(frame: &RgbaFrame, backend: BackendKind, started: Instant) -> Self {
        Self {
            frame: frame.clone(),
            backend,
            glyph_pixels: 0,
            regions: 0,
            adjusted_pixels: 0,
            unresolved_pixels: 0,
            reports: Vec::new(),
            elapsed: started.elapsed(),
        }
    }
}

/// Per-frame pipeline owner.
#[derive(Debug)]
pub struct Dispatcher {
    config: EnhanceConfig,
    backend: Backend,
    capability_errors: Vec<RemediationError>,
    buffer: Arc<TransferBuffer>,
    cache: Arc<ColourCache>,
}

impl Dispatcher {
    pub fn new(config: EnhanceConfig) -> RemediationResult<Self> {
        Self::with_capabilities(config, Capabilities::detect())
    }

    /// Validate `config`, select the backend once and allocate the buffer.
    pub fn with_capabilities(config: EnhanceConfig, caps: Capabilities) -> RemediationResult<Self> {
        config
            .validate()
            .map_err(|reason| RemediationError::config("config", "", reason))?;
        config.params().validate()?;

        let (backend, capability_errors) =
            Backend::select(&caps, config.backend, config.worker_threads);
        let buffer = Arc::new(TransferBuffer::new(config.pixel_capacity)?);

        Ok(Self {
            config,
            backend,
            capability_errors,
            buffer,
            cache: Arc::new(ColourCache::new()),
        })
    }

    pub fn config(&self) -> &EnhanceConfig {
        &self.config
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Capabilities found missing during backend selection.
    pub fn capability_errors(&self) -> &[RemediationError] {
        &self.capability_errors
    }

    pub fn buffer(&self) -> &Arc<TransferBuffer> {
        &self.buffer
    }

    /// Enhance with the configured parameters; recoverable failures return
    /// the input frame unchanged.
    pub async fn enhance(&self, frame: &RgbaFrame) -> RemediationResult<RgbaFrame> {
        self.enhance_with(frame, self.config.params()).await
    }

    pub async fn enhance_with(&self, frame: &RgbaFrame, params: EnhanceParams) -> RemediationResult<RgbaFrame> {
        match self.try_enhance_with(frame, params).await {
            Ok(report) => Ok(report.frame),
            Err(e) if classify::is_transient(&e) => {
                warn!("skipping frame: {}", e);
                Ok(frame.clone())
            }
            Err(e) => Err(e),
        }
    }

    /// `enhance` over raw, tightly packed RGBA bytes.
    pub async fn enhance_rgba(
        &self,
        rgba: &[u8],
        width: u32,
        height: u32,
        target_contrast: f64,
        max_distance: f32,
        sample_distance: f32,
    ) -> RemediationResult<Vec<u8>> {
        let frame = RgbaFrame::new(rgba.to_vec(), width, height)?;
        let params = EnhanceParams {
            target_contrast,
            max_distance,
            sample_distance,
            ..self.config.params()
        };
        Ok(self.enhance_with(&frame, params).await?.to_packed())
    }

    pub async fn try_enhance(&self, frame: &RgbaFrame) -> RemediationResult<EnhanceReport> {
        self.try_enhance_with(frame, self.config.params()).await
    }

    /// Full pipeline with every failure surfaced.
    pub async fn try_enhance_with(
        &self,
        frame: &RgbaFrame,
        params: EnhanceParams,
    ) -> RemediationResult<EnhanceReport> {
        let started = Instant::now();
        params.validate()?;
        let view = frame.view()?;

        let Some(kernel) = self.backend.kernel() else {
            return Ok(EnhanceReport::passthrough(frame, BackendKind::Disabled, started));
        };

        let analysis = Arc::new(kernel.analyze(frame, &params)?);
        if analysis.pixels.is_empty() {
            debug!("no glyph pixels in {}x{} frame", frame.width, frame.height);
            return Ok(EnhanceReport::passthrough(frame, self.backend.kind(), started));
        }

        let pixels = &analysis.pixels;
        let regions = analysis.grid.region_count();
        let colours = estimate_region_colours(&view, pixels, regions);
        let coords: Vec<(u32, u32)> = pixels.iter().map(|p| (p.x, p.y)).collect();
        let coverage: Vec<u8> = pixels
            .iter()
            .map(|p| (p.coverage * 255.0).round().clamp(0.0, 255.0) as u8)
            .collect();
        let region_ids: Vec<u16> = pixels.iter().map(|p| p.region).collect();

        self.buffer.populate(&coords, &coverage, &region_ids, &colours)?;
        self.buffer.submit()?;

        let job = RemediationJob {
            frame: frame.clone(),
            analysis: Arc::clone(&analysis),
            params,
            cache: Arc::clone(&self.cache),
        };
        let handle = self.backend.spawn_remediation(job, Arc::clone(&self.buffer))?;

        let waited = self
            .buffer
            .wait_for_completion(self.config.completion_timeout(), self.config.poll_interval())
            .await;

        let backend_name = kernel.name().to_string();
        let joined = match waited {
            // Still running: the worker keeps the buffer until it finishes.
            Err(e @ RemediationError::Timeout { .. }) => {
                return Err(e.with_context(format!(
                    "{}x{} frame, {} glyph pixels",
                    frame.width,
                    frame.height,
                    pixels.len()
                )));
            }
            Err(RemediationError::ComputeFailed { .. }) | Ok(()) => handle.await,
            Err(e) => return Err(e),
        };
        let reports = match joined {
            Ok(Ok(reports)) => reports,
            Ok(Err(e)) => return Err(e),
            Err(join) => {
                return Err(RemediationError::compute_failed(backend_name, join.to_string()));
            }
        };

        let output = self.buffer.read_output()?;
        self.buffer.reset()?;

        let (frame_out, adjusted_pixels) = composite(frame, &analysis, &output, &reports, &self.cache)?;
        let unresolved_pixels = reports.iter().filter(|r| !r.result.meets_target()).count();

        debug!(
            "frame {}x{}: {} glyph pixels, {} adjusted, {} unresolved on {} backend",
            frame.width,
            frame.height,
            pixels.len(),
            adjusted_pixels,
            unresolved_pixels,
            self.backend.kind()
        );

        Ok(EnhanceReport {
            frame: frame_out,
            backend: self.backend.kind(),
            glyph_pixels: pixels.len(),
            regions,
            adjusted_pixels,
            unresolved_pixels,
            reports,
            elapsed: started.elapsed(),
        })
    }

    /// Raw outer offset field as flat `(dx, dy)` pairs, `width * height * 2` long.
    pub fn distance_field(&self, frame: &RgbaFrame) -> RemediationResult<Vec<f32>> {
        let params = self.config.params();
        let fields = match self.backend.kernel() {
            Some(kernel) => kernel.analyze(frame, &params)?.fields,
            None => {
                let view = frame.view()?;
                DistanceFields::compute(&CoverageField::from_rgba(&view))
            }
        };
        Ok(fields.outer.to_flat())
    }
}

/// Blend backend output into a packed copy of `frame`. Returns the new
/// frame and the number of pixels whose colour changed. Every written pixel
/// whose report meets the target meets it against its sampled background.
fn composite(
    frame: &RgbaFrame,
    analysis: &FrameAnalysis,
    output: &[[u8; 3]],
    reports: &[PixelReport],
    cache: &ColourCache,
) -> RemediationResult<(RgbaFrame, usize)> {
    if output.len() != analysis.pixels.len() || reports.len() != analysis.pixels.len() {
        return Err(RemediationError::validation(
            "output",
            format!("length must equal glyph pixel count {}", analysis.pixels.len()),
            output.len().to_string(),
        ));
    }

    let mut data = frame.to_packed();
    let row = frame.width as usize * 4;
    let mut changed = 0;
    for ((px, colour), report) in analysis.pixels.iter().zip(output).zip(reports) {
        if report.result.adjusted.is_none() {
            continue;
        }
        let alpha = px.coverage.clamp(0.0, 1.0);
        let t = (alpha + 0.5 * edge_weight(alpha) * (1.0 - alpha)).clamp(0.0, 1.0);
        let off = px.y as usize * row + px.x as usize * 4;
        let dst = &mut data[off..off + 4];
        let before = [dst[0], dst[1], dst[2]];
        let mut blended = before;
        for c in 0..3 {
            let o = before[c] as f32;
            blended[c] = (o + (colour[c] as f32 - o) * t).round().clamp(0.0, 255.0) as u8;
        }
        let result = &report.result;
        if result.meets_target() && cache.ratio(blended, report.background) < result.target {
            blended = match result.adjusted {
                Some(adjusted) if cache.ratio(*colour, report.background) < result.target => adjusted,
                _ => *colour,
            };
        }
        dst[..3].copy_from_slice(&blended);
        dst[3] = 255;
        if before != blended {
            changed += 1;
        }
    }

    Ok((RgbaFrame::new(data, frame.width, frame.height)?, changed))
}
