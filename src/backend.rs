//! # Compute Backends
//!
//! The per-frame kernel passes run on one of four tiers, chosen once when the
//! dispatcher is built:
//!
//! | Tier | Requires | Runs on |
//! |------|----------|---------|
//! | `Gpu` | a host-supplied [`ComputeKernel`] | the host's device |
//! | `Parallel` | shared memory and more than one thread | dedicated rayon pool |
//! | `Scalar` | nothing | single-thread rayon pool |
//! | `Disabled` | | frames pass through unchanged |
//!
//! A missing capability is logged once at selection and the chain moves to
//! the next tier; it is never re-probed mid-frame.

use std::fmt;
use std::sync::Arc;

use contrast_kernel::{
    BackgroundSampler, ColourCache, ContrastAnalyzer, ContrastResult, CoverageField, DistanceFields,
    EnhanceParams, GlyphPixel, Polarity, RegionGrid, extract_glyph_pixels,
};
use log::{info, log, warn};
use tokio::task::JoinHandle;

use crate::config::BackendPreference;
use crate::core::{ComputeGuard, TransferBuffer};
use crate::error::{HasSeverity, RemediationError, RemediationResult};
use crate::frame::RgbaFrame;

/// Everything the dispatcher learns about a frame before population.
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub width: u32,
    pub height: u32,
    pub coverage: CoverageField,
    pub fields: DistanceFields,
    pub grid: RegionGrid,
    /// Glyph pixels in raster order; the order the buffer is populated in.
    pub pixels: Vec<GlyphPixel>,
}

impl FrameAnalysis {
    pub fn polarity(&self) -> Polarity {
        self.coverage.polarity()
    }
}

/// Inputs the backend needs besides what the transfer buffer carries.
#[derive(Debug, Clone)]
pub struct RemediationJob {
    pub frame: RgbaFrame,
    pub analysis: Arc<FrameAnalysis>,
    pub params: EnhanceParams,
    pub cache: Arc<ColourCache>,
}

/// Diagnostics for one glyph pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelReport {
    pub x: u32,
    pub y: u32,
    pub region: u16,
    pub text: [u8; 3],
    pub background: [u8; 3],
    pub result: ContrastResult,
}

/// Kernel seam. The CPU kernel implements it for the parallel and scalar
/// tiers; hosts with a device kernel pass theirs through
/// [`Capabilities::with_gpu`].
pub trait ComputeKernel: Send + Sync {
    fn name(&self) -> &str;

    /// Coverage, signed distance fields and glyph pixels for `frame`.
    fn analyze(&self, frame: &RgbaFrame, params: &EnhanceParams) -> RemediationResult<FrameAnalysis>;

    /// Sample backgrounds and write one colour per populated pixel into the
    /// guard's output section: the original colour where the pixel already
    /// passes, the adjusted colour where it fails.
    ///
    /// Coords, coverage, region ids and region colours are read from the
    /// guard. The job's analysis supplies only the frame-sized coverage and
    /// distance fields, which the buffer does not carry.
    fn remediate(
        &self,
        job: &RemediationJob,
        guard: &mut ComputeGuard,
    ) -> RemediationResult<Vec<PixelReport>>;
}

/// Kernel passes on a private rayon pool.
pub struct CpuKernel {
    name: &'static str,
    pool: rayon::ThreadPool,
}

impl CpuKernel {
    pub fn new(name: &'static str, threads: usize) -> RemediationResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("contrast-{}-{}", name, i))
            .build()
            .map_err(|e| RemediationError::capability("thread pool", e.to_string()))?;
        Ok(Self { name, pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl fmt::Debug for CpuKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuKernel")
            .field("name", &self.name)
            .field("threads", &self.threads())
            .finish()
    }
}

impl ComputeKernel for CpuKernel {
    fn name(&self) -> &str {
        self.name
    }

    fn analyze(&self, frame: &RgbaFrame, params: &EnhanceParams) -> RemediationResult<FrameAnalysis> {
        let view = frame.view()?;
        Ok(self.pool.install(|| {
            let coverage = CoverageField::from_rgba(&view);
            let fields = DistanceFields::compute(&coverage);
            let grid = RegionGrid::new(frame.width, frame.height, params.region_tile);
            let pixels = extract_glyph_pixels(&coverage, &fields, &grid, params.max_distance);
            FrameAnalysis {
                width: frame.width,
                height: frame.height,
                coverage,
                fields,
                grid,
                pixels,
            }
        }))
    }

    fn remediate(
        &self,
        job: &RemediationJob,
        guard: &mut ComputeGuard,
    ) -> RemediationResult<Vec<PixelReport>> {
        let view = job.frame.view()?;
        let analysis = &job.analysis;
        let coords = guard.coords();
        let coverage = guard.coverage();
        let region_ids = guard.region_ids();
        let colours = guard.colours();

        let (w, h) = (analysis.width, analysis.height);
        if let Some(&(x, y)) = coords.iter().find(|&&(x, y)| x >= w || y >= h) {
            return Err(RemediationError::validation(
                "coords",
                format!("must lie inside the {}x{} frame", w, h),
                format!("({}, {})", x, y),
            ));
        }

        // Per-pixel inputs come from the buffer; only the frame-sized fields
        // travel in the analysis.
        let pixels: Vec<GlyphPixel> = coords
            .iter()
            .zip(&coverage)
            .zip(&region_ids)
            .map(|((&(x, y), &c), &region)| {
                let alpha = c as f32 / 255.0;
                let idx = y as usize * w as usize + x as usize;
                GlyphPixel {
                    x,
                    y,
                    coverage: alpha,
                    region,
                    offset: analysis.fields.outward(idx, alpha),
                }
            })
            .collect();

        let sampler: BackgroundSampler = job.params.sampler();
        let backgrounds = self
            .pool
            .install(|| sampler.sample(&view, &pixels, &analysis.coverage));

        let mut analyzer = ContrastAnalyzer::new(
            Arc::clone(&job.cache),
            job.params.target_contrast,
            job.params.adjust_iterations,
        );
        let target = job.params.target_contrast;
        let mut output = Vec::with_capacity(pixels.len());
        let mut reports = Vec::with_capacity(pixels.len());
        for (px, &background) in pixels.iter().zip(&backgrounds) {
            let region_colour = colours
                .get(px.region as usize)
                .copied()
                .ok_or_else(|| {
                    RemediationError::validation(
                        "region_ids",
                        format!("must be below region count {}", colours.len()),
                        px.region.to_string(),
                    )
                })?;
            let original = view.rgb(px.x, px.y);
            let mut text = region_colour;
            let mut result = analyzer.analyze(text, background);
            // A passing region can still hold a failing pixel (light edges).
            if result.passes && job.cache.ratio(original, background) < target {
                text = original;
                result = analyzer.analyze(text, background);
            }
            output.push(match result.adjusted {
                Some(adjusted) => adjusted,
                None => original,
            });
            reports.push(PixelReport {
                x: px.x,
                y: px.y,
                region: px.region,
                text,
                background,
                result,
            });
        }

        guard.write_output(&output)?;
        Ok(reports)
    }
}

/// What the host environment offers.
#[derive(Clone)]
pub struct Capabilities {
    pub shared_memory: bool,
    pub threads: usize,
    pub gpu: Option<Arc<dyn ComputeKernel>>,
}

impl Capabilities {
    /// Probe the current process. Anonymous shared mappings are always
    /// available natively; a GPU kernel must be supplied by the host.
    pub fn detect() -> Self {
        Self {
            shared_memory: true,
            threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
            gpu: None,
        }
    }

    pub fn with_gpu(mut self, kernel: Arc<dyn ComputeKernel>) -> Self {
        self.gpu = Some(kernel);
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_shared_memory(mut self, available: bool) -> Self {
        self.shared_memory = available;
        self
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::detect()
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("shared_memory", &self.shared_memory)
            .field("threads", &self.threads)
            .field("gpu", &self.gpu.as_ref().map(|k| k.name().to_string()))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Gpu,
    Parallel,
    Scalar,
    Disabled,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Gpu => "gpu",
            BackendKind::Parallel => "parallel",
            BackendKind::Scalar => "scalar",
            BackendKind::Disabled => "disabled",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The selected tier.
#[derive(Clone)]
pub enum Backend {
    Gpu(Arc<dyn ComputeKernel>),
    Parallel(Arc<CpuKernel>),
    Scalar(Arc<CpuKernel>),
    Disabled,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kernel() {
            Some(k) => write!(f, "Backend::{}({})", self.kind(), k.name()),
            None => write!(f, "Backend::{}", self.kind()),
        }
    }
}

fn note(missing: &mut Vec<RemediationError>, err: RemediationError) {
    log!(err.severity().log_level(), "{}; falling back", err);
    missing.push(err);
}

impl Backend {
    /// Walk the chain from the preferred tier down. Returns the chosen
    /// backend and one capability error per tier that was skipped.
    pub fn select(
        caps: &Capabilities,
        preference: BackendPreference,
        worker_threads: Option<usize>,
    ) -> (Backend, Vec<RemediationError>) {
        let start = match preference {
            BackendPreference::Disabled => {
                info!("contrast remediation disabled by configuration");
                return (Backend::Disabled, Vec::new());
            }
            BackendPreference::Auto | BackendPreference::Gpu => BackendKind::Gpu,
            BackendPreference::Parallel => BackendKind::Parallel,
            BackendPreference::Scalar => BackendKind::Scalar,
        };

        let mut missing = Vec::new();

        if start == BackendKind::Gpu {
            match &caps.gpu {
                Some(kernel) => {
                    info!("selected gpu backend ({})", kernel.name());
                    return (Backend::Gpu(Arc::clone(kernel)), missing);
                }
                None => note(
                    &mut missing,
                    RemediationError::capability("gpu", "no device kernel provided"),
                ),
            }
        }

        if matches!(start, BackendKind::Gpu | BackendKind::Parallel) {
            let threads = worker_threads.unwrap_or(caps.threads);
            if !caps.shared_memory {
                note(
                    &mut missing,
                    RemediationError::capability("shared memory", "parallel backend needs shared memory"),
                );
            } else if threads < 2 {
                note(
                    &mut missing,
                    RemediationError::capability(
                        "threads",
                        format!("parallel backend needs more than one thread, have {}", threads),
                    ),
                );
            } else {
                match CpuKernel::new("parallel", threads) {
                    Ok(kernel) => {
                        info!("selected parallel backend ({} threads)", threads);
                        return (Backend::Parallel(Arc::new(kernel)), missing);
                    }
                    Err(e) => note(&mut missing, e),
                }
            }
        }

        match CpuKernel::new("scalar", 1) {
            Ok(kernel) => {
                info!("selected scalar backend");
                (Backend::Scalar(Arc::new(kernel)), missing)
            }
            Err(e) => {
                note(&mut missing, e);
                warn!("no compute backend available; frames pass through unchanged");
                (Backend::Disabled, missing)
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Gpu(_) => BackendKind::Gpu,
            Backend::Parallel(_) => BackendKind::Parallel,
            Backend::Scalar(_) => BackendKind::Scalar,
            Backend::Disabled => BackendKind::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Backend::Disabled)
    }

    pub fn kernel(&self) -> Option<Arc<dyn ComputeKernel>> {
        match self {
            Backend::Gpu(k) => Some(Arc::clone(k)),
            Backend::Parallel(k) | Backend::Scalar(k) => Some(Arc::clone(k) as Arc<dyn ComputeKernel>),
            Backend::Disabled => None,
        }
    }

    /// Run the backend half of the handshake on a blocking worker.
    ///
    /// The worker takes the buffer from READY, writes output and stores
    /// COMPLETE, or ERROR if the kernel fails or panics.
    pub fn spawn_remediation(
        &self,
        job: RemediationJob,
        buffer: Arc<TransferBuffer>,
    ) -> RemediationResult<JoinHandle<RemediationResult<Vec<PixelReport>>>> {
        let kernel = self.kernel().ok_or_else(|| {
            RemediationError::state("disabled", "spawn_remediation", "no compute backend")
        })?;
        Ok(tokio::task::spawn_blocking(move || {
            let mut guard = buffer.begin_compute()?;
            match kernel.remediate(&job, &mut guard) {
                Ok(reports) => {
                    guard.complete();
                    Ok(reports)
                }
                Err(e) => {
                    let e = RemediationError::compute_failed(kernel.name(), e.to_string());
                    guard.fail(&e.to_string());
                    Err(e)
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ink_frame(w: u32, h: u32) -> RgbaFrame {
        let mut data = Vec::with_capacity((w * h * 4) as usize);
        for y in 0..h {
            for x in 0..w {
                let ink = (4..7).contains(&x) && (2..h - 2).contains(&y);
                let v = if ink { 0 } else { 255 };
                data.extend_from_slice(&[v, v, v, 255]);
            }
        }
        RgbaFrame::new(data, w, h).unwrap()
    }

    #[test]
    fn test_remediate_reads_pixels_from_buffer() {
        let kernel = CpuKernel::new("scalar", 1).unwrap();
        let frame = ink_frame(16, 12);
        let params = EnhanceParams::default();
        let analysis = Arc::new(kernel.analyze(&frame, &params).unwrap());
        assert!(analysis.pixels.len() > 2);

        // Only two pixels are populated, with a caller-chosen region colour.
        let buffer = Arc::new(TransferBuffer::new(64).unwrap());
        let picked = &analysis.pixels[..2];
        let coords: Vec<(u32, u32)> = picked.iter().map(|p| (p.x, p.y)).collect();
        buffer
            .populate(&coords, &[255, 200], &[0, 0], &[[10, 20, 30]])
            .unwrap();
        buffer.submit().unwrap();

        let job = RemediationJob {
            frame: frame.clone(),
            analysis,
            params,
            cache: Arc::new(ColourCache::new()),
        };
        let mut guard = buffer.begin_compute().unwrap();
        let reports = kernel.remediate(&job, &mut guard).unwrap();
        guard.complete();

        assert_eq!(reports.len(), 2);
        for (report, &(x, y)) in reports.iter().zip(&coords) {
            assert_eq!((report.x, report.y), (x, y));
            assert_eq!(report.region, 0);
            assert_eq!(report.text, [10, 20, 30]);
            assert!(report.result.passes);
        }
        assert_eq!(buffer.read_output().unwrap(), vec![[0, 0, 0]; 2]);
    }

    #[test]
    fn test_remediate_rejects_coords_outside_frame() {
        let kernel = CpuKernel::new("scalar", 1).unwrap();
        let frame = ink_frame(16, 12);
        let params = EnhanceParams::default();
        let analysis = Arc::new(kernel.analyze(&frame, &params).unwrap());

        let buffer = Arc::new(TransferBuffer::new(64).unwrap());
        buffer.populate(&[(40, 3)], &[255], &[0], &[[0, 0, 0]]).unwrap();
        buffer.submit().unwrap();

        let job = RemediationJob {
            frame,
            analysis,
            params,
            cache: Arc::new(ColourCache::new()),
        };
        let mut guard = buffer.begin_compute().unwrap();
        let err = kernel.remediate(&job, &mut guard).unwrap_err();
        assert_eq!(err.category(), "validation");
        assert!(err.to_string().contains("16x12"));
    }

    #[test]
    fn test_auto_without_gpu_picks_parallel() {
        let caps = Capabilities::detect().with_threads(4).with_shared_memory(true);
        let (backend, missing) = Backend::select(&caps, BackendPreference::Auto, None);
        assert_eq!(backend.kind(), BackendKind::Parallel);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].category(), "capability");
    }

    #[test]
    fn test_no_shared_memory_drops_to_scalar() {
        let caps = Capabilities::detect().with_threads(8).with_shared_memory(false);
        let (backend, missing) = Backend::select(&caps, BackendPreference::Auto, None);
        assert_eq!(backend.kind(), BackendKind::Scalar);
        assert_eq!(missing.len(), 2);
    }

    #[test]
    fn test_preference_is_a_ceiling() {
        let caps = Capabilities::detect().with_threads(4);
        let (backend, missing) = Backend::select(&caps, BackendPreference::Scalar, None);
        assert_eq!(backend.kind(), BackendKind::Scalar);
        assert!(missing.is_empty());

        let (backend, _) = Backend::select(&caps, BackendPreference::Disabled, None);
        assert!(!backend.is_enabled());
        assert!(backend.kernel().is_none());
    }

    #[test]
    fn test_gpu_kernel_from_host_wins() {
        let gpu: Arc<dyn ComputeKernel> = Arc::new(CpuKernel::new("fake-gpu", 1).unwrap());
        let caps = Capabilities::detect().with_gpu(gpu);
        let (backend, missing) = Backend::select(&caps, BackendPreference::Auto, None);
        assert_eq!(backend.kind(), BackendKind::Gpu);
        assert_eq!(backend.kernel().unwrap().name(), "fake-gpu");
        assert!(missing.is_empty());
    }

    #[test]
    fn test_single_thread_cannot_run_parallel() {
        let caps = Capabilities::detect().with_threads(1);
        let (backend, missing) = Backend::select(&caps, BackendPreference::Parallel, None);
        assert_eq!(backend.kind(), BackendKind::Scalar);
        assert_eq!(missing.len(), 1);
    }
}
