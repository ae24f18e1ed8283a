//! # Remediation Session
//!
//! Long-running frame loop around the [`Dispatcher`]: pull a captured frame,
//! enhance it, hand the overlay to a sink.
//!
//! ## Architecture
//!
//! 1. **FrameSource Trait**: where captured frames come from
//! 2. **OverlaySink Trait**: where enhanced frames go
//! 3. **SessionHandle**: closed flag plus generation counter, shared with the host
//! 4. **RemediationSessionBuilder**: fluent configuration
//!
//! ## Cancellation
//!
//! The loop re-checks the handle after every `.await`. Closing stops the loop
//! at the next resumption; bumping the generation (viewport moved, content
//! replaced) discards the frame in flight instead of presenting a stale
//! overlay.
//!
//! ## Failure Policy
//!
//! Recoverable per-frame errors skip the frame and the sink keeps showing
//! the previous overlay. Anything else ends the session with the error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use log::{debug, info, log};

use crate::config::EnhanceConfig;
use crate::error::{HasSeverity, Recoverable, RemediationError, RemediationResult};
use crate::frame::RgbaFrame;
use crate::processing::Dispatcher;

/// Abstract interface for captured frame sources.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted.
    async fn next_frame(&mut self) -> RemediationResult<Option<RgbaFrame>>;

    async fn initialize(&mut self) -> RemediationResult<()> {
        Ok(())
    }

    async fn shutdown(&mut self) -> RemediationResult<()> {
        Ok(())
    }
}

/// Receives overlays for compositing onto the page.
#[async_trait]
pub trait OverlaySink: Send {
    async fn present(&mut self, overlay: RgbaFrame, generation: u64) -> RemediationResult<()>;

    /// A frame was skipped; whatever overlay is showing stays.
    async fn keep_previous(&mut self, _reason: &RemediationError) -> RemediationResult<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct HandleState {
    closed: AtomicBool,
    generation: AtomicU64,
}

/// Cloneable control handle for a running session.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<HandleState>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Invalidate frames already in flight. Returns the new generation.
    pub fn invalidate(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Counters for one session run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_received: u64,
    pub frames_presented: u64,
    /// Recoverable failures; the previous overlay was kept.
    pub frames_skipped: u64,
    /// Finished after the generation moved on.
    pub frames_stale: u64,
    pub glyph_pixels: u64,
    pub adjusted_pixels: u64,
}

pub struct RemediationSession {
    dispatcher: Arc<Dispatcher>,
    source: Box<dyn FrameSource>,
    sink: Box<dyn OverlaySink>,
    handle: SessionHandle,
    max_frames: Option<u64>,
}

impl RemediationSession {
    pub fn builder() -> RemediationSessionBuilder {
        RemediationSessionBuilder::new()
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Run until the source is exhausted, the handle is closed, the frame
    /// limit is reached, or a non-recoverable error occurs.
    pub async fn run(mut self) -> RemediationResult<SessionStats> {
        self.source.initialize().await?;
        info!(
            "remediation session started on {} backend",
            self.dispatcher.backend_kind()
        );

        let result = self.frame_loop().await;
        let shutdown = self.source.shutdown().await;
        let stats = result?;
        shutdown?;

        info!(
            "remediation session finished: {} presented, {} skipped, {} stale",
            stats.frames_presented, stats.frames_skipped, stats.frames_stale
        );
        Ok(stats)
    }

    async fn frame_loop(&mut self) -> RemediationResult<SessionStats> {
        let mut stats = SessionStats::default();

        while !self.handle.is_closed() {
            if self.max_frames.is_some_and(|max| stats.frames_received >= max) {
                break;
            }

            let Some(frame) = self.source.next_frame().await? else {
                debug!("frame source exhausted");
                break;
            };
            if self.handle.is_closed() {
                break;
            }
            stats.frames_received += 1;
            let generation = self.handle.generation();

            let outcome = self.dispatcher.try_enhance(&frame).await;
            if self.handle.is_closed() {
                break;
            }

            match outcome {
                Ok(report) => {
                    if self.handle.generation() != generation {
                        debug!("discarding frame from generation {}", generation);
                        stats.frames_stale += 1;
                        continue;
                    }
                    stats.glyph_pixels += report.glyph_pixels as u64;
                    stats.adjusted_pixels += report.adjusted_pixels as u64;
                    self.sink.present(report.frame, generation).await?;
                    stats.frames_presented += 1;
                }
                Err(e) if e.is_recoverable() => {
                    log!(e.severity().log_level(), "frame skipped: {}", e);
                    stats.frames_skipped += 1;
                    self.sink.keep_previous(&e).await?;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(stats)
    }
}

/// Builder for [`RemediationSession`].
#[derive(Default)]
pub struct RemediationSessionBuilder {
    dispatcher: Option<Arc<Dispatcher>>,
    config: Option<EnhanceConfig>,
    source: Option<Box<dyn FrameSource>>,
    sink: Option<Box<dyn OverlaySink>>,
    handle: Option<SessionHandle>,
    max_frames: Option<u64>,
}

impl RemediationSessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing dispatcher (and its buffer and backend).
    pub fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Build a dedicated dispatcher from `config`. Ignored when a
    /// dispatcher is supplied.
    pub fn with_config(mut self, config: EnhanceConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_source<S: FrameSource + 'static>(mut self, source: S) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_sink<S: OverlaySink + 'static>(mut self, sink: S) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn with_handle(mut self, handle: SessionHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    pub fn build(self) -> RemediationResult<RemediationSession> {
        let source = self
            .source
            .ok_or_else(|| RemediationError::config("source", "none", "no frame source specified"))?;
        let sink = self
            .sink
            .ok_or_else(|| RemediationError::config("sink", "none", "no overlay sink specified"))?;
        let dispatcher = match self.dispatcher {
            Some(d) => d,
            None => Arc::new(Dispatcher::new(self.config.unwrap_or_default())?),
        };

        Ok(RemediationSession {
            dispatcher,
            source,
            sink,
            handle: self.handle.unwrap_or_default(),
            max_frames: self.max_frames,
        })
    }
}
