//! Session loop tests with in-memory sources and sinks

mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{test_config, text_frame};
use contrast_remediation::{
    BackendPreference, Dispatcher, FrameSource, OverlaySink, RemediationError, RemediationResult,
    RemediationSession, RgbaFrame, SessionHandle,
};

/// Yields queued frames; a queued `Err` is returned once in its place.
struct QueueSource {
    frames: VecDeque<RemediationResult<RgbaFrame>>,
    shut_down: Arc<Mutex<bool>>,
}

impl QueueSource {
    fn new(frames: Vec<RemediationResult<RgbaFrame>>) -> Self {
        Self {
            frames: frames.into(),
            shut_down: Arc::new(Mutex::new(false)),
        }
    }
}

#[async_trait]
impl FrameSource for QueueSource {
    async fn next_frame(&mut self) -> RemediationResult<Option<RgbaFrame>> {
        self.frames.pop_front().transpose()
    }

    async fn shutdown(&mut self) -> RemediationResult<()> {
        *self.shut_down.lock().unwrap() = true;
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    presented: Arc<Mutex<Vec<(u64, RgbaFrame)>>>,
    kept: Arc<Mutex<Vec<String>>>,
    /// Invalidate the generation on the first present.
    invalidate: Option<SessionHandle>,
    /// Close the session after this many presents.
    close_after: Option<(usize, SessionHandle)>,
}

#[async_trait]
impl OverlaySink for RecordingSink {
    async fn present(&mut self, overlay: RgbaFrame, generation: u64) -> RemediationResult<()> {
        let mut presented = self.presented.lock().unwrap();
        presented.push((generation, overlay));
        if let Some(handle) = self.invalidate.take() {
            handle.invalidate();
        }
        if let Some((n, handle)) = &self.close_after {
            if presented.len() >= *n {
                handle.close();
            }
        }
        Ok(())
    }

    async fn keep_previous(&mut self, reason: &RemediationError) -> RemediationResult<()> {
        self.kept.lock().unwrap().push(reason.category().to_string());
        Ok(())
    }
}

fn dispatcher() -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(test_config(BackendPreference::Scalar)).unwrap())
}

fn low_contrast() -> RgbaFrame {
    text_frame(48, 24, [150, 150, 150], [255, 255, 255])
}

#[tokio::test]
async fn test_runs_until_source_exhausted() {
    let source = QueueSource::new(vec![Ok(low_contrast()), Ok(low_contrast())]);
    let shut_down = Arc::clone(&source.shut_down);
    let sink = RecordingSink::default();

    let stats = RemediationSession::builder()
        .with_dispatcher(dispatcher())
        .with_source(source)
        .with_sink(sink.clone())
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(stats.frames_received, 2);
    assert_eq!(stats.frames_presented, 2);
    assert_eq!(stats.frames_skipped, 0);
    assert!(stats.adjusted_pixels > 0);
    assert!(*shut_down.lock().unwrap());

    let presented = sink.presented.lock().unwrap();
    assert_eq!(presented.len(), 2);
    assert_ne!(presented[0].1.to_packed(), low_contrast().to_packed());
}

#[tokio::test]
async fn test_source_error_ends_session() {
    let source = QueueSource::new(vec![
        Ok(low_contrast()),
        Err(RemediationError::timeout("capture", 16)),
        Ok(low_contrast()),
    ]);
    let sink = RecordingSink::default();

    // Source errors are not per-frame enhancement failures.
    let err = RemediationSession::builder()
        .with_dispatcher(dispatcher())
        .with_source(source)
        .with_sink(sink.clone())
        .build()
        .unwrap()
        .run()
        .await
        .unwrap_err();
    assert_eq!(err.category(), "timeout");
    assert_eq!(sink.presented.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_fatal_and_recoverable_enhancement_failures() {
    // Capacity overflow ends the session.
    let config = contrast_remediation::EnhanceConfig {
        pixel_capacity: 4,
        ..test_config(BackendPreference::Scalar)
    };
    let err = RemediationSession::builder()
        .with_dispatcher(Arc::new(Dispatcher::new(config).unwrap()))
        .with_source(QueueSource::new(vec![Ok(low_contrast())]))
        .with_sink(RecordingSink::default())
        .build()
        .unwrap()
        .run()
        .await
        .unwrap_err();
    assert_eq!(err.category(), "capacity_overflow");

    // A buffer left in flight by a detached worker is a recoverable skip.
    let busy = dispatcher();
    busy
        .buffer()
        .populate(&[(0, 0)], &[255], &[0], &[[0, 0, 0]])
        .unwrap();
    busy.buffer().submit().unwrap();

    let sink = RecordingSink::default();
    let stats = RemediationSession::builder()
        .with_dispatcher(busy)
        .with_source(QueueSource::new(vec![Ok(low_contrast())]))
        .with_sink(sink.clone())
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(stats.frames_skipped, 1);
    assert_eq!(stats.frames_presented, 0);
    assert_eq!(*sink.kept.lock().unwrap(), vec!["state".to_string()]);
}

#[tokio::test]
async fn test_close_stops_the_loop() {
    let handle = SessionHandle::new();
    let frames = (0..5).map(|_| Ok(low_contrast())).collect();
    let sink = RecordingSink {
        close_after: Some((2, handle.clone())),
        ..Default::default()
    };

    let stats = RemediationSession::builder()
        .with_dispatcher(dispatcher())
        .with_source(QueueSource::new(frames))
        .with_sink(sink.clone())
        .with_handle(handle.clone())
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(handle.is_closed());
    assert_eq!(stats.frames_presented, 2);
    assert_eq!(stats.frames_received, 2);
}

#[tokio::test]
async fn test_max_frames_limit() {
    let frames = (0..5).map(|_| Ok(low_contrast())).collect();
    let stats = RemediationSession::builder()
        .with_dispatcher(dispatcher())
        .with_source(QueueSource::new(frames))
        .with_sink(RecordingSink::default())
        .max_frames(3)
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(stats.frames_received, 3);
}

#[tokio::test]
async fn test_presents_carry_generation() {
    let handle = SessionHandle::new();
    let sink = RecordingSink {
        invalidate: Some(handle.clone()),
        ..Default::default()
    };
    let frames = (0..2).map(|_| Ok(low_contrast())).collect();

    RemediationSession::builder()
        .with_dispatcher(dispatcher())
        .with_source(QueueSource::new(frames))
        .with_sink(sink.clone())
        .with_handle(handle)
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    let generations: Vec<u64> = sink.presented.lock().unwrap().iter().map(|(g, _)| *g).collect();
    assert_eq!(generations, vec![0, 1]);
}

#[test]
fn test_builder_without_dispatcher_uses_config() {
    let session = RemediationSession::builder()
        .with_config(test_config(BackendPreference::Disabled))
        .with_source(QueueSource::new(Vec::new()))
        .with_sink(RecordingSink::default())
        .build();
    assert!(session.is_ok());
}
