//! Fixed-period detection poll on a dedicated OS thread.
//!
//! One thread owns the camera and the analyzer, so detections never overlap:
//! a slow detection simply delays the next tick. Results are published into a
//! `watch` channel; only the latest observation matters.

use fragmentor_core::{Analyzer, Detection, DetectorAdapter};
use fragmentor_hw::{Camera, CameraError, Frame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Anything that yields grayscale frames.
pub trait FrameSource: Send {
    /// False while the device cannot deliver a frame yet; the tick is skipped.
    fn is_ready(&self) -> bool;
    fn capture(&mut self) -> Result<Frame, CameraError>;
}

impl FrameSource for Camera {
    fn is_ready(&self) -> bool {
        true
    }

    fn capture(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

/// Latest poll result.
#[derive(Clone, Default)]
pub struct Observation {
    pub detection: Option<Detection>,
    /// Frame the detection came from; `None` if the capture failed.
    pub frame: Option<Arc<Frame>>,
    /// Ticks completed since start, skipped ones excluded.
    pub sequence: u64,
}

impl Observation {
    pub fn frame_size(&self) -> (u32, u32) {
        self.frame.as_ref().map(|f| (f.width, f.height)).unwrap_or((0, 0))
    }
}

/// Running poll loop. Stopping (explicitly or on drop) joins the thread, so
/// no tick runs after teardown.
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        thread.thread().unpark();
        if thread.join().is_err() {
            tracing::error!("capture thread panicked");
        }
        tracing::info!("capture stopped");
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct CaptureSession;

impl CaptureSession {
    /// Spawn the poll loop with the given period.
    pub fn start<S, A>(
        mut source: S,
        mut adapter: DetectorAdapter<A>,
        period: Duration,
    ) -> std::io::Result<(CaptureHandle, watch::Receiver<Observation>)>
    where
        S: FrameSource + 'static,
        A: Analyzer + Send + 'static,
    {
        let (tx, rx) = watch::channel(Observation::default());
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let thread = std::thread::Builder::new()
            .name("fragmentor-capture".into())
            .spawn(move || {
                tracing::info!(period_ms = period.as_millis() as u64, "capture thread started");
                let mut sequence = 0u64;
                while !stop_flag.load(Ordering::SeqCst) {
                    let started = Instant::now();
                    if let Some(obs) = poll_once(&mut source, &mut adapter, sequence + 1) {
                        sequence = obs.sequence;
                        tx.send_replace(obs);
                    }
                    // No catch-up: an overrunning tick just starts the next one late.
                    if let Some(rest) = period.checked_sub(started.elapsed()) {
                        std::thread::park_timeout(rest);
                    }
                }
                tracing::info!(ticks = sequence, failed_frames = adapter.failed_frames(), "capture thread exiting");
            })?;

        Ok((
            CaptureHandle {
                stop,
                thread: Some(thread),
            },
            rx,
        ))
    }
}

/// One tick. `None` means the source was not ready and nothing is published.
fn poll_once<S: FrameSource, A: Analyzer>(
    source: &mut S,
    adapter: &mut DetectorAdapter<A>,
    sequence: u64,
) -> Option<Observation> {
    if !source.is_ready() {
        tracing::trace!("source not ready; skipping tick");
        return None;
    }

    match source.capture() {
        Ok(frame) => {
            let detection = adapter.detect(&frame.data, frame.width, frame.height);
            Some(Observation {
                detection,
                frame: Some(Arc::new(frame)),
                sequence,
            })
        }
        Err(e) => {
            tracing::debug!(error = %e, "capture failed; publishing no detection");
            Some(Observation {
                detection: None,
                frame: None,
                sequence,
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use fragmentor_core::AnalyzerError;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    pub(crate) fn frame(width: u32, height: u32) -> Frame {
        Frame {
            data: vec![128; (width * height) as usize],
            width,
            height,
            timestamp: Instant::now(),
            sequence: 0,
            is_dark: false,
        }
    }

    pub(crate) struct FakeSource {
        pub ready: bool,
        pub frames: VecDeque<Result<Frame, CameraError>>,
    }

    impl FrameSource for FakeSource {
        fn is_ready(&self) -> bool {
            self.ready
        }

        fn capture(&mut self) -> Result<Frame, CameraError> {
            self.frames.pop_front().unwrap_or_else(|| Ok(frame(8, 8)))
        }
    }

    /// Returns scripted results, then "no face" forever. Counts calls.
    pub(crate) struct FakeAnalyzer {
        pub results: VecDeque<Result<Option<Detection>, AnalyzerError>>,
        pub calls: Arc<AtomicUsize>,
    }

    impl Analyzer for FakeAnalyzer {
        fn analyze(&mut self, _: &[u8], _: u32, _: u32) -> Result<Option<Detection>, AnalyzerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results.pop_front().unwrap_or(Ok(None))
        }
    }

    pub(crate) fn face(x: f32) -> Detection {
        use fragmentor_core::types::{BoundingBox, Gender, Point, RawDetection};
        Detection::try_from_raw(RawDetection {
            bbox: BoundingBox { x, y: 100.0, width: 120.0, height: 150.0, confidence: 0.9 },
            landmarks: (0..68).map(|i| Point::new(x + i as f32, 150.0)).collect(),
            expressions: vec![("neutral".to_string(), 0.2), ("happy".to_string(), 0.8)],
            age: 31.0,
            gender: Gender::Male,
            gender_probability: 0.95,
        })
        .unwrap()
    }

    fn analyzer(results: Vec<Result<Option<Detection>, AnalyzerError>>) -> (DetectorAdapter<FakeAnalyzer>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = DetectorAdapter::new(FakeAnalyzer {
            results: results.into(),
            calls: calls.clone(),
        });
        (adapter, calls)
    }

    #[test]
    fn test_unready_source_skips_tick() {
        let mut source = FakeSource { ready: false, frames: VecDeque::new() };
        let (mut adapter, calls) = analyzer(vec![]);
        assert!(poll_once(&mut source, &mut adapter, 1).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_detection_published_with_frame() {
        let mut source = FakeSource { ready: true, frames: VecDeque::from([Ok(frame(640, 360))]) };
        let (mut adapter, _) = analyzer(vec![Ok(Some(face(200.0)))]);
        let obs = poll_once(&mut source, &mut adapter, 7).unwrap();
        assert!(obs.detection.is_some());
        assert_eq!(obs.frame_size(), (640, 360));
        assert_eq!(obs.sequence, 7);
    }

    #[test]
    fn test_analyzer_error_publishes_none() {
        let mut source = FakeSource { ready: true, frames: VecDeque::new() };
        let (mut adapter, _) = analyzer(vec![Err(AnalyzerError::Inference("bad tensor".into()))]);
        let obs = poll_once(&mut source, &mut adapter, 1).unwrap();
        assert!(obs.detection.is_none());
        assert!(obs.frame.is_some());
        assert_eq!(adapter.failed_frames(), 1);
    }

    #[test]
    fn test_capture_error_publishes_none() {
        let mut source = FakeSource {
            ready: true,
            frames: VecDeque::from([Err(CameraError::CaptureFailed("dequeue".into()))]),
        };
        let (mut adapter, calls) = analyzer(vec![]);
        let obs = poll_once(&mut source, &mut adapter, 1).unwrap();
        assert!(obs.detection.is_none());
        assert!(obs.frame.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_session_publishes_and_stops() {
        let source = FakeSource { ready: true, frames: VecDeque::new() };
        let (adapter, calls) = analyzer(vec![Ok(Some(face(10.0)))]);
        let (mut handle, mut rx) =
            CaptureSession::start(source, adapter, Duration::from_millis(5)).unwrap();

        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("no observation published")
            .unwrap();
        assert!(rx.borrow().sequence >= 1);

        handle.stop();
        let after_stop = calls.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(calls.load(Ordering::SeqCst), after_stop, "tick ran after stop");
        // Idempotent.
        handle.stop();
    }

    #[test]
    fn test_slow_detection_does_not_burst() {
        struct Slow(Arc<AtomicUsize>);
        impl Analyzer for Slow {
            fn analyze(&mut self, _: &[u8], _: u32, _: u32) -> Result<Option<Detection>, AnalyzerError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(40));
                Ok(None)
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let source = FakeSource { ready: true, frames: VecDeque::new() };
        let (handle, _rx) = CaptureSession::start(
            source,
            DetectorAdapter::new(Slow(calls.clone())),
            Duration::from_millis(5),
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(200));
        drop(handle);

        // At most one call per 40 ms; a catch-up burst would far exceed this.
        assert!(calls.load(Ordering::SeqCst) <= 6);
    }
}
