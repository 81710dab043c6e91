//! Capture, downsample and classify frames until cancelled.
//!
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::{
    task::{spawn_blocking, JoinError, JoinHandle},
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    classifier::{format_prediction, ClassificationResult, Classifier, ClassifierError, Prediction},
    meter::METER,
    raster::RasterBuffer,
    sensors::{CaptureError, Video},
    status::StatusLine,
};

/// Longest accepted frame period.
const MAX_PERIOD: Duration = Duration::from_secs(3600);

#[derive(Debug, thiserror::Error)]
#[error("unusable refresh rate {0} Hz")]
pub struct RefreshRateError(pub f64);

/// Paces the loop at a display refresh rate.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    period: Duration,
}

impl FrameClock {
    /// Clock ticking `refresh_hz` times per second.
    ///
    /// The resulting period must be non-zero and at most an hour.
    pub fn new(refresh_hz: f64) -> Result<Self, RefreshRateError> {
        match Duration::try_from_secs_f64(1.0 / refresh_hz) {
            Ok(period) if refresh_hz > 0.0 && !period.is_zero() && period <= MAX_PERIOD => {
                Ok(Self { period })
            }
            _ => Err(RefreshRateError(refresh_hz)),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    fn start(&self) -> Interval {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        // A slow frame delays the next one instead of causing a burst
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("classification failed: {0}")]
    Classify(#[from] ClassifierError),
    #[error("frame processing task failed: {0}")]
    Join(#[from] JoinError),
}

/// Capture, downsample and classify. Every call blocks until a frame arrives.
struct Pipeline {
    classifier: Box<dyn Classifier>,
    video: Video,
    raster: RasterBuffer,
}

impl Pipeline {
    fn process(&mut self) -> Result<ClassificationResult, InferenceError> {
        let frame = self.video.current_frame()?;
        METER.tick_captured();

        self.raster.draw(&frame);
        let result = self.classifier.classify(self.raster.packed_pixels())?;
        METER.tick_classified();
        Ok(result)
    }
}

pub struct InferenceLoop {
    pipeline: Arc<Mutex<Pipeline>>,
    status: StatusLine,
    clock: FrameClock,
}

impl InferenceLoop {
    pub fn new(
        classifier: Box<dyn Classifier>,
        video: Video,
        raster: RasterBuffer,
        status: StatusLine,
        clock: FrameClock,
    ) -> Self {
        Self {
            pipeline: Arc::new(Mutex::new(Pipeline {
                classifier,
                video,
                raster,
            })),
            status,
            clock,
        }
    }

    /// Run one iteration and return the displayed prediction, if any.
    ///
    /// Capture and classification run on the blocking pool. An empty classification result
    /// leaves the status line unchanged.
    pub async fn step(&mut self) -> Result<Option<Prediction>, InferenceError> {
        let pipeline = Arc::clone(&self.pipeline);
        let result = spawn_blocking(move || {
            let mut pipeline = pipeline.lock().unwrap_or_else(PoisonError::into_inner);
            pipeline.process()
        })
        .await??;

        let top = result.top().cloned();
        if let Some(top) = &top {
            log::debug!("Top prediction {} ({})", &top.label, top.value);
            self.status.set(format_prediction(top));
        }
        Ok(top)
    }

    /// Classify frames until `cancel` fires.
    ///
    /// Dropped frames are skipped. A classifier failure stops the loop and is shown on the
    /// status line.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), InferenceError> {
        log::info!(
            "Inference loop started, one frame every {:?}",
            self.clock.period()
        );
        let mut ticker = self.clock.start();

        loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => break,
                step = self.step() => step,
            };
            match step {
                Ok(_) => (),
                Err(InferenceError::Capture(err)) => {
                    log::warn!("Unable to capture frame, trying again... ({err})")
                }
                Err(err) => {
                    log::error!("Inference stopped: {err}");
                    self.status.set(format!("Inference stopped: {err}"));
                    return Err(err);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => (),
            }
        }

        log::info!("Inference loop cancelled");
        Ok(())
    }

    /// Run the loop as its own task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<Result<(), InferenceError>> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod test {

    use std::sync::{atomic::Ordering, Arc};

    use super::*;
    use crate::{
        sensors::{setup_webcam, VideoConstraints},
        testing::{FakeClassifier, FakeDevices, FakeFrames},
        Error,
    };

    async fn build_loop(
        frames: FakeFrames,
        mut classifier: FakeClassifier,
        status: &StatusLine,
    ) -> Result<InferenceLoop, Error> {
        classifier.init().await?;
        let video = setup_webcam(
            Arc::new(FakeDevices::new(frames)),
            VideoConstraints::for_model(96, 96),
        )
        .await?;
        Ok(InferenceLoop::new(
            Box::new(classifier),
            video,
            RasterBuffer::new(96, 96),
            status.clone(),
            FrameClock::new(1000.0)?,
        ))
    }

    #[tokio::test]
    async fn test_step_shows_top_prediction() -> Result<(), Error> {
        let status = StatusLine::new();
        let mut inference = build_loop(
            FakeFrames::solid(384, 384, [255, 0, 0]),
            FakeClassifier::new(&[("A", 0.2), ("B", 0.9), ("C", 0.5)]),
            &status,
        )
        .await?;

        let top = inference.step().await?;

        assert_eq!(top.map(|p| p.label), Some("B".to_owned()));
        assert_eq!(status.text(), "B: 90.0%");
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_result_keeps_status() -> Result<(), Error> {
        let status = StatusLine::new();
        status.set("Running inference...");
        let mut inference = build_loop(
            FakeFrames::solid(384, 384, [0, 0, 0]),
            FakeClassifier::new(&[]),
            &status,
        )
        .await?;

        assert_eq!(inference.step().await?, None);
        assert_eq!(status.text(), "Running inference...");
        Ok(())
    }

    #[tokio::test]
    async fn test_run_until_cancelled() -> Result<(), Error> {
        let status = StatusLine::new();
        let mut rx = status.subscribe();
        let classifier = FakeClassifier::new(&[("cat", 0.75)]);
        let calls = classifier.calls();
        let inference = build_loop(FakeFrames::solid(96, 96, [1, 2, 3]), classifier, &status).await?;

        let cancel = CancellationToken::new();
        let handle = inference.spawn(cancel.clone());

        rx.changed().await?;
        assert_eq!(*rx.borrow(), "cat: 75.0%");
        while calls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        cancel.cancel();
        handle.await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_frames_are_skipped() -> Result<(), Error> {
        let status = StatusLine::new();
        let frames = FakeFrames::solid(384, 384, [0, 255, 0]);
        let inference = build_loop(
            frames.clone(),
            FakeClassifier::new(&[("plant", 0.5)]),
            &status,
        )
        .await?;
        // The first frame was consumed by the webcam setup
        let frames = frames.failing_first(2);

        let cancel = CancellationToken::new();
        let handle = inference.spawn(cancel.clone());

        let mut rx = status.subscribe();
        rx.changed().await?;
        assert_eq!(*rx.borrow(), "plant: 50.0%");
        assert!(frames.captured() >= 2);

        cancel.cancel();
        handle.await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_classifier_failure_stops_loop() -> Result<(), Error> {
        let status = StatusLine::new();
        let inference = build_loop(
            FakeFrames::solid(384, 384, [0, 0, 0]),
            FakeClassifier::new(&[("A", 1.0)]).failing_after(2),
            &status,
        )
        .await?;

        let res = inference.spawn(CancellationToken::new()).await?;

        assert!(matches!(res, Err(InferenceError::Classify(_))));
        assert_eq!(
            status.text(),
            "Inference stopped: classification failed: model error: out of memory"
        );
        Ok(())
    }

    #[test]
    fn test_frame_clock_period() -> Result<(), RefreshRateError> {
        assert_eq!(FrameClock::new(50.0)?.period(), Duration::from_millis(20));
        Ok(())
    }

    #[test]
    fn test_frame_clock_rejects_unusable_rates() {
        for rate in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 0.0, -1.0, 1e-9, 1e12] {
            assert!(FrameClock::new(rate).is_err(), "{rate} Hz was accepted");
        }
    }

    #[tokio::test]
    async fn test_slow_camera_does_not_block_runtime() -> Result<(), Error> {
        let status = StatusLine::new();
        let inference = build_loop(
            FakeFrames::solid(96, 96, [0, 0, 0]).with_delay(Duration::from_millis(300)),
            FakeClassifier::new(&[("A", 1.0)]),
            &status,
        )
        .await?;

        let cancel = CancellationToken::new();
        let handle = inference.spawn(cancel.clone());
        tokio::task::yield_now().await;

        // Short timers keep firing while the loop waits for a frame
        let ticks = tokio::time::timeout(Duration::from_millis(200), async {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(ticks.is_ok());

        cancel.cancel();
        handle.await??;
        Ok(())
    }
}
