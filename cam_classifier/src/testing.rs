//! Fakes for the camera and classifier seams.
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures::future::BoxFuture;
use image::{DynamicImage, Rgb, RgbImage};

use crate::{
    classifier::{ClassificationResult, Classifier, ClassifierError, Prediction},
    sensors::{CaptureError, FrameSource, MediaDevices, VideoConstraints},
};

/// Frame source returning the same image, optionally failing the first few captures.
#[derive(Clone)]
pub struct FakeFrames {
    frame: DynamicImage,
    delay: Duration,
    failures_left: Arc<AtomicUsize>,
    captured: Arc<AtomicUsize>,
}

impl FakeFrames {
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self {
            frame: DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(rgb))),
            delay: Duration::ZERO,
            failures_left: Arc::new(AtomicUsize::new(0)),
            captured: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_first(self, failures: usize) -> Self {
        self.failures_left.store(failures, Ordering::SeqCst);
        self
    }

    /// Block the calling thread for `delay` on every capture, like a camera waiting for a frame.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn captured(&self) -> usize {
        self.captured.load(Ordering::SeqCst)
    }
}

impl FrameSource for FakeFrames {
    fn capture(&mut self) -> Result<DynamicImage, CaptureError> {
        std::thread::sleep(self.delay);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CaptureError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "frame dropped",
            )));
        }
        self.captured.fetch_add(1, Ordering::SeqCst);
        Ok(self.frame.clone())
    }
}

pub struct FakeDevices {
    frames: Option<FakeFrames>,
    denial: String,
    requested: Mutex<Vec<VideoConstraints>>,
}

impl FakeDevices {
    pub fn new(frames: FakeFrames) -> Self {
        Self {
            frames: Some(frames),
            denial: String::new(),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn denied(reason: &str) -> Self {
        Self {
            frames: None,
            denial: reason.to_owned(),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<VideoConstraints> {
        self.requested.lock().unwrap().clone()
    }
}

impl MediaDevices for FakeDevices {
    fn get_user_media(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Box<dyn FrameSource>, CaptureError> {
        self.requested.lock().unwrap().push(*constraints);
        match &self.frames {
            Some(frames) => Ok(Box::new(frames.clone())),
            None => Err(CaptureError::Denied(self.denial.clone())),
        }
    }
}

/// Classifier returning a fixed result, or failing after a number of calls.
pub struct FakeClassifier {
    result: ClassificationResult,
    fail_after: Option<usize>,
    calls: Arc<AtomicUsize>,
    initialized: bool,
}

impl FakeClassifier {
    pub fn new(results: &[(&str, f32)]) -> Self {
        Self {
            result: ClassificationResult::new(
                results
                    .iter()
                    .map(|(label, value)| Prediction::new(*label, *value))
                    .collect(),
            ),
            fail_after: None,
            calls: Arc::new(AtomicUsize::new(0)),
            initialized: false,
        }
    }

    pub fn failing_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Classifier for FakeClassifier {
    fn init(&mut self) -> BoxFuture<'_, Result<(), ClassifierError>> {
        Box::pin(async move {
            self.initialized = true;
            Ok(())
        })
    }

    fn classify(&self, _pixels: &[u32]) -> Result<ClassificationResult, ClassifierError> {
        if !self.initialized {
            return Err(ClassifierError::NotInitialized);
        }
        let calls = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fail_after {
            Some(limit) if calls >= limit => Err(ClassifierError::Model(anyhow::anyhow!(
                "out of memory"
            ))),
            _ => Ok(self.result.clone()),
        }
    }
}
