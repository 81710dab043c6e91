//! Sensors module.
//!
//! Opening a camera follows the media-capture handshake: request a stream with a target
//! resolution, attach it to a [`Video`] and wait until the first frame tells us its dimensions.
use std::sync::Arc;

use image::{DynamicImage, GenericImageView, RgbImage};
use rscam::{Camera, Config};

/// Upscale factor between the classifier input and the requested capture resolution.
///
/// Capturing larger than the model input gives the downsampler more to work with.
pub const CAPTURE_SCALE: u32 = 4;

const MJPG: &[u8] = b"MJPG";

/// Source of live video frames.
pub trait FrameSource: Send {
    /// Capture the current frame.
    fn capture(&mut self) -> Result<DynamicImage, CaptureError>;
}

/// Access to the capture devices of the host.
pub trait MediaDevices: Send + Sync {
    /// Open a video stream matching `constraints` as closely as the device allows.
    fn get_user_media(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Box<dyn FrameSource>, CaptureError>;
}

/// Requested capture resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
}

impl VideoConstraints {
    pub fn for_model(width: u32, height: u32) -> Self {
        Self {
            width: width.saturating_mul(CAPTURE_SCALE),
            height: height.saturating_mul(CAPTURE_SCALE),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("could not open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no resolution found for MJPG")]
    NoResolution,
    #[error("no frame rate found for {0}x{1}")]
    NoFrameRate(u32, u32),
    #[error("failed to start stream: {0}")]
    Start(#[from] rscam::Error),
    #[error("failed to capture frame: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode frame: {0}")]
    Decode(#[from] turbojpeg::Error),
    #[error("{0}")]
    Denied(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WebcamError {
    #[error("Webcam access is required: {0}")]
    Access(#[source] CaptureError),
    #[error("webcam setup task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Video stream attached to its frame source, with known dimensions.
pub struct Video {
    source: Box<dyn FrameSource>,
    dimensions: (u32, u32),
}

impl Video {
    /// Dimensions reported by the first captured frame.
    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    pub fn current_frame(&mut self) -> Result<DynamicImage, CaptureError> {
        self.source.capture()
    }
}

/// Request a stream from `devices` and attach it once its dimensions are known.
pub async fn setup_webcam(
    devices: Arc<dyn MediaDevices>,
    constraints: VideoConstraints,
) -> Result<Video, WebcamError> {
    log::info!(
        "Requesting webcam stream at {}x{}",
        constraints.width,
        constraints.height
    );

    // Opening the device and waiting for the first frame both block
    let video = tokio::task::spawn_blocking(move || {
        let mut source = devices.get_user_media(&constraints)?;
        let first_frame = source.capture()?;
        Ok::<_, CaptureError>(Video {
            source,
            dimensions: first_frame.dimensions(),
        })
    })
    .await?
    .map_err(WebcamError::Access)?;

    log::info!(
        "Webcam stream ready at {}x{}",
        video.dimensions.0,
        video.dimensions.1
    );
    Ok(video)
}

/// V4L2 capture devices, streaming MJPG.
pub struct V4lDevices {
    device_name: String,
}

impl V4lDevices {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
        }
    }
}

impl MediaDevices for V4lDevices {
    fn get_user_media(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Box<dyn FrameSource>, CaptureError> {
        let mut cam = Camera::new(&self.device_name).map_err(|source| match source.kind() {
            std::io::ErrorKind::PermissionDenied => {
                CaptureError::Denied(format!("permission denied for {}", &self.device_name))
            }
            _ => CaptureError::Open {
                device: self.device_name.clone(),
                source,
            },
        })?;
        log_supported_formats(&cam);

        log::info!("Using camera {}", &self.device_name);

        let resolution =
            get_closest_resolution(&cam, (constraints.width, constraints.height))?;
        let frame_rate = get_max_frame_rate(&cam, resolution)?;
        log::debug!(
            "Starting {}x{} at interval {:?}",
            resolution.0,
            resolution.1,
            frame_rate
        );

        cam.start(&Config {
            interval: frame_rate,
            resolution,
            format: MJPG,
            ..Default::default()
        })?;

        Ok(Box::new(V4lCamera { cam }))
    }
}

/// Started V4L2 camera.
struct V4lCamera {
    cam: Camera,
}

impl FrameSource for V4lCamera {
    fn capture(&mut self) -> Result<DynamicImage, CaptureError> {
        let frame = self.cam.capture()?;
        let image: RgbImage = turbojpeg::decompress_image(&frame[..])?;
        Ok(DynamicImage::ImageRgb8(image))
    }
}

/// Get the supported resolution closest to `target`.
fn get_closest_resolution(cam: &Camera, target: (u32, u32)) -> Result<(u32, u32), CaptureError> {
    let resolution_info = cam.resolutions(MJPG)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => closest_resolution(&resolutions, target),
        rscam::ResolutionInfo::Stepwise { min, max, step } => {
            Some(stepwise_resolution(min, max, step, target))
        }
    }
    .ok_or(CaptureError::NoResolution)
}

/// Pick the candidate with the smallest relative deviation from `target` in both dimensions.
fn closest_resolution(candidates: &[(u32, u32)], target: (u32, u32)) -> Option<(u32, u32)> {
    let deviation = |&(width, height): &(u32, u32)| {
        let dw = (width as f32 - target.0 as f32).abs() / target.0.max(1) as f32;
        let dh = (height as f32 - target.1 as f32).abs() / target.1.max(1) as f32;
        dw + dh
    };
    candidates
        .iter()
        .min_by(|a, b| deviation(a).total_cmp(&deviation(b)))
        .copied()
}

/// Clamp `target` into a stepwise range, snapping down onto the step grid.
fn stepwise_resolution(
    min: (u32, u32),
    max: (u32, u32),
    step: (u32, u32),
    target: (u32, u32),
) -> (u32, u32) {
    let snap = |min: u32, max: u32, step: u32, target: u32| {
        let clamped = target.clamp(min, max);
        match step {
            0 => clamped,
            step => min + (clamped - min) / step * step,
        }
    };
    (
        snap(min.0, max.0, step.0, target.0),
        snap(min.1, max.1, step.1, target.1),
    )
}

/// Get the maximum supported frame rate for the given resolution.
fn get_max_frame_rate(cam: &Camera, resolution: (u32, u32)) -> Result<(u32, u32), CaptureError> {
    let interval_info = cam.intervals(MJPG, resolution)?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(intervals) => fastest_interval(&intervals),
        // The shortest interval is the highest frame rate
        rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
    }
    .ok_or(CaptureError::NoFrameRate(resolution.0, resolution.1))
}

/// Shortest frame interval, given as `(numerator, denominator)` seconds.
fn fastest_interval(intervals: &[(u32, u32)]) -> Option<(u32, u32)> {
    intervals
        .iter()
        .filter(|(_, denominator)| *denominator > 0)
        .min_by(|a, b| {
            let a = a.0 as f32 / a.1 as f32;
            let b = b.0 as f32 / b.1 as f32;
            a.total_cmp(&b)
        })
        .copied()
}

fn log_supported_formats(cam: &Camera) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!("Supported formats: {:?}, using MJPG", formats);
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::{
        testing::{FakeDevices, FakeFrames},
        Error,
    };

    #[test]
    fn test_constraints_scale_model_size() {
        assert_eq!(
            VideoConstraints::for_model(96, 96),
            VideoConstraints {
                width: 384,
                height: 384
            }
        );
        assert_eq!(VideoConstraints::for_model(u32::MAX, 1).width, u32::MAX);
    }

    #[test]
    fn test_closest_resolution() {
        let candidates = [(160, 120), (320, 240), (640, 480), (1280, 720)];
        assert_eq!(closest_resolution(&candidates, (384, 384)), Some((320, 240)));
        assert_eq!(closest_resolution(&candidates, (1920, 1080)), Some((1280, 720)));
        assert_eq!(closest_resolution(&[], (384, 384)), None);
    }

    #[test]
    fn test_stepwise_resolution() {
        assert_eq!(
            stepwise_resolution((16, 16), (1920, 1080), (8, 8), (384, 384)),
            (384, 384)
        );
        assert_eq!(
            stepwise_resolution((16, 16), (320, 240), (8, 8), (384, 384)),
            (320, 240)
        );
        assert_eq!(
            stepwise_resolution((10, 10), (100, 100), (4, 4), (23, 23)),
            (22, 22)
        );
    }

    #[test]
    fn test_fastest_interval() {
        assert_eq!(fastest_interval(&[(1, 15), (1, 30), (1, 5)]), Some((1, 30)));
        assert_eq!(fastest_interval(&[(1, 0)]), None);
    }

    #[tokio::test]
    async fn test_setup_webcam_reports_dimensions() -> Result<(), Error> {
        let devices = Arc::new(FakeDevices::new(FakeFrames::solid(384, 288, [0, 0, 0])));

        let video = setup_webcam(devices.clone(), VideoConstraints::for_model(96, 96)).await?;

        assert_eq!(video.dimensions(), (384, 288));
        assert_eq!(
            devices.requested(),
            vec![VideoConstraints {
                width: 384,
                height: 384
            }]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_denied_access_includes_cause() {
        let devices = Arc::new(FakeDevices::denied("permission denied"));

        let res = setup_webcam(devices, VideoConstraints::for_model(96, 96)).await;

        match res {
            Err(err @ WebcamError::Access(_)) => {
                assert_eq!(err.to_string(), "Webcam access is required: permission denied")
            }
            Err(err) => panic!("unexpected error {err}"),
            Ok(_) => panic!("access should be denied"),
        }
    }
}
