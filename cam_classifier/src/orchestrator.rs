//! Startup sequence: locate the classifier, initialize it, open the webcam, start the loop.
//!
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    classifier::ClassifierError,
    inference::{FrameClock, InferenceError, InferenceLoop},
    locator::{Bindings, Locator, LocatorConfig, LocatorError},
    raster::RasterBuffer,
    sensors::{setup_webcam, MediaDevices, VideoConstraints, WebcamError},
    status::{StatusLine, RUNNING, SEARCHING},
};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Locate(#[from] LocatorError),
    #[error("classifier initialization failed: {0}")]
    Init(#[from] ClassifierError),
    #[error(transparent)]
    Webcam(#[from] WebcamError),
}

pub struct Orchestrator {
    pub bindings: Arc<Bindings>,
    pub locator: LocatorConfig,
    pub devices: Arc<dyn MediaDevices>,
    /// Input size of the classifier as `(width, height)`.
    pub model_size: (u32, u32),
    pub clock: FrameClock,
    pub status: StatusLine,
}

impl Orchestrator {
    /// Bring everything up and spawn the inference loop.
    ///
    /// Any failure aborts startup and is left on the status line. There is no retry.
    pub async fn start(
        self,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<Result<(), InferenceError>>, StartupError> {
        match self.bring_up().await {
            Ok(inference) => {
                self.status.set(RUNNING);
                Ok(inference.spawn(cancel))
            }
            Err(err) => {
                log::error!("Startup failed: {err}");
                self.status.set(format!("Failed: {err}"));
                Err(err)
            }
        }
    }

    async fn bring_up(&self) -> Result<InferenceLoop, StartupError> {
        self.status.set(SEARCHING);

        let locator = Locator::new(Arc::clone(&self.bindings), self.locator.clone());
        let mut classifier = locator.locate().await?;
        classifier.init().await?;

        let (width, height) = self.model_size;
        let video = setup_webcam(
            Arc::clone(&self.devices),
            VideoConstraints::for_model(width, height),
        )
        .await?;

        Ok(InferenceLoop::new(
            classifier,
            video,
            RasterBuffer::new(width, height),
            self.status.clone(),
            self.clock,
        ))
    }
}
