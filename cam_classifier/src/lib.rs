//! Classify live webcam frames with a pluggable image classifier.
//!
//! Startup runs through the [`orchestrator`]: the [`locator`] waits for a classifier library to
//! be exposed, the webcam is opened via [`sensors`], and the [`inference`] loop then downsamples
//! every frame into a [`raster`] buffer, classifies it and shows the top prediction on the
//! [`status`] line.

pub mod classifier;
pub mod inference;
pub mod locator;
pub mod meter;
pub mod onnx;
pub mod orchestrator;
pub mod raster;
pub mod sensors;
pub mod status;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
