//! ONNX image classifier and the loader exposing it to the [`locator`](crate::locator).
//!
use std::{
    io::Cursor,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::future::BoxFuture;
use tract_onnx::prelude::*;

use crate::{
    classifier::{ClassificationResult, Classifier, ClassifierError, Prediction},
    locator::{Bindings, Constructor, Module, ModuleFactory},
    raster::unpack_rgb,
};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Memory layout of the model input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TensorLayout {
    /// `[1, height, width, 3]`
    #[default]
    Nhwc,
    /// `[1, 3, height, width]`
    Nchw,
}

/// Shape under which the library announces itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LibraryShape {
    Constructor,
    #[default]
    Factory,
    Module,
}

/// Files and input geometry of an ONNX classifier.
#[derive(Debug, Clone)]
pub struct ModelSource {
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub layout: TensorLayout,
}

/// Model and labels read into memory, ready to construct classifiers from.
#[derive(Clone)]
pub struct OnnxLibrary {
    model_bytes: Arc<Vec<u8>>,
    labels: Arc<Vec<String>>,
    width: u32,
    height: u32,
    layout: TensorLayout,
}

impl OnnxLibrary {
    pub async fn load(source: &ModelSource) -> Result<Self, ClassifierError> {
        log::info!("Loading model {}", source.model_path.display());
        let model_bytes = tokio::fs::read(&source.model_path).await?;
        let labels = parse_labels(&tokio::fs::read_to_string(&source.labels_path).await?);
        log::debug!("Model has {} labels", labels.len());

        Ok(Self {
            model_bytes: Arc::new(model_bytes),
            labels: Arc::new(labels),
            width: source.width,
            height: source.height,
            layout: source.layout,
        })
    }

    pub fn constructor(self) -> Constructor {
        Arc::new(move || -> Result<Box<dyn Classifier>, ClassifierError> {
            Ok(Box::new(OnnxClassifier::new(&self)))
        })
    }
}

/// Publish the ONNX classifier described by `source` in `bindings`.
///
/// With [`LibraryShape::Factory`] the files are only read once the factory is invoked, the
/// other shapes read them before exposing anything.
pub async fn expose_onnx_library(
    bindings: &Bindings,
    source: ModelSource,
    shape: LibraryShape,
) -> Result<(), ClassifierError> {
    match shape {
        LibraryShape::Constructor => {
            let library = OnnxLibrary::load(&source).await?;
            bindings.expose_constructor(library.constructor()).await;
        }
        LibraryShape::Factory => {
            let factory: ModuleFactory =
                Arc::new(move || -> BoxFuture<'static, Result<Module, ClassifierError>> {
                    let source = source.clone();
                    Box::pin(async move {
                        let library = OnnxLibrary::load(&source).await?;
                        Ok(Module::with_constructor(library.constructor()))
                    })
                });
            bindings.expose_factory(factory).await;
        }
        LibraryShape::Module => {
            let library = OnnxLibrary::load(&source).await?;
            bindings
                .expose_module(Module::with_constructor(library.constructor()))
                .await;
        }
    }
    log::info!("Classifier library exposed as {:?}", shape);
    Ok(())
}

pub struct OnnxClassifier {
    library: OnnxLibrary,
    model: Option<NnModel>,
}

impl OnnxClassifier {
    pub fn new(library: &OnnxLibrary) -> Self {
        Self {
            library: library.clone(),
            model: None,
        }
    }

    fn input_shape(&self) -> [usize; 4] {
        let (width, height) = (self.library.width as usize, self.library.height as usize);
        match self.library.layout {
            TensorLayout::Nhwc => [1, height, width, 3],
            TensorLayout::Nchw => [1, 3, height, width],
        }
    }
}

impl Classifier for OnnxClassifier {
    fn init(&mut self) -> BoxFuture<'_, Result<(), ClassifierError>> {
        Box::pin(async move {
            let model_bytes = Arc::clone(&self.library.model_bytes);
            let shape = self.input_shape();

            // Optimizing the graph is CPU bound
            let model = tokio::task::spawn_blocking(move || build_model(&model_bytes, shape))
                .await
                .map_err(|err| ClassifierError::Model(err.into()))??;

            self.model = Some(model);
            log::info!("Classifier initialized with input {:?}", shape);
            Ok(())
        })
    }

    fn classify(&self, pixels: &[u32]) -> Result<ClassificationResult, ClassifierError> {
        let (width, height) = (self.library.width, self.library.height);
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(ClassifierError::InputSize {
                expected,
                actual: pixels.len(),
            });
        }
        let model = self.model.as_ref().ok_or(ClassifierError::NotInitialized)?;

        let input = pixels_to_tensor(pixels, width, height, self.library.layout);
        let output = model.run(tvec!(input.into()))?;

        let scores: Vec<f32> = output[0].to_array_view::<f32>()?.iter().copied().collect();
        if scores.len() != self.library.labels.len() {
            return Err(ClassifierError::LabelMismatch {
                scores: scores.len(),
                labels: self.library.labels.len(),
            });
        }

        let results = self
            .library
            .labels
            .iter()
            .zip(normalize_scores(scores))
            .map(|(label, value)| Prediction::new(label.clone(), value))
            .collect();

        Ok(ClassificationResult::new(results))
    }
}

fn build_model(model_bytes: &[u8], shape: [usize; 4]) -> Result<NnModel, ClassifierError> {
    let input_fact = InferenceFact::dt_shape(
        f32::datum_type(),
        tvec!(shape[0], shape[1], shape[2], shape[3]),
    );
    let model = tract_onnx::onnx()
        .model_for_read(&mut Cursor::new(model_bytes))?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// Unpack pixels into a float tensor with channels scaled to `[0, 1]`.
fn pixels_to_tensor(pixels: &[u32], width: u32, height: u32, layout: TensorLayout) -> Tensor {
    let (width, height) = (width as usize, height as usize);
    let channel =
        |x: usize, y: usize, c: usize| unpack_rgb(pixels[y * width + x])[c] as f32 / 255.0;

    match layout {
        TensorLayout::Nhwc => {
            tract_ndarray::Array4::from_shape_fn((1, height, width, 3), |(_, y, x, c)| {
                channel(x, y, c)
            })
            .into()
        }
        TensorLayout::Nchw => {
            tract_ndarray::Array4::from_shape_fn((1, 3, height, width), |(_, c, y, x)| {
                channel(x, y, c)
            })
            .into()
        }
    }
}

/// Pass probabilities through, turn anything else (logits) into probabilities with a softmax.
fn normalize_scores(scores: Vec<f32>) -> Vec<f32> {
    let in_range = scores.iter().all(|score| (0.0..=1.0).contains(score));
    let sum: f32 = scores.iter().sum();
    if scores.is_empty() || (in_range && (sum - 1.0).abs() < 1.0e-3) {
        return scores;
    }

    // Subtract the maximum to keep `exp` from overflowing
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|score| (score - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// One label per line, blank lines skipped.
fn parse_labels(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Default location of downloaded model files.
pub fn default_model_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("cam_classifier"))
}

/// Resolve `file_name` inside the default model directory.
pub fn default_model_file(file_name: impl AsRef<Path>) -> PathBuf {
    default_model_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(file_name)
}
