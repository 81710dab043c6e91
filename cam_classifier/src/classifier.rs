//! Contract between the inference loop and a classifier library.
//!
use futures::future::BoxFuture;

/// A label with its confidence score.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub value: f32,
}

impl Prediction {
    pub fn new(label: impl Into<String>, value: f32) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Scores produced for a single frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationResult {
    pub results: Vec<Prediction>,
}

impl ClassificationResult {
    pub fn new(results: Vec<Prediction>) -> Self {
        Self { results }
    }

    /// Entry with the highest score. Ties resolve to any of the maximal entries.
    pub fn top(&self) -> Option<&Prediction> {
        self.results
            .iter()
            .filter(|prediction| !prediction.value.is_nan())
            .max_by(|a, b| a.value.total_cmp(&b.value))
    }
}

/// Render a prediction as `<label>: <percent>%` with one decimal.
pub fn format_prediction(prediction: &Prediction) -> String {
    format!("{}: {:.1}%", prediction.label, prediction.value * 100.0)
}

/// Image classifier operating on packed `0xRRGGBB` pixels.
pub trait Classifier: Send {
    /// Prepare the classifier. Must complete before the first call to `classify`.
    fn init(&mut self) -> BoxFuture<'_, Result<(), ClassifierError>>;

    /// Classify one frame given as row-major packed pixels.
    fn classify(&self, pixels: &[u32]) -> Result<ClassificationResult, ClassifierError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier is not initialized")]
    NotInitialized,
    #[error("expected {expected} pixels, got {actual}")]
    InputSize { expected: usize, actual: usize },
    #[error("model produced {scores} scores for {labels} labels")]
    LabelMismatch { scores: usize, labels: usize },
    #[error("failed to read model files: {0}")]
    Io(#[from] std::io::Error),
    #[error("model error: {0}")]
    Model(#[from] anyhow::Error),
}
