use std::sync::Arc;

use log::debug;

use crate::capture::Frame;
use crate::config::Settings;
use crate::error::ClassifyError;
use crate::model_loader::ModelLoader;

mod nsfw;

pub use nsfw::{HubModelSource, VitClassifier};

/// Label whose probability is the explicit-content score.
pub const EXPLICIT_LABEL: &str = "nsfw";

/// Probability the model assigned to one label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

impl LabelScore {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Pluggable image classification model.
pub trait ImageClassifier: Send + Sync {
    /// Full label distribution for one frame.
    fn predict(&self, frame: &Frame) -> anyhow::Result<Vec<LabelScore>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationResult {
    pub score: f64,
    pub is_explicit: bool,
}

/// Alert decision. Strictly greater: a score equal to the threshold is not an alert.
pub fn decide(score: f64, threshold: f64) -> bool {
    score > threshold
}

/// Explicit-content probability from a label distribution, 0 when the label is absent.
pub fn explicit_score(predictions: &[LabelScore]) -> f64 {
    predictions
        .iter()
        .find(|p| p.label.eq_ignore_ascii_case(EXPLICIT_LABEL))
        .map(|p| f64::from(p.score))
        .unwrap_or(0.0)
}

/// Scores frames with the loaded model and applies the current threshold.
pub struct ContentClassifier {
    loader: Arc<ModelLoader>,
    settings: Arc<Settings>,
}

impl ContentClassifier {
    pub fn new(loader: Arc<ModelLoader>, settings: Arc<Settings>) -> Self {
        Self { loader, settings }
    }

    pub fn classify(&self, frame: &Frame) -> Result<ClassificationResult, ClassifyError> {
        let model = self.loader.classifier().ok_or(ClassifyError::NotReady)?;
        let predictions = model
            .predict(frame)
            .map_err(|err| ClassifyError::Inference(format!("{err:#}")))?;

        let score = explicit_score(&predictions).clamp(0.0, 1.0);
        let threshold = self.settings.threshold();
        let is_explicit = decide(score, threshold);

        debug!(
            "[NSFW] score {:.4} vs threshold {:.2} -> {}",
            score,
            threshold,
            if is_explicit { "ALERT" } else { "clear" }
        );

        Ok(ClassificationResult { score, is_explicit })
    }
}
