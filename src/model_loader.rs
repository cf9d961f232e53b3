//! Load-once coordination for the classifier model.
//!
//! Exactly one physical load runs per process. Concurrent callers block on the
//! load mutex and then observe the settled outcome; late callers return
//! immediately. `Ready` and `Failed` are terminal.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Instant;

use log::{error, info};

use crate::content_filter::ImageClassifier;
use crate::error::LoadError;

/// Files a model source fetched before building the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub weights: PathBuf,
    pub config: PathBuf,
}

/// Where the classifier comes from.
pub trait ModelSource: Send + Sync {
    /// Obtain the model files, downloading them if needed.
    fn fetch(&self) -> anyhow::Result<ModelFiles>;

    /// Instantiate the classifier from fetched files.
    fn build(&self, files: &ModelFiles) -> anyhow::Result<Arc<dyn ImageClassifier>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready,
    Failed(String),
}

pub struct ModelLoader {
    source: Box<dyn ModelSource>,
    load_lock: Mutex<()>,
    state: RwLock<ModelState>,
    classifier: OnceLock<Arc<dyn ImageClassifier>>,
}

impl ModelLoader {
    pub fn new(source: impl ModelSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            load_lock: Mutex::new(()),
            state: RwLock::new(ModelState::Unloaded),
            classifier: OnceLock::new(),
        }
    }

    /// Snapshot of the current state. Never waits on an in-flight load.
    pub fn state(&self) -> ModelState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, next: ModelState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// The loaded classifier, once the state is `Ready`.
    pub fn classifier(&self) -> Option<Arc<dyn ImageClassifier>> {
        self.classifier.get().cloned()
    }

    /// Outcome of a load that already finished, if any.
    fn settled(&self) -> Option<Result<(), LoadError>> {
        match self.state() {
            ModelState::Ready => Some(Ok(())),
            ModelState::Failed(reason) => Some(Err(LoadError::Unavailable { reason })),
            ModelState::Unloaded | ModelState::Loading => None,
        }
    }

    /// Bring the model to `Ready`, reporting progress at 0, 50 and 100 percent.
    pub fn load<F>(&self, mut progress: F) -> Result<(), LoadError>
    where
        F: FnMut(u8, &str),
    {
        if let Some(outcome) = self.settled() {
            report_settled(&outcome, &mut progress);
            return outcome;
        }

        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);

        // Another caller may have finished while we waited for the lock.
        if let Some(outcome) = self.settled() {
            report_settled(&outcome, &mut progress);
            return outcome;
        }

        self.set_state(ModelState::Loading);
        let started = Instant::now();
        info!("Loading classifier model");
        progress(0, "Starting model load...");

        let built = self.source.fetch().and_then(|files| {
            progress(50, "Model files ready, initializing...");
            self.source.build(&files)
        });

        match built {
            Ok(classifier) => {
                let _ = self.classifier.set(classifier);
                self.set_state(ModelState::Ready);
                info!("Model loaded in {:.2}s", started.elapsed().as_secs_f64());
                progress(100, "Model loaded successfully!");
                Ok(())
            }
            Err(err) => {
                let reason = format!("{err:#}");
                error!("Failed to load model: {reason}");
                self.set_state(ModelState::Failed(reason.clone()));
                progress(100, &format!("Error: {reason}"));
                Err(LoadError::Unavailable { reason })
            }
        }
    }
}

fn report_settled<F: FnMut(u8, &str)>(outcome: &Result<(), LoadError>, progress: &mut F) {
    match outcome {
        Ok(()) => progress(100, "Model already loaded!"),
        Err(err) => progress(100, &format!("Error: {}", err.reason())),
    }
}
