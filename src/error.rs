//! Error types for mindwall.
//!
//! Each subsystem gets its own enum so the monitor can decide per variant
//! whether a failure skips a cycle, is only logged, or stops startup.

use std::path::PathBuf;

use thiserror::Error;

/// The model could not be brought to the ready state.
///
/// Cloneable because every caller of the loader, concurrent or late,
/// observes the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("model unavailable: {reason}")]
    Unavailable { reason: String },
}

impl LoadError {
    pub fn reason(&self) -> &str {
        match self {
            LoadError::Unavailable { reason } => reason,
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("No displays available for capture")]
    NoDisplay,

    #[error("Screen capture is not supported on this platform")]
    Unsupported,

    #[error("Frame buffer of {actual} bytes does not match {width}x{height}x{channels}")]
    InvalidFrame {
        width: u32,
        height: u32,
        channels: usize,
        actual: usize,
    },

    #[error("Screen capture failed: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier model is not ready")]
    NotReady,

    #[error("inference failed: {0}")]
    Inference(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("key injection failed: {0}")]
    KeyInjection(String),

    #[error("key injection is not supported on this platform")]
    Unsupported,

    #[error("failed to open {url}: {reason}")]
    BrowserOpen { url: String, reason: String },
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audit log {path} is not a valid event array: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode screenshot: {0}")]
    Encode(String),
}

impl From<png::EncodingError> for AuditError {
    fn from(value: png::EncodingError) -> Self {
        AuditError::Encode(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Threshold {value} is out of range [0.0, 1.0]")]
    ThresholdOutOfRange { value: f64 },

    #[error("Invalid key chord '{chord}': {reason}")]
    InvalidKeyChord { chord: String, reason: String },

    #[error("Invalid redirect URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("HOME directory could not be determined")]
    NoHome,

    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Failed to spawn monitor worker: {0}")]
    Spawn(#[source] std::io::Error),
}
