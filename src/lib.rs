//! mindwall: a screen content-safety monitor.
//!
//! Periodically captures the primary display, scores each frame with an NSFW
//! image classifier, and above a configurable threshold sends a key chord to
//! close the offending window and optionally opens a redirect URL. Every
//! mitigation is recorded with a screenshot in the parent-mode audit log.

pub mod audit;
pub mod capture;
pub mod config;
pub mod content_filter;
pub mod error;
pub mod guard;
pub mod logging;
pub mod mitigation;
pub mod model_loader;
pub mod monitor;

pub use config::{Config, Settings};
pub use error::{
    AuditError, CaptureError, ClassifyError, ConfigError, DispatchError, LoadError, MonitorError,
};
pub use guard::{Guard, GuardComponents};
pub use model_loader::ModelState;
pub use monitor::MonitorState;
