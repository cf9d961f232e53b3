//! The lifecycle surface a front end drives.
//!
//! `Guard` owns the shared settings, the model loader and the monitor, and
//! wires them into one capture/classify/mitigate pipeline. Collaborators are
//! injected through [`GuardComponents`]; [`Guard::from_config`] builds the
//! production set.

use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::audit::report::{self, ReportEntry};
use crate::audit::{AuditPaths, AuditRecorder};
use crate::capture::{FrameSource, ScreenSource};
use crate::config::{Config, Settings, parse_redirect_url};
use crate::content_filter::{ContentClassifier, HubModelSource};
use crate::error::{AuditError, ConfigError, LoadError, MonitorError};
use crate::mitigation::{Dispatcher, KeyChord, MitigationConfig};
use crate::model_loader::{ModelLoader, ModelState};
use crate::monitor::{Cycle, Monitor, MonitorState};

pub struct GuardComponents {
    pub settings: Arc<Settings>,
    pub loader: Arc<ModelLoader>,
    pub source: Box<dyn FrameSource>,
    pub dispatcher: Dispatcher,
    pub audit: AuditPaths,
    pub poll_interval: Duration,
}

impl GuardComponents {
    /// Screen capture, the hub-hosted model and system key/browser dispatch.
    pub fn system(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            settings: Arc::new(Settings::from_config(config)?),
            loader: Arc::new(ModelLoader::new(HubModelSource::default())),
            source: Box::new(ScreenSource::new()),
            dispatcher: Dispatcher::system(),
            audit: AuditPaths::in_dir(&config.data_dir()?),
            poll_interval: config.poll_interval(),
        })
    }
}

pub struct Guard {
    settings: Arc<Settings>,
    loader: Arc<ModelLoader>,
    audit: AuditPaths,
    monitor: Monitor,
}

impl Guard {
    pub fn new(components: GuardComponents) -> Self {
        let GuardComponents {
            settings,
            loader,
            source,
            dispatcher,
            audit,
            poll_interval,
        } = components;

        let classifier = ContentClassifier::new(Arc::clone(&loader), Arc::clone(&settings));
        let cycle = Cycle::new(
            source,
            classifier,
            Arc::clone(&settings),
            dispatcher,
            AuditRecorder::new(audit.clone()),
        );
        let monitor = Monitor::new(Arc::clone(&loader), cycle, poll_interval);

        Self {
            settings,
            loader,
            audit,
            monitor,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let guard = Self::new(GuardComponents::system(config)?);
        info!(
            "Guard ready, parent report at {}",
            guard.audit.log_file.display()
        );
        Ok(guard)
    }

    pub fn start(&self) -> Result<MonitorState, MonitorError> {
        self.monitor.start()
    }

    pub fn stop(&self) -> MonitorState {
        self.monitor.stop()
    }

    pub fn set_threshold(&self, value: f64) -> Result<(), ConfigError> {
        self.settings.set_threshold(value)
    }

    /// Replaces the mitigation config. An empty or absent URL disables the redirect.
    pub fn set_mitigation_config(
        &self,
        key_chord: KeyChord,
        redirect_enabled: bool,
        redirect_url: Option<&str>,
    ) -> Result<(), ConfigError> {
        let redirect_url = parse_redirect_url(redirect_url)?;
        self.settings.set_mitigation(MitigationConfig {
            key_chord,
            redirect_enabled,
            redirect_url,
        });
        Ok(())
    }

    /// Loads the model ahead of `start`. Shares the load-once guarantee with it.
    pub fn load_model<F>(&self, progress: F) -> Result<(), LoadError>
    where
        F: FnMut(u8, &str),
    {
        self.loader.load(progress)
    }

    pub fn monitor_state(&self) -> MonitorState {
        self.monitor.state()
    }

    pub fn model_state(&self) -> ModelState {
        self.loader.state()
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn audit_paths(&self) -> &AuditPaths {
        &self.audit
    }

    pub fn report(&self) -> Result<Vec<ReportEntry>, AuditError> {
        report::load(&self.audit)
    }
}
