use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use url::Url;

use crate::content_filter::ClassificationResult;
use crate::error::DispatchError;

mod browser;
mod chord;
mod keys;

pub use browser::SystemBrowser;
pub use chord::{Key, KeyChord, Modifier};
pub use keys::SystemKeyInjector;

pub const DEFAULT_REDIRECT_URL: &str = "https://www.youtube.com/shorts/8SVZLF75P2M";

/// Pause between the key chord and the redirect so the close lands first.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MitigationConfig {
    pub key_chord: KeyChord,
    pub redirect_enabled: bool,
    pub redirect_url: Option<Url>,
}

impl MitigationConfig {
    /// URL to open after the chord, if redirecting is on and a URL is set.
    pub fn redirect_target(&self) -> Option<&Url> {
        if self.redirect_enabled {
            self.redirect_url.as_ref()
        } else {
            None
        }
    }
}

impl Default for MitigationConfig {
    fn default() -> Self {
        Self {
            key_chord: KeyChord::default(),
            redirect_enabled: true,
            redirect_url: Url::parse(DEFAULT_REDIRECT_URL).ok(),
        }
    }
}

/// Sends a synthetic key chord to the focused window.
pub trait KeyInjector: Send + Sync {
    fn send_chord(&self, chord: &KeyChord) -> Result<(), DispatchError>;
}

/// Opens a URL in a new browser tab.
pub trait BrowserLauncher: Send + Sync {
    fn open_tab(&self, url: &Url) -> Result<(), DispatchError>;
}

/// Which mitigation steps went through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub chord_sent: bool,
    pub redirected: bool,
}

pub struct Dispatcher {
    keys: Box<dyn KeyInjector>,
    browser: Box<dyn BrowserLauncher>,
    settle_delay: Duration,
}

impl Dispatcher {
    pub fn new(keys: impl KeyInjector + 'static, browser: impl BrowserLauncher + 'static) -> Self {
        Self {
            keys: Box::new(keys),
            browser: Box::new(browser),
            settle_delay: SETTLE_DELAY,
        }
    }

    pub fn system() -> Self {
        Self::new(SystemKeyInjector::new(), SystemBrowser::new())
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Best-effort mitigation. Failures are logged; the report says what succeeded.
    pub fn dispatch(
        &self,
        result: &ClassificationResult,
        config: &MitigationConfig,
    ) -> DispatchReport {
        warn!(
            "Detected NSFW content with confidence {:.2}; sending {}",
            result.score, config.key_chord
        );

        let mut report = DispatchReport::default();
        match self.keys.send_chord(&config.key_chord) {
            Ok(()) => report.chord_sent = true,
            Err(err) => error!("Mitigation key chord failed: {err}"),
        }

        thread::sleep(self.settle_delay);

        if let Some(url) = config.redirect_target() {
            match self.browser.open_tab(url) {
                Ok(()) => {
                    info!("Redirected to {url}");
                    report.redirected = true;
                }
                Err(err) => error!("Redirect failed: {err}"),
            }
        }

        report
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Recorder, dispatcher};
    use super::*;

    fn alert() -> ClassificationResult {
        ClassificationResult {
            score: 0.9,
            is_explicit: true,
        }
    }

    #[test]
    fn sends_chord_then_redirects() {
        let recorder = Recorder::default();
        let report = dispatcher(&recorder).dispatch(&alert(), &MitigationConfig::default());

        assert_eq!(
            report,
            DispatchReport {
                chord_sent: true,
                redirected: true
            }
        );
        assert_eq!(*recorder.chords.lock().unwrap(), vec!["ctrl+w"]);
        assert_eq!(*recorder.urls.lock().unwrap(), vec![DEFAULT_REDIRECT_URL]);
    }

    #[test]
    fn redirect_disabled_only_sends_chord() {
        let recorder = Recorder::default();
        let config = MitigationConfig {
            redirect_enabled: false,
            ..MitigationConfig::default()
        };
        let report = dispatcher(&recorder).dispatch(&alert(), &config);

        assert!(report.chord_sent);
        assert!(!report.redirected);
        assert!(recorder.urls.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_url_skips_redirect() {
        let recorder = Recorder::default();
        let config = MitigationConfig {
            redirect_url: None,
            ..MitigationConfig::default()
        };
        assert!(!dispatcher(&recorder).dispatch(&alert(), &config).redirected);
    }

    #[test]
    fn failures_are_swallowed() {
        let recorder = Recorder::failing();
        let report = dispatcher(&recorder).dispatch(&alert(), &MitigationConfig::default());
        assert_eq!(report, DispatchReport::default());
    }

    #[test]
    fn custom_chord_is_forwarded() {
        let recorder = Recorder::default();
        let config = MitigationConfig {
            key_chord: "alt+f4".parse().unwrap(),
            ..MitigationConfig::default()
        };
        dispatcher(&recorder).dispatch(&alert(), &config);
        assert_eq!(*recorder.chords.lock().unwrap(), vec!["alt+f4"]);
    }
}
