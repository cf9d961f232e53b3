//! Persisted configuration and the shared, hot-reloadable settings object.

use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::mitigation::{DEFAULT_REDIRECT_URL, KeyChord, MitigationConfig};

pub const DEFAULT_THRESHOLD: f64 = 0.5;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const CONFIG_PATH_ENV: &str = "MINDWALL_CONFIG";
const DATA_DIR_ENV: &str = "MINDWALL_DATA_DIR";
const DEFAULT_DATA_DIR: &str = ".Guard";

/// On-disk configuration (`~/.config/mindwall.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub threshold: f64,
    pub mitigation_key_chord: KeyChord,
    pub redirect_enabled: bool,
    /// Saved as `null` when cleared so a reload does not restore the default.
    pub redirect_url: Option<String>,
    /// Parent-mode data directory. Falls back to MINDWALL_DATA_DIR, then ~/.Guard.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            mitigation_key_chord: KeyChord::default(),
            redirect_enabled: true,
            redirect_url: Some(DEFAULT_REDIRECT_URL.to_string()),
            data_dir: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl Config {
    /// Config file location: MINDWALL_CONFIG, else ~/.config/mindwall.json.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = env::var(CONFIG_PATH_ENV) {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        let mut path = dirs::home_dir().ok_or(ConfigError::NoHome)?;
        path.push(".config");
        path.push("mindwall.json");
        Ok(path)
    }

    /// Loads the config, treating a missing file as defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        validate_threshold(config.threshold)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let payload = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, payload).map_err(io_err)
    }

    pub fn mitigation(&self) -> Result<MitigationConfig, ConfigError> {
        Ok(MitigationConfig {
            key_chord: self.mitigation_key_chord.clone(),
            redirect_enabled: self.redirect_enabled,
            redirect_url: parse_redirect_url(self.redirect_url.as_deref())?,
        })
    }

    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Ok(dir) = env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        Ok(dirs::home_dir()
            .ok_or(ConfigError::NoHome)?
            .join(DEFAULT_DATA_DIR))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// A partial update to the persisted config. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigEdit {
    pub threshold: Option<f64>,
    pub key_chord: Option<KeyChord>,
    pub redirect_enabled: Option<bool>,
    /// `Some("")` clears the redirect URL.
    pub redirect_url: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
}

impl ConfigEdit {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the edit, leaving `config` untouched if any value is invalid.
    pub fn apply(self, config: &mut Config) -> Result<(), ConfigError> {
        let mut next = config.clone();
        if let Some(threshold) = self.threshold {
            next.threshold = validate_threshold(threshold)?;
        }
        if let Some(chord) = self.key_chord {
            next.mitigation_key_chord = chord;
        }
        if let Some(enabled) = self.redirect_enabled {
            next.redirect_enabled = enabled;
        }
        if let Some(raw) = self.redirect_url {
            next.redirect_url = parse_redirect_url(Some(&raw))?.map(String::from);
        }
        if let Some(dir) = self.data_dir {
            next.data_dir = Some(dir);
        }
        if let Some(ms) = self.poll_interval_ms {
            next.poll_interval_ms = ms;
        }

        next.mitigation()?;
        *config = next;
        Ok(())
    }
}

pub fn validate_threshold(value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::ThresholdOutOfRange { value })
    }
}

/// Empty or missing URLs mean "no redirect target".
pub fn parse_redirect_url(url: Option<&str>) -> Result<Option<Url>, ConfigError> {
    match url.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => Url::parse(raw)
            .map(Some)
            .map_err(|source| ConfigError::InvalidUrl {
                url: raw.to_string(),
                source,
            }),
    }
}

/// Settings shared between the monitor and whoever edits them.
///
/// The threshold is an atomic so a write never waits behind a classify call;
/// the monitor reads both fields fresh on every cycle.
#[derive(Debug)]
pub struct Settings {
    threshold: AtomicU64,
    mitigation: RwLock<MitigationConfig>,
}

impl Settings {
    pub fn new(threshold: f64, mitigation: MitigationConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            threshold: AtomicU64::new(validate_threshold(threshold)?.to_bits()),
            mitigation: RwLock::new(mitigation),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::new(config.threshold, config.mitigation()?)
    }

    pub fn threshold(&self) -> f64 {
        f64::from_bits(self.threshold.load(Ordering::Acquire))
    }

    pub fn set_threshold(&self, value: f64) -> Result<(), ConfigError> {
        let value = validate_threshold(value)?;
        self.threshold.store(value.to_bits(), Ordering::Release);
        log::info!("NSFW threshold updated to {value}");
        Ok(())
    }

    pub fn mitigation(&self) -> MitigationConfig {
        self.mitigation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_mitigation(&self, config: MitigationConfig) {
        log::info!(
            "Mitigation updated: chord {}, redirect {}",
            config.key_chord,
            config
                .redirect_target()
                .map_or_else(|| "off".to_string(), Url::to_string)
        );
        *self
            .mitigation
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Copies the live values back into `config` for persisting.
    pub fn apply_to(&self, config: &mut Config) {
        let mitigation = self.mitigation();
        config.threshold = self.threshold();
        config.mitigation_key_chord = mitigation.key_chord;
        config.redirect_enabled = mitigation.redirect_enabled;
        config.redirect_url = mitigation.redirect_url.map(String::from);
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threshold: AtomicU64::new(DEFAULT_THRESHOLD.to_bits()),
            mitigation: RwLock::new(MitigationConfig::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.mitigation_key_chord.tokens(), vec!["ctrl", "w"]);
        assert!(config.redirect_enabled);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mindwall.json");
        fs::write(&path, r#"{"threshold": 0.8, "mitigation_key_chord": ["alt", "f4"]}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.threshold, 0.8);
        assert_eq!(config.mitigation_key_chord.to_string(), "alt+f4");
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.redirect_url.as_deref(), Some(DEFAULT_REDIRECT_URL));
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mindwall.json");
        let config = Config {
            threshold: 0.3,
            redirect_enabled: false,
            redirect_url: None,
            poll_interval_ms: 250,
            ..Config::default()
        };
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn cleared_redirect_url_stays_cleared_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mindwall.json");
        Config::default().save(&path).unwrap();

        let mut config = Config::load(&path).unwrap();
        ConfigEdit {
            redirect_url: Some(String::new()),
            ..ConfigEdit::default()
        }
        .apply(&mut config)
        .unwrap();
        config.save(&path).unwrap();

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.redirect_url, None);
        assert!(reloaded.redirect_enabled);
        assert_eq!(reloaded.mitigation().unwrap().redirect_target(), None);
    }

    #[test]
    fn edit_replaces_only_given_fields() {
        let mut config = Config::default();
        ConfigEdit {
            threshold: Some(0.7),
            key_chord: Some("cmd+q".parse().unwrap()),
            redirect_url: Some("https://example.com/calm".into()),
            ..ConfigEdit::default()
        }
        .apply(&mut config)
        .unwrap();

        assert_eq!(config.threshold, 0.7);
        assert_eq!(config.mitigation_key_chord.to_string(), "cmd+q");
        assert_eq!(config.redirect_url.as_deref(), Some("https://example.com/calm"));
        assert!(config.redirect_enabled);
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
    }

    #[test]
    fn invalid_edit_leaves_config_untouched() {
        let mut config = Config::default();
        let result = ConfigEdit {
            threshold: Some(0.9),
            redirect_url: Some("not a url".into()),
            ..ConfigEdit::default()
        }
        .apply(&mut config);

        assert!(matches!(result, Err(ConfigError::InvalidUrl { .. })));
        assert_eq!(config, Config::default());
        assert!(ConfigEdit::default().is_empty());
    }

    #[test]
    fn out_of_range_threshold_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mindwall.json");
        fs::write(&path, r#"{"threshold": 1.5}"#).unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::ThresholdOutOfRange { .. })
        ));
    }

    #[test]
    fn invalid_chord_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mindwall.json");
        fs::write(&path, r#"{"mitigation_key_chord": ["w"]}"#).unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn redirect_url_is_validated() {
        let config = Config {
            redirect_url: Some("not a url".into()),
            ..Config::default()
        };
        assert!(matches!(
            config.mitigation(),
            Err(ConfigError::InvalidUrl { .. })
        ));

        let config = Config {
            redirect_url: Some("  ".into()),
            ..Config::default()
        };
        assert_eq!(config.mitigation().unwrap().redirect_url, None);
    }

    #[test]
    fn threshold_setter_validates_and_applies() {
        let settings = Settings::default();
        assert_eq!(settings.threshold(), DEFAULT_THRESHOLD);

        settings.set_threshold(0.75).unwrap();
        assert_eq!(settings.threshold(), 0.75);

        assert!(settings.set_threshold(-0.1).is_err());
        assert!(settings.set_threshold(f64::NAN).is_err());
        assert_eq!(settings.threshold(), 0.75);
    }

    #[test]
    fn settings_round_trip_into_config() {
        let settings = Settings::default();
        settings.set_threshold(0.9).unwrap();
        settings.set_mitigation(MitigationConfig {
            key_chord: "ctrl+shift+q".parse().unwrap(),
            redirect_enabled: false,
            redirect_url: None,
        });

        let mut config = Config::default();
        settings.apply_to(&mut config);
        assert_eq!(config.threshold, 0.9);
        assert_eq!(config.mitigation_key_chord.to_string(), "ctrl+shift+q");
        assert!(!config.redirect_enabled);
        assert_eq!(config.redirect_url, None);
    }
}
