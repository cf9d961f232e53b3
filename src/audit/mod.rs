//! Parent-mode audit trail: screenshots on disk plus an append-only JSON log.
//!
//! The log is a single JSON array rewritten on every append. Writes go to a
//! sibling temp file that is renamed over the log, so readers see either the
//! old or the new array. Readers re-open the file every time and treat a
//! missing file as an empty log.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Local};
use log::{info, warn};
use png::{BitDepth, ColorType, Encoder};
use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::content_filter::ClassificationResult;
use crate::error::AuditError;

pub mod report;

pub const CONTENT_TYPE: &str = "NSFW";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const LOG_FILE: &str = "parent_report.json";
const SCREENSHOT_DIR: &str = "screenshots";
const MAX_NAME_ATTEMPTS: u32 = 1_000;

/// One recorded mitigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub score: f64,
    pub screenshot: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    CONTENT_TYPE.to_string()
}

/// Where the log and screenshots live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditPaths {
    pub log_file: PathBuf,
    pub screenshot_dir: PathBuf,
}

impl AuditPaths {
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            log_file: data_dir.join(LOG_FILE),
            screenshot_dir: data_dir.join(SCREENSHOT_DIR),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> AuditError + '_ {
    move |source| AuditError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Current log contents. A missing file is an empty log.
pub fn read_events(log_file: &Path) -> Result<Vec<AuditEvent>, AuditError> {
    let contents = match fs::read(log_file) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_error(log_file)(err)),
    };
    if contents.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&contents).map_err(|source| AuditError::Corrupt {
        path: log_file.to_path_buf(),
        source,
    })
}

fn write_events(log_file: &Path, events: &[AuditEvent]) -> Result<(), AuditError> {
    if let Some(parent) = log_file.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let payload = serde_json::to_vec_pretty(events).map_err(|source| AuditError::Corrupt {
        path: log_file.to_path_buf(),
        source,
    })?;

    let tmp = log_file.with_extension("json.tmp");
    fs::write(&tmp, payload).map_err(io_error(&tmp))?;
    fs::rename(&tmp, log_file).map_err(io_error(log_file))
}

fn encode_png(frame: &Frame) -> Result<Vec<u8>, AuditError> {
    let mut buffer = Vec::new();
    {
        let mut encoder = Encoder::new(&mut buffer, frame.width, frame.height);
        encoder.set_color(ColorType::Rgb);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&frame.rgb)?;
    }
    Ok(buffer)
}

/// Writes screenshots and appends events. Appends are serialized.
pub struct AuditRecorder {
    paths: AuditPaths,
    write_lock: Mutex<()>,
}

impl AuditRecorder {
    pub fn new(paths: AuditPaths) -> Self {
        Self {
            paths,
            write_lock: Mutex::new(()),
        }
    }

    pub fn paths(&self) -> &AuditPaths {
        &self.paths
    }

    pub fn record(
        &self,
        result: &ClassificationResult,
        frame: &Frame,
    ) -> Result<AuditEvent, AuditError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Local::now();

        // Read first so a corrupt log never leaves an orphaned screenshot.
        let mut events = read_events(&self.paths.log_file)?;

        let png = encode_png(frame)?;
        let screenshot = self.write_screenshot(now, &png)?;

        let event = AuditEvent {
            timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
            score: result.score,
            screenshot,
            content_type: CONTENT_TYPE.to_string(),
        };
        events.push(event.clone());
        if let Err(err) = write_events(&self.paths.log_file, &events) {
            let orphan = self.paths.screenshot_dir.join(&event.screenshot);
            if let Err(remove_err) = fs::remove_file(&orphan) {
                warn!("Failed to remove unlogged screenshot {}: {remove_err}", orphan.display());
            }
            return Err(err);
        }

        info!(
            "Parent report event logged at {} (score {:.4})",
            event.timestamp, event.score
        );
        Ok(event)
    }

    /// Creates `screenshot_<timestamp>_<millis>.png`, adding a counter on collision.
    fn write_screenshot(&self, now: DateTime<Local>, png: &[u8]) -> Result<String, AuditError> {
        let dir = &self.paths.screenshot_dir;
        fs::create_dir_all(dir).map_err(io_error(dir))?;

        let stem = format!("screenshot_{}", now.format("%Y-%m-%d_%H-%M-%S_%3f"));
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{stem}.png")
            } else {
                format!("{stem}-{attempt}.png")
            };
            let path = dir.join(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(png).map_err(io_error(&path))?;
                    return Ok(name);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(io_error(&path)(err)),
            }
        }

        Err(AuditError::Io {
            path: dir.join(format!("{stem}.png")),
            source: std::io::Error::new(
                ErrorKind::AlreadyExists,
                "no free screenshot name for this timestamp",
            ),
        })
    }
}
