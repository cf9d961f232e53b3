//! Structured report entries for the parent-mode review document.

use std::fmt;
use std::path::PathBuf;

use super::{AuditEvent, AuditPaths, read_events};
use crate::error::AuditError;

#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    /// 1-based position in the log.
    pub index: usize,
    pub timestamp: String,
    pub content_type: String,
    pub score: f64,
    pub screenshot_path: PathBuf,
}

pub fn entries(events: &[AuditEvent], paths: &AuditPaths) -> Vec<ReportEntry> {
    events
        .iter()
        .enumerate()
        .map(|(i, event)| ReportEntry {
            index: i + 1,
            timestamp: event.timestamp.clone(),
            content_type: event.content_type.clone(),
            score: event.score,
            screenshot_path: paths.screenshot_dir.join(&event.screenshot),
        })
        .collect()
}

/// Reads the log fresh and builds the entries.
pub fn load(paths: &AuditPaths) -> Result<Vec<ReportEntry>, AuditError> {
    Ok(entries(&read_events(&paths.log_file)?, paths))
}

impl fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Event {}", self.index)?;
        writeln!(f, "  Date/Time: {}", self.timestamp)?;
        writeln!(f, "  Content Type: {}", self.content_type)?;
        writeln!(f, "  NSFW Score: {:.4}", self.score)?;
        write!(f, "  Screenshot: {}", self.screenshot_path.display())
    }
}
