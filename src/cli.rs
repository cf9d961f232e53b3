//! CLI argument parsing.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use mindwall::config::ConfigEdit;
use mindwall::mitigation::KeyChord;

fn threshold_in_range(s: &str) -> Result<f64, String> {
    let val: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&val) {
        Ok(val)
    } else {
        Err(format!("threshold must be between 0.0 and 1.0, got {val}"))
    }
}

#[derive(Parser)]
#[command(name = "mindwall", about = "Screen content-safety monitor")]
pub struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true, env = "MINDWALL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Monitor the screen until interrupted (default)
    Run {
        /// Detection threshold for this session (0.0–1.0)
        #[arg(long, env = "MINDWALL_THRESHOLD", value_parser = threshold_in_range)]
        threshold: Option<f64>,
    },
    /// Download and initialize the classifier model, then exit
    Load,
    /// Print the parent-mode report
    Report {
        /// Print the raw event log as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the config, applying and saving any given changes first
    Config {
        #[arg(long, value_parser = threshold_in_range)]
        threshold: Option<f64>,
        /// Mitigation key chord, e.g. ctrl+w or cmd+shift+q
        #[arg(long)]
        chord: Option<KeyChord>,
        /// Open the redirect URL after the chord
        #[arg(long, action = ArgAction::Set)]
        redirect: Option<bool>,
        /// Redirect URL; pass an empty string to clear it
        #[arg(long)]
        redirect_url: Option<String>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(long)]
        poll_interval_ms: Option<u64>,
    },
}

impl Command {
    /// Changes requested by the `config` subcommand.
    pub fn config_edit(&self) -> Option<ConfigEdit> {
        match self {
            Command::Config {
                threshold,
                chord,
                redirect,
                redirect_url,
                data_dir,
                poll_interval_ms,
            } => Some(ConfigEdit {
                threshold: *threshold,
                key_chord: chord.clone(),
                redirect_enabled: *redirect,
                redirect_url: redirect_url.clone(),
                data_dir: data_dir.clone(),
                poll_interval_ms: *poll_interval_ms,
            }),
            _ => None,
        }
    }
}
