//! mindwall: headless front end for the content-safety monitor.

mod cli;

use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use mindwall::audit::read_events;
use mindwall::config::ConfigEdit;
use mindwall::{Config, Guard, MonitorState, logging};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

extern "C" fn handle_signal(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    let handler = handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    for signal in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
        let previous = unsafe { libc::signal(signal, handler) };
        if previous == libc::SIG_ERR {
            warn!("Failed to install handler for signal {signal}");
        }
    }
}

fn main() -> ExitCode {
    logging::init();
    let cli = cli::Cli::parse();

    let config_path = match cli.config.map_or_else(Config::default_path, Ok) {
        Ok(path) => path,
        Err(err) => {
            eprintln!("mindwall: {err}");
            return ExitCode::FAILURE;
        }
    };
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            eprintln!("mindwall: {err}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(command @ cli::Command::Config { .. }) => {
            let edit = command.config_edit().unwrap_or_default();
            if edit.is_empty() {
                print_config(&config)
            } else {
                run_config_edit(config, &config_path, edit)
            }
        }
        Some(cli::Command::Load) => run_load(&config),
        Some(cli::Command::Report { json }) => run_report(&config, json),
        Some(cli::Command::Run { threshold }) => run_monitor(&config, threshold),
        None => run_monitor(&config, None),
    }
}

fn build_guard(config: &Config) -> Option<Guard> {
    match Guard::from_config(config) {
        Ok(guard) => Some(guard),
        Err(err) => {
            error!("Failed to set up guard: {err}");
            eprintln!("mindwall: {err}");
            None
        }
    }
}

fn run_monitor(config: &Config, threshold: Option<f64>) -> ExitCode {
    let Some(guard) = build_guard(config) else {
        return ExitCode::FAILURE;
    };
    if let Some(threshold) = threshold {
        if let Err(err) = guard.set_threshold(threshold) {
            eprintln!("mindwall: {err}");
            return ExitCode::FAILURE;
        }
    }

    install_signal_handlers();
    info!("Starting mindwall");

    if let Err(err) = guard.start() {
        eprintln!("mindwall: {err}");
        return ExitCode::FAILURE;
    }

    while !SHUTDOWN.load(Ordering::SeqCst) {
        if guard.monitor_state() == MonitorState::Stopped {
            error!("Monitor stopped unexpectedly");
            return ExitCode::FAILURE;
        }
        thread::sleep(SHUTDOWN_POLL);
    }

    info!("Shutdown requested");
    let state = guard.stop();
    if state != MonitorState::Stopped {
        warn!("Exiting with monitor still {state:?}");
    }
    ExitCode::SUCCESS
}

fn run_load(config: &Config) -> ExitCode {
    let Some(guard) = build_guard(config) else {
        return ExitCode::FAILURE;
    };
    let loaded = guard.load_model(|percent, message| println!("[{percent:>3}%] {message}"));
    match loaded {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mindwall: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_report(config: &Config, json: bool) -> ExitCode {
    let data_dir = match config.data_dir() {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("mindwall: {err}");
            return ExitCode::FAILURE;
        }
    };
    let paths = mindwall::audit::AuditPaths::in_dir(&data_dir);

    if json {
        let printed = read_events(&paths.log_file)
            .map_err(|err| err.to_string())
            .and_then(|events| {
                serde_json::to_string_pretty(&events).map_err(|err| err.to_string())
            });
        return match printed {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("mindwall: {err}");
                ExitCode::FAILURE
            }
        };
    }

    match mindwall::audit::report::load(&paths) {
        Ok(entries) if entries.is_empty() => {
            println!("No events recorded in {}", paths.log_file.display());
            ExitCode::SUCCESS
        }
        Ok(entries) => {
            println!("Parent report ({} events)\n", entries.len());
            for entry in entries {
                println!("{entry}\n");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("mindwall: {err}");
            ExitCode::FAILURE
        }
    }
}

fn print_config(config: &Config) -> ExitCode {
    match serde_json::to_string_pretty(config) {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("mindwall: failed to serialize config: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_config_edit(mut config: Config, path: &Path, edit: ConfigEdit) -> ExitCode {
    if let Err(err) = edit.apply(&mut config) {
        eprintln!("mindwall: {err}");
        return ExitCode::FAILURE;
    }
    if let Err(err) = config.save(path) {
        eprintln!("mindwall: {err}");
        return ExitCode::FAILURE;
    }
    info!("Saved config to {}", path.display());
    print_config(&config)
}
