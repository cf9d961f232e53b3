use std::process::{Command, Stdio};
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
use std::thread;

use log::debug;
use url::Url;

use super::BrowserLauncher;
use crate::error::DispatchError;

/// Opens URLs in Google Chrome when available, else the OS default browser.
#[derive(Debug, Default)]
pub struct SystemBrowser;

impl SystemBrowser {
    pub fn new() -> Self {
        Self
    }
}

/// Launch attempts in preference order.
fn launch_commands(url: &str) -> Vec<Command> {
    let mut preferred;
    let mut fallback;

    #[cfg(target_os = "macos")]
    {
        preferred = Command::new("open");
        preferred.args(["-a", "Google Chrome", url]);
        fallback = Command::new("open");
        fallback.arg(url);
    }

    #[cfg(target_os = "windows")]
    {
        preferred = Command::new("cmd");
        preferred.args(["/C", "start", "", "chrome", url]);
        fallback = Command::new("cmd");
        fallback.args(["/C", "start", "", url]);
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        preferred = Command::new("google-chrome");
        preferred.args(["--new-tab", url]);
        fallback = Command::new("xdg-open");
        fallback.arg(url);
    }

    vec![preferred, fallback]
}

fn run(mut command: Command) -> Result<(), String> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // Chrome itself stays in the foreground when it is the first instance.
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    if command.get_program() == "google-chrome" {
        return spawn_reaped(command).map(|_| ()).map_err(|e| e.to_string());
    }

    let status = command.status().map_err(|e| e.to_string())?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("exited with {status}"))
    }
}

/// Spawns without blocking; a detached thread waits on the child so it never lingers as a zombie.
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn spawn_reaped(mut command: Command) -> std::io::Result<(u32, thread::JoinHandle<()>)> {
    let mut child = command.spawn()?;
    let pid = child.id();
    let reaper = thread::Builder::new()
        .name("mindwall-browser-reaper".into())
        .spawn(move || match child.wait() {
            Ok(status) => debug!("Browser process {pid} exited with {status}"),
            Err(err) => debug!("Failed to wait on browser process {pid}: {err}"),
        })?;
    Ok((pid, reaper))
}

impl BrowserLauncher for SystemBrowser {
    fn open_tab(&self, url: &Url) -> Result<(), DispatchError> {
        let mut last_error = String::from("no launcher available");
        for command in launch_commands(url.as_str()) {
            let program = command.get_program().to_string_lossy().into_owned();
            match run(command) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!("Browser launch via {program} failed: {err}");
                    last_error = format!("{program}: {err}");
                }
            }
        }

        Err(DispatchError::BrowserOpen {
            url: url.to_string(),
            reason: last_error,
        })
    }
}
