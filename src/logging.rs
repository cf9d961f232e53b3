use std::sync::OnceLock;

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

#[cfg(target_os = "macos")]
pub fn init() {
    use log::LevelFilter;
    use oslog::OsLogger;

    LOGGER_INIT.get_or_init(|| {
        if let Err(err) = OsLogger::new("com.mindwall.mindwall")
            .level_filter(LevelFilter::Info)
            .init()
        {
            eprintln!("mindwall: failed to initialize unified logging: {err}");
        }
    });
}

/// Installs a fmt subscriber filtered by `MINDWALL_LOG`; `log` records are bridged into it.
#[cfg(not(target_os = "macos"))]
pub fn init() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;

    LOGGER_INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_env("MINDWALL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
        if let Err(err) = fmt().with_env_filter(filter).try_init() {
            eprintln!("mindwall: failed to initialize logging: {err}");
        }
    });
}
