use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging based on output mode and debug flag
pub fn init_logging(debug: bool, quiet: bool, log_file: Option<PathBuf>) -> anyhow::Result<()> {
    let env_filter = if debug {
        EnvFilter::new("step_runner=debug")
    } else if quiet {
        EnvFilter::new("step_runner=error")
    } else {
        EnvFilter::new("step_runner=info")
    };

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_line_number(debug)
        .with_file(debug)
        .with_writer(std::io::stderr);

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(file)
            .with_target(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(file_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Default log file for a named run:
/// `<config dir>/step-runner/logs/<name>-<timestamp>.log`
pub fn default_log_path(run_name: &str) -> anyhow::Result<PathBuf> {
    let log_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join("step-runner")
        .join("logs");

    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    Ok(log_dir.join(format!("{}-{}.log", run_name, timestamp)))
}

/// Turn the `--log-file [PATH]` flag into a log path
///
/// A bare flag falls back to [`default_log_path`] for `run_name`.
pub fn resolve_log_file(
    requested: Option<Option<PathBuf>>,
    run_name: &str,
) -> anyhow::Result<Option<PathBuf>> {
    match requested {
        None => Ok(None),
        Some(Some(path)) => Ok(Some(path)),
        Some(None) => default_log_path(run_name).map(Some),
    }
}
