//! tidydrive daemon: watches the input directory for deposited source
//! archives and runs the pipeline on each.
//!
//! Processed archives are renamed `.zip.done`; failed ones `.zip.error`.
//!
//! ## Usage
//!
//! ```bash
//! tidydrive-daemon              # Run in foreground
//! tidydrive-daemon --once       # Process pending archives once and exit
//! tidydrive-daemon --interval 30
//! ```

use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use tidydrive::config::Config;
use tidydrive::db::JobStatus;
use tidydrive::job::JobController;
use tidydrive::logging;

struct DaemonConfig {
    /// Poll interval for the input directory (seconds).
    poll_interval: u64,
    /// Run one sweep and exit.
    once: bool,
    config_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval: 10,
            once: false,
            config_path: None,
        }
    }
}

fn parse_args() -> DaemonConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DaemonConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" | "-1" => {
                config.once = true;
            }
            "--interval" | "-i" => {
                if i + 1 < args.len() {
                    if let Ok(interval) = args[i + 1].parse() {
                        config.poll_interval = interval;
                    }
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    "tidydrive-daemon - watch the input directory for source archives\n\n\
                     OPTIONS:\n\
                     \x20   --once, -1          Process pending archives once and exit\n\
                     \x20   --interval, -i N    Poll interval in seconds (default 10)\n\
                     \x20   --config, -c PATH   Path to config file"
                );
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                std::process::exit(2);
            }
        }
        i += 1;
    }

    config
}

fn main() -> Result<()> {
    let daemon_config = parse_args();

    let _ = logging::init_with_file(Config::config_dir().join("logs"));

    info!("tidydrive daemon starting");

    let config = match &daemon_config.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    std::fs::create_dir_all(&config.paths.input_root)?;
    info!(input = %config.paths.input_root.display(), "watching input directory");

    let controller = JobController::new(config.clone());
    let cancel = Arc::new(AtomicBool::new(false));

    if daemon_config.once {
        info!("running in single-shot mode");
        sweep_input(&controller, &config, &cancel);
    } else {
        info!(interval = daemon_config.poll_interval, "running in daemon mode");
        loop {
            sweep_input(&controller, &config, &cancel);
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(Duration::from_secs(daemon_config.poll_interval));
        }
    }

    info!("tidydrive daemon stopped");
    Ok(())
}

/// Process every ZIP sitting in the input directory.
fn sweep_input(controller: &JobController, config: &Config, cancel: &Arc<AtomicBool>) {
    let entries = match std::fs::read_dir(&config.paths.input_root) {
        Ok(entries) => entries,
        Err(e) => {
            error!(error = %e, "cannot read input directory");
            return;
        }
    };

    let mut archives: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.eq_ignore_ascii_case("zip"))
                .unwrap_or(false)
        })
        .collect();
    archives.sort();

    for archive in archives {
        info!(archive = %archive.display(), "found source archive");

        let result = controller
            .submit(&archive)
            .and_then(|job_id| controller.run(&job_id, cancel));

        match result {
            Ok(JobStatus::Completed) => {
                info!(archive = %archive.display(), "archive processed");
                rename_with_suffix(&archive, "done");
            }
            Ok(JobStatus::ReviewRequired) => {
                // Approval re-enters via the CLI; rename so the next sweep
                // does not submit the archive again.
                info!(archive = %archive.display(), "waiting for review approval");
                rename_with_suffix(&archive, "review");
            }
            Ok(status) => {
                warn!(archive = %archive.display(), status = status.as_str(), "archive not completed");
                rename_with_suffix(&archive, "error");
            }
            Err(e) => {
                error!(archive = %archive.display(), error = %e, "processing failed");
                rename_with_suffix(&archive, "error");
            }
        }
    }
}

fn rename_with_suffix(archive: &PathBuf, suffix: &str) {
    let renamed = archive.with_extension(format!("zip.{suffix}"));
    if let Err(e) = std::fs::rename(archive, &renamed) {
        warn!(archive = %archive.display(), error = %e, "could not rename processed archive");
    }
}
