use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tidydrive::config::Config;
use tidydrive::db::JobStatus;
use tidydrive::error::ErrorKind;
use tidydrive::job::JobController;
use tidydrive::logging;

/// Exit codes: 0 success, 1 job failure, 2 setup error, 3 cancelled.
const EXIT_JOB_FAILED: i32 = 1;
const EXIT_SETUP_ERROR: i32 = 2;
const EXIT_CANCELLED: i32 = 3;

enum Command {
    Process { archive: PathBuf, job_id: Option<String> },
    Approve { job_id: String },
    Status { job_id: String },
    Rollback { manifest: PathBuf },
}

struct CliArgs {
    command: Command,
    config_path: Option<PathBuf>,
    dry_run: bool,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();

    let mut archive = None;
    let mut job_id = None;
    let mut manifest = None;
    let mut approve = false;
    let mut status = false;
    let mut config_path = None;
    let mut dry_run = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("tidydrive {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--zip" | "-z" => {
                if i + 1 < args.len() {
                    archive = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --zip requires a path argument");
                    std::process::exit(EXIT_SETUP_ERROR);
                }
            }
            "--job-id" | "-j" => {
                if i + 1 < args.len() {
                    job_id = Some(args[i + 1].clone());
                    i += 1;
                } else {
                    eprintln!("Error: --job-id requires an argument");
                    std::process::exit(EXIT_SETUP_ERROR);
                }
            }
            "--rollback" => {
                if i + 1 < args.len() {
                    manifest = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --rollback requires a manifest path");
                    std::process::exit(EXIT_SETUP_ERROR);
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(EXIT_SETUP_ERROR);
                }
            }
            "--approve" => approve = true,
            "--status" => status = true,
            "--dry-run" => dry_run = true,
            other => {
                eprintln!("Unknown argument: {other}");
                print_help();
                std::process::exit(EXIT_SETUP_ERROR);
            }
        }
        i += 1;
    }

    let command = if let Some(manifest) = manifest {
        Command::Rollback { manifest }
    } else if approve {
        match job_id {
            Some(job_id) => Command::Approve { job_id },
            None => {
                eprintln!("Error: --approve requires --job-id");
                std::process::exit(EXIT_SETUP_ERROR);
            }
        }
    } else if status {
        match job_id {
            Some(job_id) => Command::Status { job_id },
            None => {
                eprintln!("Error: --status requires --job-id");
                std::process::exit(EXIT_SETUP_ERROR);
            }
        }
    } else if let Some(archive) = archive {
        Command::Process { archive, job_id }
    } else {
        print_help();
        std::process::exit(EXIT_SETUP_ERROR);
    };

    CliArgs {
        command,
        config_path,
        dry_run,
    }
}

fn print_help() {
    println!(
        r#"tidydrive - organize a cloud-drive export

USAGE:
    tidydrive --zip PATH [--job-id ID] [--dry-run]   Process a source archive
    tidydrive --approve --job-id ID                  Execute an approved plan
    tidydrive --status --job-id ID                   Show job status
    tidydrive --rollback MANIFEST                    Discard the working tree, keep the plan

OPTIONS:
    --zip, -z PATH      Source archive to process
    --job-id, -j ID     Resume or address an existing job
    --approve           Release a job waiting at the review gate
    --status            Print a job's status and counters
    --rollback PATH     Roll back an execution using its manifest
    --dry-run           Validate and report without touching the working tree
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    TIDYDRIVE_CONFIG    Path to config file (overrides default location)
    TIDYDRIVE_LOG       Log level (trace, debug, info, warn, error)
    ANTHROPIC_API_KEY   API key for the planning model

Config file location: $XDG_CONFIG_HOME/tidydrive/config.toml"#
    );
}

fn main() {
    let cli = parse_args();

    let _ = logging::init();

    let mut config = match &cli.config_path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}");
        std::process::exit(EXIT_SETUP_ERROR);
    });
    if cli.dry_run {
        config.review.dry_run = true;
    }

    let exit_code = match run(cli.command, config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            EXIT_JOB_FAILED
        }
    };
    std::process::exit(exit_code);
}

fn run(command: Command, config: Config) -> Result<i32> {
    let controller = JobController::new(config);

    match command {
        Command::Process { archive, job_id } => {
            let cancel = cancel_token();
            let job_id = match job_id {
                Some(id) => id,
                None => match controller.submit(&archive) {
                    Ok(id) => id,
                    Err(e) => {
                        eprintln!("Cannot submit job: {e}");
                        return Ok(EXIT_SETUP_ERROR);
                    }
                },
            };
            println!("job: {job_id}");

            match controller.run(&job_id, &cancel) {
                Ok(JobStatus::Completed) => {
                    println!("status: completed");
                    Ok(0)
                }
                Ok(JobStatus::ReviewRequired) => {
                    println!("status: review_required");
                    println!("approve with: tidydrive --approve --job-id {job_id}");
                    Ok(0)
                }
                Ok(JobStatus::Cancelled) => {
                    println!("status: cancelled");
                    Ok(EXIT_CANCELLED)
                }
                Ok(other) => {
                    println!("status: {}", other.as_str());
                    Ok(EXIT_JOB_FAILED)
                }
                Err(e) if e.kind == ErrorKind::Cancelled => Ok(EXIT_CANCELLED),
                Err(e) => {
                    eprintln!("job failed: {e}");
                    Ok(EXIT_JOB_FAILED)
                }
            }
        }
        Command::Approve { job_id } => {
            let cancel = cancel_token();
            match controller.approve(&job_id, &cancel)? {
                JobStatus::Completed => {
                    println!("status: completed");
                    Ok(0)
                }
                JobStatus::Cancelled => Ok(EXIT_CANCELLED),
                other => {
                    println!("status: {}", other.as_str());
                    Ok(EXIT_JOB_FAILED)
                }
            }
        }
        Command::Status { job_id } => match controller.status(&job_id)? {
            Some(job) => {
                println!("job:               {}", job.id);
                println!("status:            {}", job.status.as_str());
                println!("phase:             {}", job.current_phase);
                println!("progress:          {}%", job.progress);
                println!("files processed:   {}", job.files_processed);
                println!("duplicate groups:  {}", job.duplicates_found);
                println!("shortcuts:         {}", job.shortcuts_created);
                println!("version chains:    {}", job.version_chains_found);
                println!("renamed / moved:   {} / {}", job.files_renamed, job.files_moved);
                if let Some(output) = &job.output_archive {
                    println!("output:            {output}");
                }
                if let Some(error) = &job.error_message {
                    println!("error:             {error}");
                }
                Ok(0)
            }
            None => {
                eprintln!("no such job: {job_id}");
                Ok(EXIT_SETUP_ERROR)
            }
        },
        Command::Rollback { manifest } => {
            controller.rollback(&manifest)?;
            println!("rolled back using {}", manifest.display());
            Ok(0)
        }
    }
}

/// Cooperative cancellation flag. Every worker and outbound request
/// polls it; the daemon flips it on shutdown, and embedders can share it
/// across threads.
fn cancel_token() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}
