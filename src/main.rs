//! OneVoice - video dubbing client
//!
//! Entry point for the `onevoice` command: submits videos to the dubbing
//! service, follows their progress, and collects the results.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracing_appender::{non_blocking, rolling};

use onevoice::cli::{Args, Commands, ConfigAction};
use onevoice::config::Config;
use onevoice::error::OneVoiceError;
use onevoice::tracker::SessionOutcome;
use onevoice::workflow::{ProcessOptions, Route, Workflow};

const DEFAULT_CONFIG: &str = "onevoice.toml";

/// Exit status for a run stopped by SIGINT.
const INTERRUPTED_EXIT: i32 = 130;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;

    let config = load_config(args.config.as_deref())?;

    // One handler for the whole command: the first Ctrl-C cancels whatever is
    // running, a second one exits immediately.
    let shutdown = CancellationToken::new();
    let root = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping...");
            root.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(INTERRUPTED_EXIT);
        }
    });

    let result = run(args.command, config, shutdown.clone()).await;
    if shutdown.is_cancelled() {
        if let Err(e) = &result {
            eprintln!("{}", e);
        }
        std::process::exit(INTERRUPTED_EXIT);
    }
    result
}

async fn run(command: Commands, config: Config, shutdown: CancellationToken) -> Result<()> {
    let connect = |config: Config| -> Result<Workflow> {
        Ok(Workflow::new(config)?.with_shutdown(shutdown.clone()))
    };

    match command {
        Commands::Process { source, output_dir, no_download, rating, comment } => {
            let workflow = connect(config)?;
            let options = ProcessOptions {
                request: source.into(),
                output_dir,
                download: !no_download,
                rating,
                comment,
            };

            let report = workflow.process(&options).await?;
            println!("Task: {}", report.task_id);
            match report.route {
                Route::Result(_) => {
                    match &report.artifact {
                        Some(path) => println!("Saved: {}", path.display()),
                        None => println!("Download: {}", workflow.download_url(&report.task_id)?),
                    }
                    if let Some(message) = &report.feedback {
                        println!("{}", message);
                    }
                    if let Some(error) = &report.feedback_error {
                        anyhow::bail!("Feedback was not sent: {}", error);
                    }
                }
                _ => println!("Stopped watching. Resume with: onevoice watch {}", report.task_id),
            }
        }
        Commands::Submit { source } => {
            let workflow = connect(config)?;
            let task_id = workflow.submit(&source.into()).await?;
            println!("{}", task_id);
        }
        Commands::Status { task_id } => {
            let workflow = connect(config)?;
            let report = workflow.status(&task_id).await?;
            println!("{}", report);
        }
        Commands::Watch { task_id, output_dir, no_download } => {
            let workflow = connect(config)?;
            match workflow.track(&task_id).await? {
                SessionOutcome::Completed(_) if no_download => {
                    println!("Download: {}", workflow.download_url(&task_id)?);
                }
                SessionOutcome::Completed(_) => {
                    let path = workflow.download_artifact(&task_id, output_dir.as_deref()).await?;
                    println!("Saved: {}", path.display());
                }
                SessionOutcome::Failed(failure) => return Err(OneVoiceError::from(failure).into()),
                SessionOutcome::TornDown => {
                    println!("Stopped watching. Resume with: onevoice watch {}", task_id);
                }
            }
        }
        Commands::Download { task_id, output_dir } => {
            let workflow = connect(config)?;
            let path = workflow.download_artifact(&task_id, output_dir.as_deref()).await?;
            println!("Saved: {}", path.display());
        }
        Commands::Feedback { task_id, rating, comment } => {
            let workflow = connect(config)?;
            let message = workflow.send_feedback(&task_id, rating, comment).await?;
            println!("{}", message);
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigAction::Init { path } => {
                if path.exists() {
                    anyhow::bail!("{} already exists", path.display());
                }
                Config::default().save_to_file(&path)?;
                println!("Wrote default configuration to {}", path.display());
            }
        },
    }

    Ok(())
}

/// `--config` if given, else `./onevoice.toml` if present, else defaults.
/// Environment overrides are applied last.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => {
            info!("Found {} in current directory, loading...", DEFAULT_CONFIG);
            Config::from_file(DEFAULT_CONFIG)?
        }
        None => Config::default(),
    };

    config.apply_env();
    config.validate()?;
    info!("Using processing service at {}", config.api.base_url);
    Ok(config)
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".onevoice").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotation; the guard must outlive the program
    let file_appender = rolling::daily(&log_dir, "onevoice.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Console stays terse so it doesn't fight the progress bar
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("onevoice.log").display());

    Ok(())
}
