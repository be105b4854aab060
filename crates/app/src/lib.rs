//! CLI wiring for the clipforge task engine.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::info;

use clipforge_core::config::{config_path, data_dir, initialize_data_dir, AppConfig};
use clipforge_core::idgen::IdGen;
use clipforge_core::logging;
use clipforge_core::service::TaskService;
use clipforge_core::task::{Task, TaskState};
use clipforge_core::tasks::{TaskFactory, TimeRange};

#[derive(Parser)]
#[command(name = "clipforge", about = "Clip extraction engine for a personal media library")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(long, global = true, help = "Data directory (config + logs)")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Cut a clip out of a media file, streaming progress until it completes.
    Cut(CutArgs),
}

#[derive(Args)]
struct CutArgs {
    #[arg(help = "Path to the source media file")]
    file: PathBuf,

    #[arg(long, value_name = "HH:MM:SS", help = "Clip start offset")]
    from: String,

    #[arg(long, value_name = "HH:MM:SS", help = "Clip end offset")]
    to: String,

    #[arg(long, help = "Override the configured worker pool size")]
    concurrency: Option<usize>,
}

pub async fn run_from_env() -> Result<()> {
    let cli = Cli::parse();

    let resolved_data_dir = data_dir(cli.data_dir.as_deref());
    initialize_data_dir(&resolved_data_dir)?;

    let filter = logging::resolve_log_filter(
        cli.verbose,
        cli.log_filter.as_deref(),
        std::env::var("RUST_LOG").ok().as_deref(),
    );
    let _log_guard = logging::init(&filter, Some(&resolved_data_dir))?;

    let mut config = AppConfig::load_from_path(&config_path(&resolved_data_dir))?;

    match cli.command {
        Commands::Cut(args) => {
            if let Some(concurrency) = args.concurrency {
                config.tasks.concurrency = concurrency;
            }
            run_cut(&config, args).await
        }
    }
}

async fn run_cut(config: &AppConfig, args: CutArgs) -> Result<()> {
    let range = TimeRange::parse(&args.from, &args.to)?;
    let factory = TaskFactory::new(
        Arc::new(IdGen::new(config.tasks.worker_id)),
        config.ffmpeg.clone(),
    );
    let service = TaskService::new(&config.tasks);

    let task = factory.cut(&args.file, range)?;
    let id = task.id();
    let name = task.name().to_string();

    let mut updates = service.subscribe();
    service.submit(Arc::new(task));
    info!(task_id = id, name, "clip cut submitted");

    let mut seen = false;
    let outcome = loop {
        {
            let snapshot = updates.borrow_and_update();
            match snapshot.iter().find(|record| record.id == id) {
                Some(record) => {
                    seen = true;
                    match record.state {
                        TaskState::Pending => {}
                        TaskState::Running => println!("cutting... {:3}%", record.percent),
                        TaskState::Finished => break Ok(()),
                        TaskState::Error => {
                            break Err(anyhow!(record
                                .error
                                .clone()
                                .unwrap_or_else(|| "unknown error".to_string())))
                        }
                        TaskState::Canceled => break Err(anyhow!("cut was canceled")),
                    }
                }
                None if seen => break Err(anyhow!("task was removed before completing")),
                None => {}
            }
        }
        if updates.changed().await.is_err() {
            bail!("task service stopped unexpectedly");
        }
    };

    service.shutdown().await;

    match outcome {
        Ok(()) => {
            println!("done");
            Ok(())
        }
        Err(err) => Err(err).with_context(|| format!("cut of {} failed", args.file.display())),
    }
}
