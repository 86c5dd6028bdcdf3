//! lane-scheduler CLI entry point.
//!
//! Loads configuration, initializes logging and dispatches the subcommand.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use prometheus_lane_scheduler::builders::SchedulerBuilder;
use prometheus_lane_scheduler::config::SchedulerConfig;
use prometheus_lane_scheduler::core::Job;
use prometheus_lane_scheduler::infra::{JobStore, LearningDb, StatusFile};
use prometheus_lane_scheduler::runtime::CommandImplementer;
use prometheus_lane_scheduler::util::init_tracing;

/// Local dual-lane job scheduler.
#[derive(Parser)]
#[command(name = "lane-scheduler")]
#[command(about = "Dual-lane job scheduler with timeout supervision and failure escalation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file; defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and run until Ctrl-C.
    Run {
        /// Program run once per job; receives the job JSON on stdin.
        #[arg(long)]
        program: String,

        /// Arguments passed to the program.
        #[arg(last = true)]
        args: Vec<String>,

        /// Working directory for the program.
        #[arg(long)]
        workdir: Option<PathBuf>,
    },

    /// Append a job descriptor to the job store.
    Submit {
        /// Path to a JSON descriptor, or `-` to read stdin.
        #[arg(long, conflicts_with = "json")]
        file: Option<PathBuf>,

        /// Inline JSON descriptor.
        #[arg(long)]
        json: Option<String>,
    },

    /// Print the latest status snapshot.
    Status,

    /// Print learning database statistics.
    Fixes {
        /// Also list every record.
        #[arg(long)]
        list: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SchedulerConfig> {
    let mut cfg = match path {
        Some(path) => SchedulerConfig::from_file(path).map_err(|e| anyhow!(e))?,
        None => SchedulerConfig::default(),
    };
    cfg.apply_env().map_err(|e| anyhow!(e))?;
    cfg.validate().map_err(|e| anyhow!("config invalid: {e}"))?;
    Ok(cfg)
}

fn read_descriptor(file: Option<PathBuf>, json: Option<String>) -> anyhow::Result<Job> {
    let raw = match (file, json) {
        (_, Some(json)) => json,
        (Some(path), None) if path.as_os_str() == "-" => {
            std::io::read_to_string(std::io::stdin()).context("reading stdin")?
        }
        (Some(path), None) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?,
        (None, None) => bail!("pass --file or --json"),
    };
    let value: Value = serde_json::from_str(&raw).context("descriptor is not JSON")?;
    Ok(Job::from_value(value)?)
}

async fn run(cfg: SchedulerConfig, implementer: CommandImplementer) -> anyhow::Result<()> {
    let scheduler = SchedulerBuilder::new(cfg).implementer(implementer).build()?;
    info!(instance_id = %scheduler.instance_id(), "starting scheduler");
    let handle = scheduler.start();
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    handle.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let cfg = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run {
            program,
            args,
            workdir,
        } => {
            let mut implementer = CommandImplementer::new(program, args);
            if let Some(dir) = workdir {
                implementer = implementer.with_workdir(dir);
            }
            run(cfg, implementer).await
        }
        Commands::Submit { file, json } => {
            let job = read_descriptor(file, json)?;
            let store = JobStore::new(&cfg.paths.job_store);
            let title = job.title.clone();
            let added = tokio::task::spawn_blocking(move || store.insert_new(vec![job])).await??;
            if !added.is_empty() {
                println!("queued {title}");
            } else {
                println!("{title} is already queued");
            }
            Ok(())
        }
        Commands::Status => {
            let status = StatusFile::new(&cfg.paths.status_file);
            match status.read()? {
                Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                None => println!("no status written yet at {}", status.path().display()),
            }
            Ok(())
        }
        Commands::Fixes { list } => {
            let db = LearningDb::new(&cfg.paths.learning_db);
            println!("{}", serde_json::to_string_pretty(&db.stats()?)?);
            if list {
                for record in db.records()? {
                    println!("{}", serde_json::to_string(&record)?);
                }
            }
            Ok(())
        }
    }
}
