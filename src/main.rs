//! Taskweave CLI — wire config, store, pipeline, and engine together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use taskweave_core::TaskweaveConfig;
use taskweave_core::types::{Task, TriggerKind, TriggerSource, WorkKind};
use taskweave_engine::{Runner, Scheduler, compute_next_due};
use taskweave_pipeline::AgentPipeline;
use taskweave_store::TaskStore;

#[derive(Parser)]
#[command(name = "taskweave", version, about = "Asynchronous task scheduling and multi-agent execution engine")]
struct Cli {
    /// Path to a config file (default: ~/.taskweave/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler loop until Ctrl-C.
    Serve,
    /// Run one task now, through the claim protocol.
    Run {
        task_id: String,
        #[arg(long, default_value = "local")]
        owner: String,
    },
    /// Create a task and compute its first due time.
    Add {
        #[arg(long, default_value = "local")]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// general, report, or analysis.
        #[arg(long, default_value = "general")]
        kind: String,
        /// manual, once, daily, or interval_hours.
        #[arg(long, default_value = "manual")]
        trigger: String,
        /// Trigger payload: timestamp, HH:MM, or hour count.
        #[arg(long, default_value = "")]
        value: String,
        #[arg(long, default_value = "UTC")]
        timezone: String,
        /// Execution-policy JSON blob.
        #[arg(long, default_value = "")]
        policy: String,
    },
    /// List tasks for an owner.
    Tasks {
        #[arg(long, default_value = "local")]
        owner: String,
    },
    /// List recent runs of a task.
    Runs {
        task_id: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => TaskweaveConfig::load_from(path)?,
        None => TaskweaveConfig::load()?,
    };
    if let Some(parent) = Path::new(&config.store.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(TaskStore::open(Path::new(&config.store.path))?);

    match cli.command {
        Command::Serve => {
            let runner = make_runner(&config, store.clone());
            let scheduler = Arc::new(Scheduler::new(
                store,
                runner,
                config.scheduler.interval_secs,
                config.scheduler.batch_cap,
            ));
            scheduler.clone().start();
            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down");
            scheduler.stop();
        }

        Command::Run { task_id, owner } => {
            let runner = make_runner(&config, store);
            let (task, claimed) = runner.claim_work(&task_id, &owner)?;
            if !claimed {
                println!("Task '{}' is already running — not claimed", task.name);
                return Ok(());
            }
            match runner
                .execute_claimed(&CancellationToken::new(), task, TriggerSource::Manual)
                .await
            {
                Ok(run) => {
                    println!("✔ {}", run.summary);
                    println!("\n{}", run.final_answer);
                    println!("\nconfidence: {:.2}", run.confidence);
                }
                Err(e) => {
                    eprintln!("✖ {e}");
                    std::process::exit(1);
                }
            }
        }

        Command::Add {
            owner,
            name,
            description,
            kind,
            trigger,
            value,
            timezone,
            policy,
        } => {
            let trigger_type = TriggerKind::parse(&trigger)?;
            let mut task = Task::new(
                &owner,
                &name,
                WorkKind::from_str_lossy(&kind),
                trigger_type,
                &value,
                &timezone,
            );
            task.description = description;
            task.config_json = policy;
            // Fails fast on a bad trigger spec instead of storing it.
            task.next_due_at = compute_next_due(trigger_type, &value, &timezone, task.created_at)?;
            if task.next_due_at.is_some() {
                task.async_status = taskweave_core::types::AsyncStatus::Scheduled;
            }
            store.save_task(&task)?;
            match task.next_due_at {
                Some(due) => println!("Task {} created, next run {}", task.id, due),
                None => println!("Task {} created (manual trigger)", task.id),
            }
        }

        Command::Tasks { owner } => {
            for task in store.list_tasks(&owner)? {
                println!(
                    "{}  [{}/{}]  {}  trigger={}:{}  next={}",
                    task.id,
                    task.async_status.as_str(),
                    task.status.as_str(),
                    task.name,
                    task.trigger_type.as_str(),
                    task.trigger_value,
                    task.next_due_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".into()),
                );
            }
        }

        Command::Runs { task_id, limit } => {
            for run in store.list_runs(&task_id, limit)? {
                println!(
                    "{}  [{}]  {}  {}",
                    run.id,
                    run.status.as_str(),
                    run.started_at.to_rfc3339(),
                    run.summary,
                );
            }
        }
    }

    Ok(())
}

fn make_runner(config: &TaskweaveConfig, store: Arc<TaskStore>) -> Arc<Runner> {
    let client = taskweave_providers::create_client(&config.llm);
    let pipeline = Arc::new(AgentPipeline::new(client, config.llm.temperature));
    Arc::new(Runner::new(store, pipeline))
}
