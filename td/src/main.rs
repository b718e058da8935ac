use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info};

use pmrunner::cli::{Cli, Command};
use pmrunner::config::Config;
use pmrunner::executor::{Executor, ProcessExecutor};
use pmrunner::pipeline::Pipeline;
use pmrunner::planner::PlannerConfig;
use pmrunner::poller::{PollerConfig, QueuePoller};
use pmrunner::retry::{RetryManager, RetryPolicy};
use pmrunner::api::ApiServer;

use taskstore::{derive_namespace, ConversationTracer, QueueStore};

/// Rotating log file under `<state_dir>/logs`, the way
/// `taskdaemon::main::setup_logging` resolves a log directory via `dirs`.
fn setup_logging(state_dir: &std::path::Path, log_level: Option<&str>) -> Result<()> {
    let log_dir = state_dir.join("logs");
    fs::create_dir_all(&log_dir).context("failed to create log directory")?;

    let level = match log_level.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some("INFO") | None => tracing::Level::INFO,
        Some(other) => {
            eprintln!("Warning: unknown log-level '{other}', defaulting to INFO");
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(log_dir.join("pmrunner.log")).context("failed to create log file")?;
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("failed to load configuration")?;

    let repo_root = cli.repo_root.clone().unwrap_or_else(|| PathBuf::from("."));
    let namespace = cli.namespace.clone().or_else(|| config.storage.namespace.clone()).unwrap_or_else(|| derive_namespace(&repo_root));
    let state_dir = repo_root.join(&config.storage.state_dir);

    setup_logging(&state_dir, cli.log_level.as_deref())?;
    debug!(%namespace, ?state_dir, "main: resolved namespace and state dir");

    let queue = Arc::new(QueueStore::spawn(&state_dir)?);

    match cli.command {
        Command::Serve { port } => cmd_serve(config, queue, namespace, state_dir, repo_root, port).await,
        Command::Submit { task_group_id, prompt } => cmd_submit(queue, &namespace, &task_group_id, &prompt).await,
        Command::Status { task_id } => cmd_status(queue, &namespace, &task_id).await,
        Command::List => cmd_list(queue, &namespace).await,
    }
}

async fn cmd_serve(config: Config, queue: Arc<QueueStore>, namespace: String, state_dir: PathBuf, repo_root: PathBuf, port: u16) -> Result<()> {
    let executor: Arc<dyn Executor> = Arc::new(ProcessExecutor::new(&config.executor.binary, config.executor.timeout_ms));
    if !executor.is_available().await {
        eprintln!("warning: executor binary '{}' not found on PATH", config.executor.binary);
    }

    let tracer = Arc::new(ConversationTracer::new(&state_dir));
    let retry = Arc::new(RetryManager::new(RetryPolicy::from(&config.retry)));
    let pipeline = Arc::new(Pipeline::new(executor, tracer, retry, PlannerConfig::default(), config.chunking.clone(), repo_root));

    let poller = Arc::new(QueuePoller::new(
        queue.clone(),
        pipeline,
        PollerConfig {
            namespace: namespace.clone(),
            poll_interval_ms: 1_000,
            stale_threshold_ms: 300_000,
        },
    ));

    let api = ApiServer::new(queue, namespace, state_dir.display().to_string());

    let poller_task = {
        let poller = poller.clone();
        tokio::spawn(async move { poller.run().await })
    };
    let api_task = tokio::spawn(async move { api.serve(port).await });

    tokio::select! {
        result = poller_task => result.context("poller task panicked")?,
        result = api_task => result.context("api task panicked")?.context("api server failed")?,
    }

    Ok(())
}

async fn cmd_submit(queue: Arc<QueueStore>, namespace: &str, task_group_id: &str, prompt: &str) -> Result<()> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let task = queue.enqueue(namespace, &session_id, task_group_id, prompt, None, None).await?;
    println!("{}", task.task_id);
    Ok(())
}

async fn cmd_status(queue: Arc<QueueStore>, namespace: &str, task_id: &str) -> Result<()> {
    match queue.get_item(namespace, task_id).await? {
        Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
        None => {
            eprintln!("unknown task: {task_id}");
            std::process::exit(4);
        }
    }
    Ok(())
}

async fn cmd_list(queue: Arc<QueueStore>, namespace: &str) -> Result<()> {
    let groups = queue.get_all_task_groups(namespace).await?;
    for group in groups {
        println!("{group}");
    }
    Ok(())
}
