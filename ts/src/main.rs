//! Small admin CLI over the `taskstore` components: evidence/trace
//! verification and stale-task recovery, run out-of-process from the
//! orchestrator daemon for inspection and disaster recovery.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::*;
use eyre::{Context, Result};
use tracing::info;

use taskstore::{verify_conversation_trace, EvidenceStore, QueueStore};

#[derive(Parser, Debug)]
#[command(name = "taskstore")]
#[command(author, version, about = "Admin CLI for the taskstore durable-state layer", long_about = None)]
struct Cli {
    /// Root state directory (defaults to ./.taskstore)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify a session's evidence index hash and raw-log completeness
    VerifyEvidence {
        #[arg(required = true)]
        session_id: String,
    },

    /// Stream a conversation trace file and report validity/event counts
    VerifyTrace {
        #[arg(required = true)]
        path: PathBuf,
    },

    /// Requeue tasks stuck RUNNING past max_age_ms (crash recovery)
    Recover {
        #[arg(required = true)]
        namespace: String,

        #[arg(long, default_value = "300000")]
        max_age_ms: i64,
    },

    /// Print queue metrics for a namespace
    Metrics {
        #[arg(required = true)]
        namespace: String,
    },
}

fn setup_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("failed to set up logging")?;
    let cli = Cli::parse();
    let state_dir = cli.state_dir.unwrap_or_else(|| PathBuf::from(".taskstore"));

    match cli.command {
        Command::VerifyEvidence { session_id } => {
            let store = EvidenceStore::new(&state_dir);
            match store.verify_session_integrity(&session_id).await {
                Ok(()) => println!("{} session {} verified", "✓".green(), session_id.cyan()),
                Err(e) => {
                    println!("{} session {} failed verification: {}", "✗".red(), session_id.cyan(), e);
                    std::process::exit(1);
                }
            }
        }
        Command::VerifyTrace { path } => {
            let report = verify_conversation_trace(&path).await.context("failed to verify trace")?;
            println!("lines:            {}", report.total_lines);
            println!("valid:            {}", report.valid_lines.to_string().green());
            println!("invalid:          {}", report.invalid_lines.to_string().red());
            println!("total_iterations: {}", report.total_iterations);
            for (event, count) in &report.event_counts {
                println!("  {event}: {count}");
            }
        }
        Command::Recover { namespace, max_age_ms } => {
            let store = QueueStore::spawn(&state_dir)?;
            info!(%namespace, max_age_ms, "running stale-task recovery");
            let stats = store.recover_stale_tasks(&namespace, max_age_ms).await?;
            println!("{} requeued {} stale task(s)", "✓".green(), stats.tasks_requeued);
            store.shutdown().await?;
        }
        Command::Metrics { namespace } => {
            let store = QueueStore::spawn(&state_dir)?;
            let metrics = store.metrics(&namespace).await?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
            store.shutdown().await?;
        }
    }

    Ok(())
}
