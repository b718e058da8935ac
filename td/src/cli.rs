use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pmr")]
#[command(author, version, about = "Local task orchestrator for LLM-driven code-change sessions", long_about = None)]
pub struct Cli {
    /// Path to a pmrunner.yml config file, overriding the fallback chain
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Repository root the executor operates in (defaults to the current directory)
    #[arg(long, global = true)]
    pub repo_root: Option<PathBuf>,

    /// Override the auto-derived namespace
    #[arg(long, global = true)]
    pub namespace: Option<String>,

    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the queue poller and local HTTP API and run until interrupted
    Serve {
        #[arg(long, default_value = "4756")]
        port: u16,
    },

    /// Enqueue a task and print its task_id
    Submit {
        #[arg(long)]
        task_group_id: String,

        #[arg(required = true)]
        prompt: String,
    },

    /// Print a task's current status and output
    Status {
        #[arg(required = true)]
        task_id: String,
    },

    /// List task ids queued in the namespace
    List,
}
