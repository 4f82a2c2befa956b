//! threadgraph CLI - checkpointed conversations from the terminal

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use threadgraph_checkpoint::SqliteCheckpointStore;
use threadgraph_cli::{build_engine, commands, Agent, ConfigLoader, ConfigOverrides};
use threadgraph_core::{Resolution, StepIndex};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "threadgraph")]
#[command(about = "threadgraph - resumable, inspectable agent conversations", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Checkpoint database file
    #[arg(long, global = true, env = "THREADGRAPH_DB")]
    db: Option<PathBuf>,

    /// Node executions allowed per invocation
    #[arg(long, global = true, env = "THREADGRAPH_MAX_STEPS")]
    max_steps: Option<usize>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, env = "THREADGRAPH_LOG")]
    log_level: Option<String>,

    /// Graph to run
    #[arg(long, global = true, value_enum, default_value_t = Agent::Reviewed)]
    agent: Agent,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message to a thread
    Chat {
        /// Message text; `/tool <name> <json>` requests a tool
        message: String,
        /// Thread ID; a new thread is started when omitted
        #[arg(short, long)]
        thread: Option<String>,
        /// Print each node as it completes
        #[arg(short, long)]
        stream: bool,
    },
    /// Answer a pending review: approve, reject or revise
    Resume {
        /// Thread ID
        thread: String,
        resolution: Resolution,
        #[arg(short, long)]
        stream: bool,
    },
    /// Show whether a thread is idle or waiting for review
    Status {
        /// Thread ID
        thread: String,
    },
    /// List a thread's checkpoints, newest first
    History {
        /// Thread ID
        thread: String,
        /// Only checkpoints written by this node
        #[arg(short, long)]
        node: Option<String>,
        /// Maximum number of checkpoints
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Print one checkpoint
    Show {
        /// Thread ID
        thread: String,
        step: StepIndex,
    },
    /// Copy a thread up to a step into a new thread
    Fork {
        /// Source thread ID
        thread: String,
        step: StepIndex,
        /// New thread ID
        new_thread: String,
    },
    /// Fork at a step and run the fork onward
    Replay {
        /// Source thread ID
        thread: String,
        step: StepIndex,
        /// New thread ID
        new_thread: String,
    },
    /// List threads with checkpoints
    Threads,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::new().load().await?;
    config.apply(ConfigOverrides {
        database: cli.db,
        max_steps: cli.max_steps,
        log_level: cli.log_level,
    });

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let db_path = config.database_path();
    tracing::debug!(path = %db_path.display(), agent = %cli.agent, "Opening checkpoint store");
    let store = Arc::new(SqliteCheckpointStore::open(&db_path).await?);
    let engine = build_engine(cli.agent, store.clone(), config.engine.clone())?;

    let result = match cli.command {
        Commands::Chat { message, thread, stream } => {
            let thread = thread.unwrap_or_else(commands::new_thread_id);
            commands::handle_chat(&engine, &thread, &message, stream).await
        }
        Commands::Resume { thread, resolution, stream } => {
            commands::handle_resume(&engine, &thread, resolution, stream).await
        }
        Commands::Status { thread } => commands::handle_status(&engine, &thread).await,
        Commands::History { thread, node, limit } => {
            commands::handle_history(&engine, &thread, node, limit).await
        }
        Commands::Show { thread, step } => commands::handle_show(&engine, &thread, step).await,
        Commands::Fork { thread, step, new_thread } => {
            commands::handle_fork(&engine, &thread, step, &new_thread).await
        }
        Commands::Replay { thread, step, new_thread } => {
            commands::handle_replay(&engine, &thread, step, &new_thread).await
        }
        Commands::Threads => commands::handle_threads(&engine).await,
    };

    store.close().await;
    result
}
