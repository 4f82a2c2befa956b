//! Command handlers for the `threadgraph` binary

use anyhow::Result;
use colored::Colorize;
use futures::StreamExt;
use tabled::{Table, Tabled};
use threadgraph_checkpoint::{CheckpointSummary, HistoryQuery};
use threadgraph_core::{
    messages, messages_update, CancellationToken, Engine, ExecutionEvent, Message, MessageRole,
    PendingReview, Resolution, RunOutcome, RunStatus, State, StepIndex, ThreadStatus,
};

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Step")]
    step: StepIndex,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Messages")]
    messages: usize,
    #[tabled(rename = "Created")]
    created: String,
}

impl From<CheckpointSummary> for HistoryRow {
    fn from(summary: CheckpointSummary) -> Self {
        Self {
            step: summary.step,
            node: summary.node,
            messages: summary.message_count,
            created: summary.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

fn print_message(message: &Message) {
    let speaker = match message.role {
        MessageRole::Human => "you".cyan().bold(),
        MessageRole::Assistant => "assistant".green().bold(),
        MessageRole::Tool => format!("tool:{}", message.name.as_deref().unwrap_or("?")).yellow().bold(),
        MessageRole::System => "system".dimmed(),
    };
    if !message.content.is_empty() {
        println!("{}: {}", speaker, message.content);
    }
    for call in &message.tool_calls {
        println!("{}: requests {}({})", speaker, call.name.bold(), call.args);
    }
}

/// Print messages past the first `from` entries of `state`'s transcript.
fn print_new_messages(state: &State, from: usize) -> Result<()> {
    for message in messages(state)?.iter().skip(from) {
        if message.role != MessageRole::Human {
            print_message(message);
        }
    }
    Ok(())
}

fn print_pending(thread_id: &str, pending: &PendingReview) {
    println!("{}", "⚠ Waiting for human review".yellow().bold());
    println!("  {}", pending.description);
    println!("  Gate: {} (step {})", pending.gate, pending.step);
    let options: Vec<&str> = pending.resolutions().iter().map(|r| r.as_str()).collect();
    println!(
        "  Continue with: threadgraph resume {} <{}>",
        thread_id,
        options.join("|")
    );
}

fn print_outcome(thread_id: &str, outcome: &RunOutcome) {
    match (&outcome.status, &outcome.pending) {
        (RunStatus::Suspended, Some(pending)) => print_pending(thread_id, pending),
        _ => println!("{}", format!("✓ Completed at step {}", outcome.step).dimmed()),
    }
}

async fn transcript_len(engine: &Engine, thread_id: &str) -> Result<usize> {
    Ok(engine
        .inspector()
        .latest(thread_id)
        .await?
        .map(|checkpoint| checkpoint.message_count())
        .unwrap_or(0))
}

/// Cancel the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, abandoning the running node");
            token.cancel();
        }
    });
    cancel
}

pub fn new_thread_id() -> String {
    let thread_id = uuid::Uuid::new_v4().to_string();
    println!("{} {}", "Started thread".dimmed(), thread_id.bold());
    thread_id
}

/// Handle `chat`: send one human message to a thread.
pub async fn handle_chat(engine: &Engine, thread_id: &str, text: &str, stream: bool) -> Result<()> {
    let input = messages_update(vec![Message::human(text)])?;
    let cancel = cancel_on_ctrl_c();

    if stream {
        return print_stream(thread_id, engine.stream_with_cancel(thread_id, input, cancel)).await;
    }

    let before = transcript_len(engine, thread_id).await?;
    let outcome = engine.invoke_with_cancel(thread_id, input, cancel).await?;
    print_new_messages(&outcome.state, before)?;
    print_outcome(thread_id, &outcome);
    Ok(())
}

/// Handle `resume`: answer a pending review.
pub async fn handle_resume(
    engine: &Engine,
    thread_id: &str,
    resolution: Resolution,
    stream: bool,
) -> Result<()> {
    if stream {
        return print_stream(thread_id, engine.stream_resume(thread_id, resolution)).await;
    }

    let before = transcript_len(engine, thread_id).await?;
    let outcome = engine
        .resume_with_cancel(thread_id, resolution, cancel_on_ctrl_c())
        .await?;
    println!("{} {}", "✓ Review resolved:".green(), resolution);
    print_new_messages(&outcome.state, before)?;
    print_outcome(thread_id, &outcome);
    Ok(())
}

async fn print_stream(thread_id: &str, mut events: threadgraph_core::EventStream) -> Result<()> {
    while let Some(event) = events.next().await {
        match event? {
            ExecutionEvent::NodeCompleted { step, node, delta } => {
                println!("{}", format!("── step {} · {}", step, node).dimmed());
                print_new_messages(&delta, 0)?;
            }
            ExecutionEvent::Suspended { pending, .. } => print_pending(thread_id, &pending),
            ExecutionEvent::Completed { step, .. } => {
                println!("{}", format!("✓ Completed at step {}", step).dimmed());
            }
        }
    }
    Ok(())
}

/// Handle `status`.
pub async fn handle_status(engine: &Engine, thread_id: &str) -> Result<()> {
    match engine.status(thread_id).await? {
        ThreadStatus::Empty => println!("{}", format!("Thread '{}' has no checkpoints", thread_id).yellow()),
        ThreadStatus::Idle { step, node } => {
            println!("Thread: {}", thread_id.bold());
            println!("  Status: {}", "idle".green());
            println!("  Latest: step {} ({})", step, node);
        }
        ThreadStatus::Suspended { pending } => {
            println!("Thread: {}", thread_id.bold());
            println!("  Status: {}", "suspended".yellow());
            print_pending(thread_id, &pending);
        }
    }
    Ok(())
}

/// Handle `history`, newest first.
pub async fn handle_history(
    engine: &Engine,
    thread_id: &str,
    node: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    let mut query = HistoryQuery::new();
    if let Some(node) = node {
        query = query.node(node);
    }
    if let Some(limit) = limit {
        query = query.limit(limit);
    }

    let history = engine.inspector().list_with(thread_id, query).await?;
    if history.is_empty() {
        println!("{}", "No checkpoints found".yellow());
        return Ok(());
    }

    let rows: Vec<HistoryRow> = history.into_iter().map(HistoryRow::from).collect();
    println!("{}", Table::new(rows));
    Ok(())
}

/// Handle `show`: print one checkpoint as JSON.
pub async fn handle_show(engine: &Engine, thread_id: &str, step: StepIndex) -> Result<()> {
    let inspector = engine.inspector();
    let checkpoint = inspector.get(thread_id, step).await?;
    let next = inspector.next_node(thread_id, step).await?;

    println!("{}", serde_json::to_string_pretty(&checkpoint)?);
    println!("{} {}", "Next node:".dimmed(), next);
    Ok(())
}

/// Handle `fork`: copy steps `0..=step` into a new thread.
pub async fn handle_fork(engine: &Engine, thread_id: &str, step: StepIndex, new_thread_id: &str) -> Result<()> {
    let newest = engine.inspector().fork(thread_id, step, new_thread_id).await?;
    println!("{}", "✓ Thread forked".green().bold());
    println!("  From: {} @ step {}", thread_id, step);
    println!("  To: {} (latest step {}, {})", newest.thread_id, newest.step, newest.node);
    Ok(())
}

/// Handle `replay`: fork at `step` and run the fork onward.
pub async fn handle_replay(
    engine: &Engine,
    thread_id: &str,
    step: StepIndex,
    new_thread_id: &str,
) -> Result<()> {
    let before = engine.inspector().get(thread_id, step).await?.message_count();
    let outcome = engine.replay_from(thread_id, step, new_thread_id).await?;
    println!(
        "{}",
        format!("✓ Replayed {} from step {} into {}", thread_id, step, new_thread_id)
            .green()
            .bold()
    );
    print_new_messages(&outcome.state, before)?;
    print_outcome(new_thread_id, &outcome);
    Ok(())
}

/// Handle `threads`.
pub async fn handle_threads(engine: &Engine) -> Result<()> {
    let threads = engine.inspector().threads().await?;
    if threads.is_empty() {
        println!("{}", "No threads yet".yellow());
        return Ok(());
    }
    for thread_id in threads {
        println!("{}", thread_id);
    }
    Ok(())
}
