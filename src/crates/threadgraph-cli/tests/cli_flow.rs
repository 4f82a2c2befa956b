//! End-to-end runs of the command handlers against a SQLite store.

use std::sync::Arc;
use tempfile::TempDir;
use threadgraph_checkpoint::SqliteCheckpointStore;
use threadgraph_cli::{build_engine, commands, Agent};
use threadgraph_core::{
    last_message, messages, Engine, EngineConfig, GraphError, Resolution, ThreadStatus,
};

async fn engine(dir: &TempDir, agent: Agent) -> Engine {
    let store = SqliteCheckpointStore::open(dir.path().join("threadgraph.db"))
        .await
        .unwrap();
    build_engine(agent, Arc::new(store), EngineConfig::default()).unwrap()
}

#[tokio::test]
async fn test_review_round_trip() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, Agent::Reviewed).await;

    commands::handle_chat(&engine, "t1", "/tool search turkey", false)
        .await
        .unwrap();
    let ThreadStatus::Suspended { pending } = engine.status("t1").await.unwrap() else {
        panic!("expected the thread to wait for review");
    };
    assert_eq!(pending.step, 1);
    assert_eq!(pending.tool_calls[0].name, "search");

    commands::handle_status(&engine, "t1").await.unwrap();
    commands::handle_resume(&engine, "t1", Resolution::Approve, false)
        .await
        .unwrap();

    let latest = engine.inspector().latest("t1").await.unwrap().unwrap();
    assert_eq!(latest.step, 4);
    assert_eq!(
        last_message(&latest.state).unwrap().content,
        "Tool search returned: Turkey population (2024): 85.3 million"
    );
    assert!(matches!(
        engine.status("t1").await.unwrap(),
        ThreadStatus::Idle { step: 4, .. }
    ));
}

#[tokio::test]
async fn test_resume_without_pending_review_fails() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, Agent::Reviewed).await;

    commands::handle_chat(&engine, "t1", "hello", false).await.unwrap();
    let err = commands::handle_resume(&engine, "t1", Resolution::Reject, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<GraphError>(),
        Some(GraphError::NotSuspended { .. })
    ));
}

#[tokio::test]
async fn test_streamed_chat_persists_like_invoke() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, Agent::Tools).await;

    commands::handle_chat(&engine, "t1", r#"/tool calculator {"a": 6, "b": 7, "op": "mul"}"#, true)
        .await
        .unwrap();

    let latest = engine.inspector().latest("t1").await.unwrap().unwrap();
    // input, chatbot, tools, chatbot
    assert_eq!(latest.step, 3);
    assert_eq!(
        last_message(&latest.state).unwrap().content,
        "Tool calculator returned: 42.0"
    );
}

#[tokio::test]
async fn test_inspection_commands() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, Agent::Reviewed).await;

    commands::handle_chat(&engine, "t1", "/tool search rust", false)
        .await
        .unwrap();
    commands::handle_resume(&engine, "t1", Resolution::Reject, false)
        .await
        .unwrap();

    commands::handle_history(&engine, "t1", None, None).await.unwrap();
    commands::handle_history(&engine, "t1", Some("chatbot".to_string()), Some(1))
        .await
        .unwrap();
    commands::handle_show(&engine, "t1", 1).await.unwrap();
    commands::handle_threads(&engine).await.unwrap();

    let err = commands::handle_show(&engine, "t1", 99).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<GraphError>(),
        Some(GraphError::CheckpointNotFound { step: 99, .. })
    ));
}

#[tokio::test]
async fn test_fork_and_replay_leave_source_untouched() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, Agent::Reviewed).await;

    commands::handle_chat(&engine, "t1", "/tool search sqlite", false)
        .await
        .unwrap();
    commands::handle_resume(&engine, "t1", Resolution::Approve, false)
        .await
        .unwrap();
    let source = engine.inspector().list("t1").await.unwrap();

    commands::handle_fork(&engine, "t1", 0, "copy").await.unwrap();
    assert_eq!(engine.inspector().list("copy").await.unwrap().len(), 1);

    // replay from the suspension point stops at the gate again
    commands::handle_replay(&engine, "t1", 1, "replayed").await.unwrap();
    assert!(matches!(
        engine.status("replayed").await.unwrap(),
        ThreadStatus::Suspended { .. }
    ));

    assert_eq!(engine.inspector().list("t1").await.unwrap(), source);
    let threads = engine.inspector().threads().await.unwrap();
    assert_eq!(threads.len(), 3);
}

#[tokio::test]
async fn test_persona_agent_tracks_mode_and_profile() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, Agent::Persona).await;

    commands::handle_chat(&engine, "p1", "Hi, my name is ada", false)
        .await
        .unwrap();
    commands::handle_chat(&engine, "p1", "please switch to technical mode", false)
        .await
        .unwrap();

    let latest = engine.inspector().latest("p1").await.unwrap().unwrap();
    assert_eq!(latest.state.get("mode"), Some(&serde_json::json!("technical")));
    assert_eq!(latest.state.get("message_count"), Some(&serde_json::json!(2)));
    assert_eq!(
        latest.state.get("user_profile").and_then(|p| p.get("name")),
        Some(&serde_json::json!("Ada"))
    );

    let transcript = messages(&latest.state).unwrap();
    assert_eq!(
        transcript.last().unwrap().content,
        "[technical] You said: please switch to technical mode"
    );
}
