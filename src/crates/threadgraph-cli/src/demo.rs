//! Offline agents for the command line
//!
//! [`EchoModel`] stands in for a real provider so every graph shape can be
//! driven from a terminal without network access. A human message of the form
//! `/tool <name> <json args>` makes it request that tool; anything else is
//! echoed back.

use async_trait::async_trait;
use clap::ValueEnum;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use threadgraph_core::{
    prebuilt, ChatModel, CheckpointStore, Engine, EngineConfig, GraphBuilder, HumanReviewGate,
    Message, MessageRole, ModelError, Result, Tool, ToolCall, ToolDefinition, ToolError, ToolRegistry,
};

/// Graph shapes selectable with `--agent`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Agent {
    /// chatbot only
    Basic,
    /// chatbot with tools
    Tools,
    /// chatbot with tools behind human review
    #[default]
    Reviewed,
    /// tools plus mode and user-profile tracking
    Persona,
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Agent::Basic => "basic",
            Agent::Tools => "tools",
            Agent::Reviewed => "reviewed",
            Agent::Persona => "persona",
        })
    }
}

impl Agent {
    pub fn graph(self, model: Arc<dyn ChatModel>, tools: Arc<ToolRegistry>) -> GraphBuilder {
        match self {
            Agent::Basic => prebuilt::chatbot_graph(model),
            Agent::Tools => prebuilt::tool_agent(model, tools),
            Agent::Reviewed => prebuilt::reviewed_tool_agent(model, tools, HumanReviewGate::new()),
            Agent::Persona => prebuilt::persona_agent(model, tools),
        }
    }
}

/// Compile `agent` over the offline model and the demo tools.
pub fn build_engine(
    agent: Agent,
    store: Arc<dyn CheckpointStore>,
    config: EngineConfig,
) -> Result<Engine> {
    agent
        .graph(Arc::new(EchoModel), Arc::new(demo_tools()))
        .compile_with_config(store, config)
}

/// Deterministic stand-in for a chat model.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoModel;

impl EchoModel {
    fn tool_request(text: &str, tools: &[ToolDefinition], call_id: usize) -> Option<Message> {
        let rest = text.trim().strip_prefix("/tool ")?;
        let (name, args) = match rest.trim().split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest.trim(), ""),
        };
        if !tools.iter().any(|t| t.name == name) {
            return None;
        }
        let args = if args.is_empty() {
            json!({})
        } else {
            serde_json::from_str(args).unwrap_or_else(|_| json!({ "query": args }))
        };
        Some(Message::assistant("").with_tool_calls(vec![ToolCall::new(
            format!("call_{}", call_id),
            name,
            args,
        )]))
    }
}

#[async_trait]
impl ChatModel for EchoModel {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> std::result::Result<Message, ModelError> {
        let mode = messages
            .iter()
            .find(|m| m.role == MessageRole::System)
            .and_then(|m| m.content.split("operating in ").nth(1))
            .and_then(|rest| rest.split_whitespace().next())
            .map(str::to_string);

        let Some(last) = messages.iter().rev().find(|m| m.role != MessageRole::System) else {
            return Ok(Message::assistant("Hello! Send me a message to get started."));
        };

        let reply = match last.role {
            MessageRole::Human => {
                if let Some(request) = Self::tool_request(&last.content, tools, messages.len()) {
                    return Ok(request);
                }
                format!("You said: {}", last.content)
            }
            MessageRole::Tool => format!(
                "Tool {} returned: {}",
                last.name.as_deref().unwrap_or("unknown"),
                last.content
            ),
            _ => "I'll answer from what I already know.".to_string(),
        };

        Ok(Message::assistant(match mode {
            Some(mode) => format!("[{}] {}", mode, reply),
            None => reply,
        }))
    }
}

/// `calculator` and an offline `search`.
pub fn demo_tools() -> ToolRegistry {
    ToolRegistry::new()
        .with_tool(Tool::from_fn(
            "calculator",
            "Apply add, sub, mul or div to two numbers",
            json!({
                "type": "object",
                "properties": {
                    "a": {"type": "number"},
                    "b": {"type": "number"},
                    "op": {"type": "string", "enum": ["add", "sub", "mul", "div"]}
                },
                "required": ["a", "b", "op"]
            }),
            |args| async move { calculate(&args) },
        ))
        .with_tool(Tool::from_fn(
            "search",
            "Look up a topic in the offline reference notes",
            json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
            |args| async move { search(&args) },
        ))
}

fn calculate(args: &Value) -> std::result::Result<Value, ToolError> {
    let number = |key: &str| {
        args.get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| ToolError::invalid_arguments("calculator", format!("'{}' must be a number", key)))
    };
    let (a, b) = (number("a")?, number("b")?);

    let result = match args.get("op").and_then(Value::as_str) {
        Some("add") => a + b,
        Some("sub") => a - b,
        Some("mul") => a * b,
        Some("div") if b == 0.0 => {
            return Err(ToolError::execution_failed("calculator", "division by zero"))
        }
        Some("div") => a / b,
        other => {
            return Err(ToolError::invalid_arguments(
                "calculator",
                format!("unsupported op {:?}", other),
            ))
        }
    };
    Ok(json!(result))
}

const NOTES: &[(&str, &str)] = &[
    ("turkey", "Turkey population (2024): 85.3 million"),
    ("rust", "Rust 1.0 was released on 15 May 2015"),
    ("sqlite", "SQLite stores a whole database in a single file"),
];

fn search(args: &Value) -> std::result::Result<Value, ToolError> {
    let query = args
        .get("query")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid_arguments("search", "'query' must be a string"))?;
    let lowered = query.to_lowercase();

    Ok(NOTES
        .iter()
        .find(|(topic, _)| lowered.contains(topic))
        .map(|(_, note)| json!(note))
        .unwrap_or_else(|| json!(format!("No results for '{}'", query))))
}
