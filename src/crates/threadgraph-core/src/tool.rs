//! Tool collaborators and the `tools` node
//!
//! A [`Tool`] wraps an async executor `args -> Result<Value, ToolError>`. The
//! [`ToolRegistry`] dispatches [`ToolCall`]s by name and never fails: missing
//! tools and executor errors come back as [`ToolOutput::Error`].
//!
//! [`ToolNode`] turns a registry into a graph node. For every call pending on
//! the newest assistant message it runs the tool, in request order and one at
//! a time, and appends one tool-result message per call.
//!
//! ```rust
//! use serde_json::json;
//! use threadgraph_core::tool::{Tool, ToolRegistry};
//!
//! let mut tools = ToolRegistry::new();
//! tools.register(Tool::from_fn(
//!     "echo",
//!     "Return the arguments unchanged",
//!     json!({"type": "object"}),
//!     |args| async move { Ok(args) },
//! ));
//! assert!(tools.has_tool("echo"));
//! ```

use crate::error::NodeError;
use crate::messages::{messages_update, pending_tool_calls, Message};
use crate::node::{node_fn, NodeFn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use threadgraph_checkpoint::State;

/// Name of the node that executes pending tool calls.
pub const TOOLS_NODE: &str = "tools";

pub type ToolResult = Result<Value, ToolError>;

pub type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

pub type ToolExecutor = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolError {
    #[error("Tool '{0}' not found. Available tools: {1}")]
    ToolNotFound(String, String),

    #[error("Invalid arguments for tool '{tool}': {error}")]
    InvalidArguments { tool: String, error: String },

    #[error("Tool '{tool}' execution failed: {error}")]
    ExecutionFailed { tool: String, error: String },
}

impl ToolError {
    pub fn invalid_arguments(tool: impl Into<String>, error: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            error: error.into(),
        }
    }

    pub fn execution_failed(tool: impl Into<String>, error: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            tool: tool.into(),
            error: error.into(),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// Schema advertised to the model as an available tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub executor: ToolExecutor,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        executor: ToolExecutor,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            executor,
        }
    }

    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        Self::new(
            name,
            description,
            parameters,
            Arc::new(move |args| Box::pin(f(args))),
        )
    }

    pub async fn execute(&self, args: Value) -> ToolResult {
        if !(args.is_object() || args.is_null()) {
            return Err(ToolError::invalid_arguments(
                &self.name,
                "arguments must be an object",
            ));
        }
        (self.executor)(args).await
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("executor", &"<function>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolOutput {
    Success { content: Value },
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub id: String,
    pub name: String,
    pub output: ToolOutput,
}

impl ToolCallResult {
    /// Tool-result message answering the originating call.
    pub fn into_message(self) -> Message {
        let message = match self.output {
            ToolOutput::Success { content } => {
                let text = match content {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                Message::tool(text, self.id)
            }
            ToolOutput::Error { error } => {
                Message::tool(json!({ "error": error }).to_string(), self.id)
                    .with_metadata(json!({ "status": "error" }))
            }
        };
        message.with_name(self.name)
    }
}

/// Tools available to a graph, keyed by name.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(Tool::definition).collect()
    }

    /// Run one call. Failures are folded into the result.
    pub async fn execute_tool_call(&self, tool_call: &ToolCall) -> ToolCallResult {
        let output = match self.get(&tool_call.name) {
            None => ToolOutput::Error {
                error: ToolError::ToolNotFound(
                    tool_call.name.clone(),
                    self.tool_names().join(", "),
                )
                .to_string(),
            },
            Some(tool) => match tool.execute(tool_call.args.clone()).await {
                Ok(content) => ToolOutput::Success { content },
                Err(e) => {
                    tracing::warn!(tool = %tool_call.name, call_id = %tool_call.id, error = %e, "Tool call failed");
                    ToolOutput::Error {
                        error: e.to_string(),
                    }
                }
            },
        };

        ToolCallResult {
            id: tool_call.id.clone(),
            name: tool_call.name.clone(),
            output,
        }
    }

    /// Run calls sequentially, preserving request order.
    pub async fn execute_tool_calls(&self, tool_calls: &[ToolCall]) -> Vec<ToolCallResult> {
        let mut results = Vec::with_capacity(tool_calls.len());
        for tool_call in tool_calls {
            results.push(self.execute_tool_call(tool_call).await);
        }
        results
    }
}

/// Graph node answering the pending tool calls of the newest message.
#[derive(Debug, Clone)]
pub struct ToolNode {
    registry: Arc<ToolRegistry>,
}

impl ToolNode {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub async fn run(&self, state: State) -> Result<State, NodeError> {
        let calls = pending_tool_calls(&state);
        if calls.is_empty() {
            return Ok(State::new());
        }

        tracing::debug!(count = calls.len(), "Executing tool calls");
        let results = self.registry.execute_tool_calls(&calls).await;
        Ok(messages_update(
            results.into_iter().map(ToolCallResult::into_message),
        )?)
    }

    pub fn into_node(self) -> NodeFn {
        node_fn(move |state| {
            let node = self.clone();
            async move { node.run(state).await }
        })
    }
}
