//! Language-model collaborator
//!
//! The engine does not talk to any provider. Callers implement [`ChatModel`]
//! for theirs and wrap it in a [`ChatNode`], which feeds the transcript to the
//! model and appends the reply.
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use threadgraph_core::{ChatModel, Message, ModelError, ToolDefinition};
//!
//! struct MyProvider { /* http client, api key */ }
//!
//! #[async_trait]
//! impl ChatModel for MyProvider {
//!     async fn complete(&self, messages: &[Message], tools: &[ToolDefinition])
//!         -> Result<Message, ModelError> {
//!         // call the provider, map 429 to ModelError::RateLimited
//!     }
//! }
//! ```
//!
//! Timeouts and retries belong to the implementation; a [`ModelError`] fails
//! the node and leaves the thread at its last checkpoint.

use crate::error::{ModelError, NodeError};
use crate::messages::{messages, messages_update, Message};
use crate::node::{node_fn, NodeFn};
use crate::tool::ToolDefinition;
use async_trait::async_trait;
use std::sync::Arc;
use threadgraph_checkpoint::State;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce the next assistant message. It may carry tool-call requests
    /// for any of `tools`.
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Message, ModelError>;
}

/// Builds a system prompt from the current state; `None` sends no prompt.
pub type SystemPromptFn = Arc<dyn Fn(&State) -> Option<String> + Send + Sync>;

/// Node calling a [`ChatModel`] with the thread transcript.
#[derive(Clone)]
pub struct ChatNode {
    model: Arc<dyn ChatModel>,
    tools: Vec<ToolDefinition>,
    system_prompt: Option<SystemPromptFn>,
}

impl std::fmt::Debug for ChatNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatNode")
            .field("tools", &self.tools)
            .field("system_prompt", &self.system_prompt.is_some())
            .finish_non_exhaustive()
    }
}

impl ChatNode {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            tools: Vec::new(),
            system_prompt: None,
        }
    }

    /// Tools advertised to the model.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Prepend a system message computed from state on every call.
    ///
    /// The prompt is only sent to the model; it is never written to the transcript.
    pub fn with_system_prompt<F>(mut self, prompt: F) -> Self
    where
        F: Fn(&State) -> Option<String> + Send + Sync + 'static,
    {
        self.system_prompt = Some(Arc::new(prompt));
        self
    }

    pub async fn run(&self, state: State) -> Result<State, NodeError> {
        let mut transcript = messages(&state)?;
        if let Some(prompt) = self.system_prompt.as_ref().and_then(|build| build(&state)) {
            transcript.insert(0, Message::system(prompt));
        }

        tracing::debug!(
            messages = transcript.len(),
            tools = self.tools.len(),
            "Calling chat model"
        );
        let reply = self.model.complete(&transcript, &self.tools).await?;
        if reply.has_tool_calls() {
            tracing::debug!(calls = reply.tool_calls.len(), "Model requested tools");
        }

        Ok(messages_update(vec![reply])?)
    }

    pub fn into_node(self) -> NodeFn {
        node_fn(move |state| {
            let node = self.clone();
            async move { node.run(state).await }
        })
    }
}
