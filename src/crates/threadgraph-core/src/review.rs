//! Human review gate
//!
//! The gate sits between the model's tool proposals and the `tools` node. It
//! performs no I/O and never waits: when routing reaches the gate and no
//! `approval` is recorded in state, the engine stops with
//! [`RunStatus::Suspended`](crate::RunStatus::Suspended) and hands the caller a
//! [`PendingReview`]. The caller answers with [`Engine::resume`](crate::Engine::resume),
//! which records the [`Resolution`] under `approval` and runs the gate.
//!
//! | Resolution | Messages appended                  | `review`   | Next      |
//! |------------|------------------------------------|------------|-----------|
//! | `approve`  | none, the tool calls stay pending  | `approved` | `tools`   |
//! | `reject`   | assistant rejection notice         | `rejected` | `END`     |
//! | `revise`   | assistant reconsideration notice   | `revised`  | `chatbot` |
//!
//! The gate always clears `approval`, so the next proposal is gated again.

use crate::error::NodeError;
use crate::messages::{messages_update, pending_tool_calls, Message};
use crate::node::{node_fn, NodeFn};
use crate::tool::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use threadgraph_checkpoint::{State, StepIndex};

/// Field carrying the caller's resolution into the gate.
pub const APPROVAL_FIELD: &str = "approval";

/// Field recording what the gate decided.
pub const REVIEW_FIELD: &str = "review";

pub const REJECTION_MESSAGE: &str = "I wanted to search for information, but the tool use was not approved. I'll try to answer based on my existing knowledge instead.";

pub const REVISION_MESSAGE: &str = "Let me reconsider the approach based on the feedback provided.";

/// Externally supplied answer to a pending review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Approve,
    Reject,
    Revise,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Approve => "approve",
            Resolution::Reject => "reject",
            Resolution::Revise => "revise",
        }
    }

    pub fn from_state(state: &State) -> Option<Self> {
        state
            .get(APPROVAL_FIELD)
            .and_then(|value| Resolution::deserialize(value).ok())
    }

    /// State delta recording this resolution for the gate.
    pub fn to_update(self) -> State {
        State::new().with(APPROVAL_FIELD, json!(self.as_str()))
    }

    pub fn outcome(self) -> ReviewOutcome {
        match self {
            Resolution::Approve => ReviewOutcome::Approved,
            Resolution::Reject => ReviewOutcome::Rejected,
            Resolution::Revise => ReviewOutcome::Revised,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown resolution '{0}', expected approve, reject or revise")]
pub struct ParseResolutionError(String);

impl FromStr for Resolution {
    type Err = ParseResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Resolution::Approve),
            "reject" => Ok(Resolution::Reject),
            "revise" => Ok(Resolution::Revise),
            _ => Err(ParseResolutionError(s.to_string())),
        }
    }
}

/// What the gate decided, stored under [`REVIEW_FIELD`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewOutcome {
    Approved,
    Rejected,
    Revised,
}

impl ReviewOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewOutcome::Approved => "approved",
            ReviewOutcome::Rejected => "rejected",
            ReviewOutcome::Revised => "revised",
        }
    }

    pub fn from_state(state: &State) -> Option<Self> {
        state
            .get(REVIEW_FIELD)
            .and_then(|value| ReviewOutcome::deserialize(value).ok())
    }
}

/// Description of the tool calls awaiting a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReview {
    /// Gate the thread is waiting at
    pub gate: String,
    /// Step of the checkpoint the thread is suspended on
    pub step: StepIndex,
    pub tool_calls: Vec<ToolCall>,
    pub description: String,
}

impl PendingReview {
    pub fn from_state(gate: impl Into<String>, step: StepIndex, state: &State) -> Self {
        let tool_calls = pending_tool_calls(state);
        let description = describe(&tool_calls);
        Self {
            gate: gate.into(),
            step,
            tool_calls,
            description,
        }
    }

    pub fn resolutions(&self) -> [Resolution; 3] {
        [Resolution::Approve, Resolution::Reject, Resolution::Revise]
    }
}

fn describe(tool_calls: &[ToolCall]) -> String {
    let calls: Vec<String> = tool_calls
        .iter()
        .map(|call| format!("{}({})", call.name, call.args))
        .collect();
    format!(
        "Approval needed for {} tool call{}: {}",
        calls.len(),
        if calls.len() == 1 { "" } else { "s" },
        calls.join(", ")
    )
}

/// Gate node applying a recorded [`Resolution`].
#[derive(Debug, Clone)]
pub struct HumanReviewGate {
    rejection_message: String,
    revision_message: String,
}

impl Default for HumanReviewGate {
    fn default() -> Self {
        Self {
            rejection_message: REJECTION_MESSAGE.to_string(),
            revision_message: REVISION_MESSAGE.to_string(),
        }
    }
}

impl HumanReviewGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rejection_message(mut self, message: impl Into<String>) -> Self {
        self.rejection_message = message.into();
        self
    }

    pub fn with_revision_message(mut self, message: impl Into<String>) -> Self {
        self.revision_message = message.into();
        self
    }

    pub fn review(&self, state: &State) -> Result<State, NodeError> {
        let resolution = Resolution::from_state(state)
            .ok_or_else(|| NodeError::failed("review gate reached without a resolution"))?;

        let mut delta = match resolution {
            Resolution::Approve => State::new(),
            Resolution::Reject => {
                messages_update(vec![Message::assistant(self.rejection_message.clone())])?
            }
            Resolution::Revise => {
                messages_update(vec![Message::assistant(self.revision_message.clone())])?
            }
        };
        delta.insert(APPROVAL_FIELD, Value::Null);
        delta.insert(REVIEW_FIELD, json!(resolution.outcome().as_str()));

        tracing::info!(resolution = %resolution, "Review resolved");
        Ok(delta)
    }

    pub fn into_node(self) -> NodeFn {
        node_fn(move |state| {
            let result = self.review(&state);
            async move { result }
        })
    }
}
