//! Ready-made conversation graphs
//!
//! Each function returns an uncompiled [`GraphBuilder`]; bind it to a store
//! with [`GraphBuilder::compile`].
//!
//! ```text
//! chatbot_graph         START -> chatbot -> END
//!
//! tool_agent            START -> chatbot -> [tools?] -> tools -> chatbot
//!                                        \-> END
//!
//! reviewed_tool_agent   START -> chatbot -> [tools?] -> human_review -> [outcome]
//!                                        \-> END         approved -> tools -> chatbot
//!                                                        revised  -> chatbot
//!                                                        rejected -> END
//!
//! persona_agent         START -> mode_controller -> profile_updater -> chatbot
//!                                                     chatbot <-> tools
//! ```

use crate::graph::GraphBuilder;
use crate::llm::{ChatModel, ChatNode};
use crate::persona::{
    mode_controller_node, persona_schema, profile_updater_node, system_prompt,
    MODE_CONTROLLER_NODE, PROFILE_UPDATER_NODE,
};
use crate::review::HumanReviewGate;
use crate::router::{after_review, review_condition, tools_condition, CHATBOT_NODE, END, HUMAN_REVIEW_NODE};
use crate::tool::{ToolNode, ToolRegistry, TOOLS_NODE};
use std::sync::Arc;

/// Single model call per turn.
pub fn chatbot_graph(model: Arc<dyn ChatModel>) -> GraphBuilder {
    let mut builder = GraphBuilder::new();
    builder
        .add_node(CHATBOT_NODE, ChatNode::new(model).into_node())
        .add_edge(CHATBOT_NODE, END)
        .set_entry(CHATBOT_NODE);
    builder
}

/// Model and tools in a loop until the model stops requesting tools.
pub fn tool_agent(model: Arc<dyn ChatModel>, tools: Arc<ToolRegistry>) -> GraphBuilder {
    let chatbot = ChatNode::new(model).with_tools(tools.definitions());

    let mut builder = GraphBuilder::new();
    builder
        .add_node(CHATBOT_NODE, chatbot.into_node())
        .add_node(TOOLS_NODE, ToolNode::new(tools).into_node())
        .add_conditional_edge(CHATBOT_NODE, tools_condition)
        .add_edge(TOOLS_NODE, CHATBOT_NODE)
        .set_entry(CHATBOT_NODE);
    builder
}

/// [`tool_agent`] with every batch of tool calls held for human review.
pub fn reviewed_tool_agent(
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    gate: HumanReviewGate,
) -> GraphBuilder {
    let chatbot = ChatNode::new(model).with_tools(tools.definitions());

    let mut builder = GraphBuilder::new();
    builder
        .add_node(CHATBOT_NODE, chatbot.into_node())
        .add_gate(HUMAN_REVIEW_NODE, gate.into_node())
        .add_node(TOOLS_NODE, ToolNode::new(tools).into_node())
        .add_conditional_edge(CHATBOT_NODE, review_condition)
        .add_conditional_edge(HUMAN_REVIEW_NODE, after_review)
        .add_edge(TOOLS_NODE, CHATBOT_NODE)
        .set_entry(CHATBOT_NODE);
    builder
}

/// Tool agent that tracks a behaviour mode and a user profile in state and
/// shapes its system prompt from them.
pub fn persona_agent(model: Arc<dyn ChatModel>, tools: Arc<ToolRegistry>) -> GraphBuilder {
    let chatbot = ChatNode::new(model)
        .with_tools(tools.definitions())
        .with_system_prompt(|state| Some(system_prompt(state)));

    let mut builder = GraphBuilder::new().with_schema(persona_schema());
    builder
        .add_node(MODE_CONTROLLER_NODE, mode_controller_node())
        .add_node(PROFILE_UPDATER_NODE, profile_updater_node())
        .add_node(CHATBOT_NODE, chatbot.into_node())
        .add_node(TOOLS_NODE, ToolNode::new(tools).into_node())
        .add_edge(MODE_CONTROLLER_NODE, PROFILE_UPDATER_NODE)
        .add_edge(PROFILE_UPDATER_NODE, CHATBOT_NODE)
        .add_conditional_edge(CHATBOT_NODE, tools_condition)
        .add_edge(TOOLS_NODE, CHATBOT_NODE)
        .set_entry(MODE_CONTROLLER_NODE);
    builder
}
