//! Custom-state conversation nodes
//!
//! Besides `messages`, the persona agent keeps three fields:
//!
//! - `mode` (replace): one of [`Mode`], picks the system prompt
//! - `user_profile` (merge): `{"name": ..., "interests": [...]}`
//! - `message_count` (sum): human turns seen so far
//!
//! The nodes here are rule based and never call a model.

use crate::error::NodeError;
use crate::messages::{messages, MessageRole};
use crate::node::{node_fn, NodeFn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use threadgraph_checkpoint::{MergePolicy, State, StateSchema};

pub const MODE_FIELD: &str = "mode";
pub const PROFILE_FIELD: &str = "user_profile";
pub const MESSAGE_COUNT_FIELD: &str = "message_count";

pub const MODE_CONTROLLER_NODE: &str = "mode_controller";
pub const PROFILE_UPDATER_NODE: &str = "profile_updater";

/// Behaviour mode of the persona agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Casual,
    Professional,
    Technical,
    Creative,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Casual, Mode::Professional, Mode::Technical, Mode::Creative];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Casual => "casual",
            Mode::Professional => "professional",
            Mode::Technical => "technical",
            Mode::Creative => "creative",
        }
    }

    /// Mode stored in state, casual when absent or unknown.
    pub fn from_state(state: &State) -> Self {
        state
            .get(MODE_FIELD)
            .and_then(|value| Mode::deserialize(value).ok())
            .unwrap_or_default()
    }

    fn traits(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            Mode::Casual => (
                "friendly and relaxed",
                "conversational with emojis",
                "approachable and informal",
            ),
            Mode::Professional => (
                "formal and respectful",
                "business-appropriate language",
                "structured and efficient",
            ),
            Mode::Technical => (
                "precise and detailed",
                "technical terminology when appropriate",
                "thorough explanations with examples",
            ),
            Mode::Creative => (
                "imaginative and inspiring",
                "expressive and colorful language",
                "thinking outside the box",
            ),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Mode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == wanted)
            .ok_or_else(|| format!("unknown mode '{}'", s))
    }
}

/// Schema for the persona agent's state.
pub fn persona_schema() -> StateSchema {
    StateSchema::conversation()
        .with_policy(MODE_FIELD, MergePolicy::Replace)
        .with_policy(PROFILE_FIELD, MergePolicy::Merge)
        .with_policy(MESSAGE_COUNT_FIELD, MergePolicy::Sum)
}

/// System prompt reflecting the mode and what is known about the user.
pub fn system_prompt(state: &State) -> String {
    let mode = Mode::from_state(state);
    let (tone, style, approach) = mode.traits();

    let mut prompt = format!(
        "You are an AI assistant operating in {mode} mode.\n\n\
         Personality traits:\n\
         - Tone: {tone}\n\
         - Style: {style}\n\
         - Approach: {approach}\n\n"
    );

    let profile = state.get(PROFILE_FIELD);
    if let Some(name) = profile.and_then(|p| p.get("name")).and_then(Value::as_str) {
        prompt.push_str(&format!("The user's name is {}. ", name));
    }
    let interests: Vec<&str> = profile
        .and_then(|p| p.get("interests"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if !interests.is_empty() {
        prompt.push_str(&format!("The user is interested in: {}. ", interests.join(", ")));
    }

    prompt.push_str(&format!(
        "\nAlways maintain the {} personality while being helpful and accurate.",
        mode
    ));
    prompt
}

fn last_human_text(state: &State) -> Result<Option<String>, NodeError> {
    Ok(messages(state)?
        .into_iter()
        .rev()
        .find(|m| m.role == MessageRole::Human)
        .map(|m| m.content.to_lowercase()))
}

/// Switch mode on requests such as "switch to technical mode".
pub fn mode_controller(state: &State) -> Result<State, NodeError> {
    let Some(text) = last_human_text(state)? else {
        return Ok(State::new());
    };
    if !(text.contains("switch to") || text.contains("change mode")) {
        return Ok(State::new());
    }

    // casual is checked last so "switch from casual to technical" picks technical
    let requested = [Mode::Professional, Mode::Technical, Mode::Creative, Mode::Casual]
        .into_iter()
        .find(|mode| text.contains(mode.as_str()));

    Ok(match requested {
        Some(mode) => {
            tracing::info!(%mode, "Switching mode");
            State::new().with(MODE_FIELD, json!(mode.as_str()))
        }
        None => State::new(),
    })
}

fn name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"my name is\s+([[:alpha:]][[:alpha:]'-]*)").ok())
        .as_ref()
}

const INTEREST_KEYWORDS: &[(&str, &str)] = &[
    ("python", "Python programming"),
    ("rust", "Rust programming"),
    ("music", "Music"),
    ("travel", "Travel"),
];

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Record the user's name and interests from the newest human message and
/// count the turn.
pub fn profile_updater(state: &State) -> Result<State, NodeError> {
    let Some(text) = last_human_text(state)? else {
        return Ok(State::new());
    };

    let mut profile = serde_json::Map::new();

    if let Some(captures) = name_pattern().and_then(|re| re.captures(&text)) {
        let name = title_case(&captures[1]);
        tracing::info!(%name, "Updated user profile name");
        profile.insert("name".to_string(), json!(name));
    }

    if text.contains("i like") || text.contains("i love") {
        let mut interests: Vec<Value> = state
            .get(PROFILE_FIELD)
            .and_then(|p| p.get("interests"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let before = interests.len();
        let words: Vec<&str> = text.split(|c: char| !c.is_alphanumeric()).collect();
        for (keyword, interest) in INTEREST_KEYWORDS {
            if words.contains(keyword) && !interests.iter().any(|i| i == interest) {
                interests.push(json!(interest));
            }
        }
        if interests.len() > before {
            tracing::info!(count = interests.len(), "Updated user interests");
            profile.insert("interests".to_string(), Value::Array(interests));
        }
    }

    let mut delta = State::new().with(MESSAGE_COUNT_FIELD, json!(1));
    if !profile.is_empty() {
        delta.insert(PROFILE_FIELD, Value::Object(profile));
    }
    Ok(delta)
}

pub fn mode_controller_node() -> NodeFn {
    node_fn(|state| {
        let result = mode_controller(&state);
        async move { result }
    })
}

pub fn profile_updater_node() -> NodeFn {
    node_fn(|state| {
        let result = profile_updater(&state);
        async move { result }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{messages_update, Message};

    fn said(text: &str) -> State {
        messages_update(vec![Message::human(text)]).unwrap()
    }

    #[test]
    fn test_mode_switch() {
        let delta = mode_controller(&said("Please switch to technical mode")).unwrap();
        assert_eq!(delta.get(MODE_FIELD), Some(&json!("technical")));

        let delta = mode_controller(&said("Change mode to creative!")).unwrap();
        assert_eq!(delta.get(MODE_FIELD), Some(&json!("creative")));

        assert!(mode_controller(&said("I am a technical person")).unwrap().is_empty());
        assert!(mode_controller(&said("switch to something else")).unwrap().is_empty());
    }

    #[test]
    fn test_mode_defaults_to_casual() {
        assert_eq!(Mode::from_state(&State::new()), Mode::Casual);
        assert_eq!(
            Mode::from_state(&State::new().with(MODE_FIELD, json!("pirate"))),
            Mode::Casual
        );
        assert_eq!("Professional".parse::<Mode>().unwrap(), Mode::Professional);
    }

    #[test]
    fn test_profile_extraction() {
        let delta = profile_updater(&said("Hi, my name is ada. I love Python!")).unwrap();
        assert_eq!(
            delta.get(PROFILE_FIELD),
            Some(&json!({"name": "Ada", "interests": ["Python programming"]}))
        );
        assert_eq!(delta.get(MESSAGE_COUNT_FIELD), Some(&json!(1)));
    }

    #[test]
    fn test_profile_merge_keeps_existing_fields() {
        let schema = persona_schema();
        let state = said("my name is Grace");
        let state = schema.merged(&state, &profile_updater(&state).unwrap()).unwrap();

        let next = schema
            .merged(&state, &messages_update(vec![Message::human("I like rust and python")]).unwrap())
            .unwrap();
        let next = schema.merged(&next, &profile_updater(&next).unwrap()).unwrap();

        assert_eq!(
            next.get(PROFILE_FIELD),
            Some(&json!({"name": "Grace", "interests": ["Python programming", "Rust programming"]}))
        );
        assert_eq!(next.get(MESSAGE_COUNT_FIELD), Some(&json!(2)));
    }

    #[test]
    fn test_system_prompt_mentions_profile() {
        let state = State::new()
            .with(MODE_FIELD, json!("professional"))
            .with(PROFILE_FIELD, json!({"name": "Ada", "interests": ["Music"]}));
        let prompt = system_prompt(&state);

        assert!(prompt.starts_with("You are an AI assistant operating in professional mode."));
        assert!(prompt.contains("- Tone: formal and respectful"));
        assert!(prompt.contains("The user's name is Ada. "));
        assert!(prompt.contains("The user is interested in: Music. "));
    }
}
