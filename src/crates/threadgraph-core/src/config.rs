//! Engine settings

use serde::{Deserialize, Serialize};

/// Default number of node executions allowed per invocation.
pub const DEFAULT_MAX_STEPS: usize = 25;

/// Default capacity of the channel behind [`Engine::stream`](crate::Engine::stream).
pub const DEFAULT_STREAM_BUFFER: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Node executions allowed in one `invoke`/`resume` before failing with
    /// `StepLimitExceeded`
    pub max_steps: usize,

    /// Buffered events per streaming invocation
    pub stream_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

impl EngineConfig {
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"max_steps": 5}"#).unwrap();
        assert_eq!(config.max_steps, 5);
        assert_eq!(config.stream_buffer, DEFAULT_STREAM_BUFFER);
    }
}
