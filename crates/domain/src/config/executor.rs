use serde::{Deserialize, Serialize};

/// Single process-wide executor tuning knobs, applied to every turn
/// regardless of which chat it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "d_max_tool_rounds")]
    pub max_tool_rounds: u32,
    #[serde(default = "d_retention_window_secs")]
    pub retention_window_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: d_max_tool_rounds(),
            retention_window_secs: d_retention_window_secs(),
        }
    }
}

fn d_max_tool_rounds() -> u32 {
    5
}

fn d_retention_window_secs() -> u64 {
    600
}
