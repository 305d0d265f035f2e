//! Tool dispatch: the collaborator contract an embedder implements to wire
//! real tool execution into the turn loop, plus a minimal in-memory registry
//! used by tests and by `ts-gateway` when no richer registry is configured.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use ts_domain::error::Result;
use ts_domain::model::{ToolDefinition, ToolResultOutput, ToolUseInput};

/// A single callable tool.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn call(&self, input: serde_json::Value) -> Result<String>;
}

/// What the Turn Executor asks the embedder to satisfy: given every
/// `tool_use` block from one round, run them and return matching results.
/// Implementations dispatch tools in parallel — latency is `max` over the
/// tool calls, not their sum.
#[async_trait::async_trait]
pub trait ToolRegistry: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;
    async fn execute_parallel(&self, tool_uses: &[ToolUseInput]) -> Vec<ToolResultOutput>;
}

/// Reference `ToolRegistry` backed by a fixed set of in-process `Tool`s.
pub struct InMemoryToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl InMemoryToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let tools = tools
            .into_iter()
            .map(|t| (t.definition().name.clone(), t))
            .collect();
        Self { tools }
    }
}

#[async_trait::async_trait]
impl ToolRegistry for InMemoryToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    async fn execute_parallel(&self, tool_uses: &[ToolUseInput]) -> Vec<ToolResultOutput> {
        let futures = tool_uses.iter().map(|use_| async move {
            match self.tools.get(&use_.tool_name) {
                Some(tool) => match tool.call(use_.input.clone()).await {
                    Ok(content) => ToolResultOutput {
                        tool_use_id: use_.tool_use_id.clone(),
                        content,
                        is_error: false,
                    },
                    Err(e) => ToolResultOutput {
                        tool_use_id: use_.tool_use_id.clone(),
                        content: e.to_string(),
                        is_error: true,
                    },
                },
                None => ToolResultOutput {
                    tool_use_id: use_.tool_use_id.clone(),
                    content: format!("unknown tool: {}", use_.tool_name),
                    is_error: true,
                },
            }
        });
        join_all(futures).await
    }
}

/// Trivial tool that echoes its `text` input back. Useful for wiring tests
/// and as a smoke-test tool for a fresh deployment.
pub struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            description: "Echoes the `text` input field back as the result.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            }),
        }
    }

    async fn call(&self, input: serde_json::Value) -> Result<String> {
        Ok(input
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}
