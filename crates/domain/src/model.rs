//! Turn/chat tree data model: the durable entities the Turn Store persists
//! and the provider-agnostic `Message` shape the Message Builder produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A conversation scoped to a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub title: Option<String>,
    pub last_viewed_turn_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Pending,
    Streaming,
    WaitingSubagents,
    Complete,
    Cancelled,
    Error,
}

impl TurnStatus {
    /// A turn in a terminal status will never be touched by an Executor again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TurnStatus::Complete | TurnStatus::Cancelled | TurnStatus::Error
        )
    }
}

/// A node in a chat's conversation tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub prev_turn_id: Option<Uuid>,
    pub role: Role,
    pub status: TurnStatus,
    pub error: Option<String>,
    pub model: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Turn {
    pub fn new_user(id: Uuid, chat_id: Uuid, prev_turn_id: Option<Uuid>) -> Self {
        Self {
            id,
            chat_id,
            prev_turn_id,
            role: Role::User,
            status: TurnStatus::Complete,
            error: None,
            model: None,
            input_tokens: None,
            output_tokens: None,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
        }
    }

    pub fn new_assistant(id: Uuid, chat_id: Uuid, prev_turn_id: Uuid, model: String) -> Self {
        Self {
            id,
            chat_id,
            prev_turn_id: Some(prev_turn_id),
            role: Role::Assistant,
            status: TurnStatus::Streaming,
            error: None,
            model: Some(model),
            input_tokens: None,
            output_tokens: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// The nine content-unit kinds a TurnBlock may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Text,
    Thinking,
    ToolUse,
    ToolResult,
    Image,
    Reference,
    PartialReference,
    WebSearchUse,
    WebSearchResult,
}

/// An ordered content unit belonging to a turn, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnBlock {
    pub id: Uuid,
    pub turn_id: Uuid,
    pub sequence: i64,
    pub block_type: BlockType,
    pub text_content: Option<String>,
    pub content: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A TurnBlock before it has an id/turn_id/sequence/created_at assigned.
/// Used both for client-supplied blocks in a create-turn request and for
/// the `Block` provider event (the adapter has no business knowing the
/// eventual sequence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnBlockInput {
    pub block_type: BlockType,
    #[serde(default)]
    pub text_content: Option<String>,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

impl TurnBlockInput {
    pub fn into_block(self, id: Uuid, turn_id: Uuid, sequence: i64) -> TurnBlock {
        TurnBlock {
            id,
            turn_id,
            sequence,
            block_type: self.block_type,
            text_content: self.text_content,
            content: self.content,
            created_at: Utc::now(),
        }
    }
}

/// One message in the provider-agnostic shape the Message Builder produces:
/// one per turn, blocks preserved verbatim in persisted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub blocks: Vec<TurnBlock>,
}

impl Message {
    /// Concatenate all `text`/`thinking` block text with newlines. Convenience
    /// for adapters and tests that just want "what did this turn say".
    pub fn extract_all_text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| b.text_content.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A tool the provider may be offered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One `tool_use` block's payload, as dispatched to the ToolRegistry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseInput {
    pub tool_use_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
}

/// A ToolRegistry result, paired back to the `tool_use_id` it answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultOutput {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

/// Generation parameters + provider-agnostic messages handed to a
/// Provider Adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub thinking_budget: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_status_terminal() {
        assert!(TurnStatus::Complete.is_terminal());
        assert!(TurnStatus::Cancelled.is_terminal());
        assert!(TurnStatus::Error.is_terminal());
        assert!(!TurnStatus::Streaming.is_terminal());
        assert!(!TurnStatus::Pending.is_terminal());
    }

    #[test]
    fn extract_all_text_joins_blocks() {
        let msg = Message {
            role: Role::Assistant,
            blocks: vec![
                TurnBlock {
                    id: Uuid::nil(),
                    turn_id: Uuid::nil(),
                    sequence: 0,
                    block_type: BlockType::Text,
                    text_content: Some("hello".into()),
                    content: None,
                    created_at: Utc::now(),
                },
                TurnBlock {
                    id: Uuid::nil(),
                    turn_id: Uuid::nil(),
                    sequence: 1,
                    block_type: BlockType::Text,
                    text_content: Some("world".into()),
                    content: None,
                    created_at: Utc::now(),
                },
            ],
        };
        assert_eq!(msg.extract_all_text(), "hello\nworld");
    }

    #[test]
    fn block_type_roundtrips_snake_case() {
        let json = serde_json::to_string(&BlockType::ToolUse).unwrap();
        assert_eq!(json, "\"tool_use\"");
        let back: BlockType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, BlockType::ToolUse);
    }
}
