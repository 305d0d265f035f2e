//! Ephemeral event types: what a Provider Adapter emits, and what the
//! Stream Hub stores/broadcasts as SSE. Neither is persisted.

use serde::{Deserialize, Serialize};

use crate::model::{BlockType, TurnBlockInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaType {
    TextDelta,
    ThinkingDelta,
    SignatureDelta,
    ToolCallStart,
    JsonDelta,
    UsageDelta,
}

/// An incremental update to the block at `block_index`, produced by a
/// Provider Adapter and forwarded to the Hub without ever touching the
/// Turn Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDelta {
    pub block_index: i64,
    /// Present only on the first delta of a block; acts as a start marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_type: Option<BlockType>,
    pub delta_type: DeltaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_delta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_delta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_delta: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<i64>,
}

impl BlockDelta {
    pub fn text_delta(block_index: i64, block_type: Option<BlockType>, text: impl Into<String>) -> Self {
        Self {
            block_index,
            block_type,
            delta_type: DeltaType::TextDelta,
            text_delta: Some(text.into()),
            signature_delta: None,
            tool_use_id: None,
            tool_name: None,
            json_delta: None,
            input_tokens: None,
            output_tokens: None,
        }
    }

    pub fn tool_call_start(block_index: i64, tool_use_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            block_index,
            block_type: Some(BlockType::ToolUse),
            delta_type: DeltaType::ToolCallStart,
            text_delta: None,
            signature_delta: None,
            tool_use_id: Some(tool_use_id.into()),
            tool_name: Some(tool_name.into()),
            json_delta: None,
            input_tokens: None,
            output_tokens: None,
        }
    }

    pub fn json_delta(block_index: i64, json: serde_json::Value) -> Self {
        Self {
            block_index,
            block_type: None,
            delta_type: DeltaType::JsonDelta,
            text_delta: None,
            signature_delta: None,
            tool_use_id: None,
            tool_name: None,
            json_delta: Some(json),
            input_tokens: None,
            output_tokens: None,
        }
    }

    /// Render this delta into the `data:` payload shape from §6.3, given the
    /// turn it belongs to. Only fields relevant to `delta_type` are included.
    pub fn to_payload(&self, turn_id: uuid::Uuid) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("turn_id".into(), serde_json::json!(turn_id));
        obj.insert("block_index".into(), serde_json::json!(self.block_index));
        obj.insert(
            "delta_type".into(),
            serde_json::to_value(self.delta_type).unwrap(),
        );
        match self.delta_type {
            DeltaType::TextDelta | DeltaType::ThinkingDelta => {
                obj.insert(
                    "text_delta".into(),
                    serde_json::json!(self.text_delta.clone().unwrap_or_default()),
                );
            }
            DeltaType::SignatureDelta => {
                obj.insert(
                    "signature_delta".into(),
                    serde_json::json!(self.signature_delta.clone().unwrap_or_default()),
                );
            }
            DeltaType::ToolCallStart => {
                obj.insert(
                    "tool_use_id".into(),
                    serde_json::json!(self.tool_use_id.clone().unwrap_or_default()),
                );
                obj.insert(
                    "tool_name".into(),
                    serde_json::json!(self.tool_name.clone().unwrap_or_default()),
                );
            }
            DeltaType::JsonDelta => {
                obj.insert(
                    "json_delta".into(),
                    self.json_delta.clone().unwrap_or(serde_json::Value::Null),
                );
            }
            DeltaType::UsageDelta => {
                obj.insert("input_tokens".into(), serde_json::json!(self.input_tokens));
                obj.insert(
                    "output_tokens".into(),
                    serde_json::json!(self.output_tokens),
                );
            }
        }
        serde_json::Value::Object(obj)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Error,
    MaxToolRounds,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub stop_reason: StopReason,
    #[serde(default)]
    pub input_tokens: Option<i64>,
    #[serde(default)]
    pub output_tokens: Option<i64>,
}

/// The three-variant normalized event stream every Provider Adapter emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderEvent {
    #[serde(rename = "delta")]
    Delta(BlockDelta),
    #[serde(rename = "block")]
    Block(TurnBlockInput),
    #[serde(rename = "metadata")]
    Metadata(ProviderMetadata),
}

/// What the Stream Hub stores in its ring buffer and emits over SSE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseEvent {
    pub id: u64,
    pub event: String,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
}
