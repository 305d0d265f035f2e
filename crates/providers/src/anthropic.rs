//! Anthropic-native adapter.
//!
//! Implements the Anthropic Messages API streaming protocol and translates
//! it into the three-variant [`ProviderEvent`] model: `Delta` for incremental
//! block updates, `Block` for a finished content unit, `Metadata` for
//! end-of-turn stop reason and usage.

use std::collections::HashMap;

use serde_json::Value;
use ts_domain::config::ProviderConfig;
use ts_domain::error::{Error, Result};
use ts_domain::event::{BlockDelta, DeltaType, ProviderEvent, ProviderMetadata, StopReason};
use ts_domain::model::{BlockType, GenerateRequest, Message, Role, ToolDefinition, TurnBlockInput};

use crate::traits::{BoxStream, ProviderAdapter};
use crate::util::{from_reqwest, resolve_api_key};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A provider adapter for the Anthropic Messages API.
pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new adapter from the deserialized provider config.
    pub fn from_config(id: &str, cfg: &ProviderConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?;
        let default_model = cfg
            .default_model
            .clone()
            .unwrap_or_else(|| "claude-sonnet-4-20250514".into());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: id.to_string(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_messages_body(&self, req: &GenerateRequest) -> Value {
        let mut body = self.convert_to_provider_messages(
            &req.messages,
            req.system.as_deref(),
            req.tools.as_deref(),
        );
        let model = if req.model.is_empty() {
            self.default_model.clone()
        } else {
            req.model.clone()
        };
        body["model"] = Value::String(model);
        body["stream"] = Value::Bool(true);
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body["max_tokens"] = serde_json::json!(req.max_tokens.unwrap_or(4096));
        if let Some(budget) = req.thinking_budget {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": budget,
            });
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn block_to_content_part(text_content: &Option<String>, content: &Option<Value>, bt: BlockType) -> Option<Value> {
    match bt {
        BlockType::Text => Some(serde_json::json!({
            "type": "text",
            "text": text_content.clone().unwrap_or_default(),
        })),
        BlockType::Thinking => {
            let signature = content
                .as_ref()
                .and_then(|c| c.get("signature"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Some(serde_json::json!({
                "type": "thinking",
                "thinking": text_content.clone().unwrap_or_default(),
                "signature": signature,
            }))
        }
        BlockType::ToolUse => {
            let c = content.clone().unwrap_or_default();
            Some(serde_json::json!({
                "type": "tool_use",
                "id": c.get("tool_use_id").cloned().unwrap_or(Value::Null),
                "name": c.get("tool_name").cloned().unwrap_or(Value::Null),
                "input": c.get("input").cloned().unwrap_or(Value::Object(Default::default())),
            }))
        }
        BlockType::ToolResult => {
            let c = content.clone().unwrap_or_default();
            Some(serde_json::json!({
                "type": "tool_result",
                "tool_use_id": c.get("tool_use_id").cloned().unwrap_or(Value::Null),
                "content": c.get("content").cloned().unwrap_or(Value::Null),
                "is_error": c.get("is_error").cloned().unwrap_or(Value::Bool(false)),
            }))
        }
        BlockType::Image => {
            let c = content.clone().unwrap_or_default();
            let media_type = c
                .get("media_type")
                .and_then(|v| v.as_str())
                .unwrap_or("image/png");
            Some(serde_json::json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": media_type,
                    "data": c.get("data").cloned().unwrap_or(Value::Null),
                }
            }))
        }
        // References and web search blocks are informational only; they are
        // not replayed back to Anthropic as input content.
        BlockType::Reference
        | BlockType::PartialReference
        | BlockType::WebSearchUse
        | BlockType::WebSearchResult => None,
    }
}

fn message_to_anthropic(msg: &Message) -> Value {
    let role = match msg.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let content: Vec<Value> = msg
        .blocks
        .iter()
        .filter_map(|b| block_to_content_part(&b.text_content, &b.content, b.block_type))
        .collect();
    serde_json::json!({
        "role": role,
        "content": content,
    })
}

fn tool_to_anthropic(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming SSE state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
enum AccumKind {
    Text,
    Thinking,
    ToolUse { tool_use_id: String, tool_name: String },
}

struct BlockAccum {
    kind: AccumKind,
    text: String,
    signature: String,
    json_buffer: String,
    started: bool,
}

/// Internal state for assembling blocks and usage from a streaming response.
struct StreamState {
    blocks: HashMap<i64, BlockAccum>,
    input_tokens: Option<i64>,
    output_tokens: Option<i64>,
    metadata_emitted: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            input_tokens: None,
            output_tokens: None,
            metadata_emitted: false,
        }
    }
}

fn map_stop_reason(raw: &str) -> StopReason {
    match raw {
        "end_turn" => StopReason::EndTurn,
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::Error,
    }
}

/// Parse a single Anthropic SSE data payload and produce zero or more
/// provider events.
fn parse_anthropic_sse(data: &str, state: &mut StreamState) -> Vec<Result<ProviderEvent>> {
    let mut events = Vec::new();

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    let event_type = v.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match event_type {
        "message_start" => {
            if let Some(usage) = v.get("message").and_then(|m| m.get("usage")) {
                state.input_tokens = usage.get("input_tokens").and_then(|x| x.as_i64());
            }
        }

        "content_block_start" => {
            let idx = v.get("index").and_then(|v| v.as_i64()).unwrap_or(0);
            if let Some(block) = v.get("content_block") {
                let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
                let kind = match block_type {
                    "text" => Some(AccumKind::Text),
                    "thinking" => Some(AccumKind::Thinking),
                    "tool_use" => {
                        let tool_use_id = block
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        let tool_name = block
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        Some(AccumKind::ToolUse {
                            tool_use_id,
                            tool_name,
                        })
                    }
                    _ => None,
                };
                if let Some(kind) = kind {
                    // A tool_use block with empty input never gets an
                    // input_json_delta, which is otherwise the only place
                    // tool_call_start is emitted. Emit it here instead so
                    // block_start always precedes block_stop.
                    let started = if let AccumKind::ToolUse { tool_use_id, tool_name } = &kind {
                        events.push(Ok(ProviderEvent::Delta(BlockDelta::tool_call_start(
                            idx,
                            tool_use_id.clone(),
                            tool_name.clone(),
                        ))));
                        true
                    } else {
                        false
                    };
                    state.blocks.insert(
                        idx,
                        BlockAccum {
                            kind,
                            text: String::new(),
                            signature: String::new(),
                            json_buffer: String::new(),
                            started,
                        },
                    );
                }
            }
        }

        "content_block_delta" => {
            let idx = v.get("index").and_then(|v| v.as_i64()).unwrap_or(0);
            let Some(delta) = v.get("delta") else {
                return events;
            };
            let delta_type = delta.get("type").and_then(|v| v.as_str()).unwrap_or("");
            let Some(accum) = state.blocks.get_mut(&idx) else {
                return events;
            };

            match delta_type {
                "text_delta" => {
                    if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                        accum.text.push_str(text);
                        let block_type = if !accum.started {
                            accum.started = true;
                            Some(BlockType::Text)
                        } else {
                            None
                        };
                        events.push(Ok(ProviderEvent::Delta(BlockDelta::text_delta(
                            idx,
                            block_type,
                            text,
                        ))));
                    }
                }
                "thinking_delta" => {
                    if let Some(text) = delta.get("thinking").and_then(|v| v.as_str()) {
                        accum.text.push_str(text);
                        let mut d = BlockDelta::text_delta(idx, None, text);
                        d.delta_type = DeltaType::ThinkingDelta;
                        if !accum.started {
                            accum.started = true;
                            d.block_type = Some(BlockType::Thinking);
                        }
                        events.push(Ok(ProviderEvent::Delta(d)));
                    }
                }
                "signature_delta" => {
                    if let Some(sig) = delta.get("signature").and_then(|v| v.as_str()) {
                        accum.signature.push_str(sig);
                        events.push(Ok(ProviderEvent::Delta(BlockDelta {
                            block_index: idx,
                            block_type: None,
                            delta_type: DeltaType::SignatureDelta,
                            text_delta: None,
                            signature_delta: Some(sig.to_string()),
                            tool_use_id: None,
                            tool_name: None,
                            json_delta: None,
                            input_tokens: None,
                            output_tokens: None,
                        })));
                    }
                }
                "input_json_delta" => {
                    if let Some(partial) = delta.get("partial_json").and_then(|v| v.as_str()) {
                        accum.json_buffer.push_str(partial);
                        if let AccumKind::ToolUse {
                            tool_use_id,
                            tool_name,
                        } = &accum.kind
                        {
                            if !accum.started {
                                accum.started = true;
                                events.push(Ok(ProviderEvent::Delta(BlockDelta::tool_call_start(
                                    idx,
                                    tool_use_id.clone(),
                                    tool_name.clone(),
                                ))));
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        "content_block_stop" => {
            let idx = v.get("index").and_then(|v| v.as_i64()).unwrap_or(0);
            let Some(accum) = state.blocks.remove(&idx) else {
                return events;
            };

            match accum.kind {
                AccumKind::Text => {
                    events.push(Ok(ProviderEvent::Block(TurnBlockInput {
                        block_type: BlockType::Text,
                        text_content: Some(accum.text),
                        content: None,
                    })));
                }
                AccumKind::Thinking => {
                    events.push(Ok(ProviderEvent::Block(TurnBlockInput {
                        block_type: BlockType::Thinking,
                        text_content: Some(accum.text),
                        content: Some(serde_json::json!({ "signature": accum.signature })),
                    })));
                }
                AccumKind::ToolUse {
                    tool_use_id,
                    tool_name,
                } => {
                    let input: Value = if accum.json_buffer.trim().is_empty() {
                        Value::Object(Default::default())
                    } else {
                        match serde_json::from_str(&accum.json_buffer) {
                            Ok(v) => v,
                            Err(e) => {
                                events.push(Err(Error::ToolError {
                                    tool_name: tool_name.clone(),
                                    message: format!("malformed tool input JSON: {e}"),
                                }));
                                return events;
                            }
                        }
                    };
                    events.push(Ok(ProviderEvent::Delta(BlockDelta::json_delta(
                        idx,
                        input.clone(),
                    ))));
                    events.push(Ok(ProviderEvent::Block(TurnBlockInput {
                        block_type: BlockType::ToolUse,
                        text_content: None,
                        content: Some(serde_json::json!({
                            "tool_use_id": tool_use_id,
                            "tool_name": tool_name,
                            "input": input,
                        })),
                    })));
                }
            }
        }

        "message_delta" => {
            if let Some(output) = v
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(|x| x.as_i64())
            {
                state.output_tokens = Some(output);
            }
            if let Some(stop_reason) = v
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(|v| v.as_str())
            {
                state.metadata_emitted = true;
                events.push(Ok(ProviderEvent::Metadata(ProviderMetadata {
                    stop_reason: map_stop_reason(stop_reason),
                    input_tokens: state.input_tokens,
                    output_tokens: state.output_tokens,
                })));
            }
        }

        "message_stop" => {
            if !state.metadata_emitted {
                state.metadata_emitted = true;
                events.push(Ok(ProviderEvent::Metadata(ProviderMetadata {
                    stop_reason: StopReason::EndTurn,
                    input_tokens: state.input_tokens,
                    output_tokens: state.output_tokens,
                })));
            }
        }

        "error" => {
            let msg = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            events.push(Err(Error::Provider {
                provider: "anthropic".into(),
                message: msg.to_string(),
            }));
        }

        _ => {
            // ping, content_block events of unknown type -- ignore.
        }
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn stream(
        &self,
        request: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_messages_body(request);

        tracing::debug!(provider = %self.id, %url, "anthropic stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        let mut state = StreamState::new();
        Ok(crate::sse::sse_response_stream(resp, move |data| {
            parse_anthropic_sse(data, &mut state)
        }))
    }

    fn convert_to_provider_messages(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        tools: Option<&[ToolDefinition]>,
    ) -> Value {
        let api_messages: Vec<Value> = messages.iter().map(message_to_anthropic).collect();
        let mut body = serde_json::json!({ "messages": api_messages });
        if let Some(system) = system_prompt {
            body["system"] = Value::String(system.to_string());
        }
        if let Some(tools) = tools {
            if !tools.is_empty() {
                let tools: Vec<Value> = tools.iter().map(tool_to_anthropic).collect();
                body["tools"] = Value::Array(tools);
            }
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_domain::model::{Role, TurnBlock};
    use uuid::Uuid;

    fn text_block(text: &str) -> TurnBlock {
        TurnBlock {
            id: Uuid::new_v4(),
            turn_id: Uuid::new_v4(),
            sequence: 0,
            block_type: BlockType::Text,
            text_content: Some(text.to_string()),
            content: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn message_to_anthropic_carries_text() {
        let msg = Message {
            role: Role::User,
            blocks: vec![text_block("hello")],
        };
        let v = message_to_anthropic(&msg);
        assert_eq!(v["role"], "user");
        assert_eq!(v["content"][0]["type"], "text");
        assert_eq!(v["content"][0]["text"], "hello");
    }

    #[test]
    fn sse_text_delta_emits_start_then_block() {
        let mut state = StreamState::new();
        let start = r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#;
        let delta = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#;
        let stop = r#"{"type":"content_block_stop","index":0}"#;

        parse_anthropic_sse(start, &mut state);
        let delta_events = parse_anthropic_sse(delta, &mut state);
        assert!(matches!(
            delta_events[0],
            Ok(ProviderEvent::Delta(ref d)) if d.text_delta.as_deref() == Some("Hi")
        ));

        let stop_events = parse_anthropic_sse(stop, &mut state);
        match &stop_events[0] {
            Ok(ProviderEvent::Block(b)) => {
                assert_eq!(b.block_type, BlockType::Text);
                assert_eq!(b.text_content.as_deref(), Some("Hi"));
            }
            _ => panic!("expected Block event"),
        }
    }

    #[test]
    fn sse_tool_use_buffers_json_until_stop() {
        let mut state = StreamState::new();
        let start = r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"search"}}"#;
        let delta1 = r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"q\":"}}"#;
        let delta2 = r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"rust\"}"}}"#;
        let stop = r#"{"type":"content_block_stop","index":1}"#;

        parse_anthropic_sse(start, &mut state);
        parse_anthropic_sse(delta1, &mut state);
        parse_anthropic_sse(delta2, &mut state);
        let events = parse_anthropic_sse(stop, &mut state);

        assert!(matches!(&events[0], Ok(ProviderEvent::Delta(d)) if d.json_delta.is_some()));
        match &events[1] {
            Ok(ProviderEvent::Block(b)) => {
                assert_eq!(b.block_type, BlockType::ToolUse);
                assert_eq!(b.content.as_ref().unwrap()["input"]["q"], "rust");
            }
            _ => panic!("expected Block event"),
        }
    }

    #[test]
    fn sse_empty_input_tool_use_emits_start_before_stop() {
        let mut state = StreamState::new();
        let start = r#"{"type":"content_block_start","index":2,"content_block":{"type":"tool_use","id":"toolu_3","name":"list_files"}}"#;
        let stop = r#"{"type":"content_block_stop","index":2}"#;

        let start_events = parse_anthropic_sse(start, &mut state);
        assert!(matches!(
            &start_events[0],
            Ok(ProviderEvent::Delta(d)) if d.block_type == Some(BlockType::ToolUse)
        ));

        let stop_events = parse_anthropic_sse(stop, &mut state);
        match &stop_events[1] {
            Ok(ProviderEvent::Block(b)) => {
                assert_eq!(b.block_type, BlockType::ToolUse);
                assert_eq!(b.content.as_ref().unwrap()["input"], serde_json::json!({}));
            }
            _ => panic!("expected Block event"),
        }
    }

    #[test]
    fn sse_malformed_tool_json_yields_tool_error() {
        let mut state = StreamState::new();
        let start = r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_2","name":"search"}}"#;
        let delta = r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{not json"}}"#;
        let stop = r#"{"type":"content_block_stop","index":0}"#;

        parse_anthropic_sse(start, &mut state);
        parse_anthropic_sse(delta, &mut state);
        let events = parse_anthropic_sse(stop, &mut state);
        assert!(matches!(&events[0], Err(Error::ToolError { .. })));
    }

    #[test]
    fn message_delta_maps_stop_reason() {
        let mut state = StreamState::new();
        let msg = r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":12}}"#;
        let events = parse_anthropic_sse(msg, &mut state);
        match &events[0] {
            Ok(ProviderEvent::Metadata(m)) => {
                assert_eq!(m.stop_reason, StopReason::ToolUse);
                assert_eq!(m.output_tokens, Some(12));
            }
            _ => panic!("expected Metadata event"),
        }
    }
}
