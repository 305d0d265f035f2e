//! Turn Executor: the bounded provider-call / tool-dispatch loop that turns
//! a pending assistant turn into a stream of persisted blocks and SSE
//! events.
//!
//! Adapted from the round-robin "call the model, run any tools it asked
//! for, call the model again" loop this codebase already uses to drive
//! agent turns, generalized to the provider-agnostic `ProviderAdapter` /
//! `TurnStore` / `ToolRegistry` seams and capped by a configurable round
//! limit instead of a hardcoded one.

use std::sync::Arc;

use futures_util::StreamExt;
use tracing::Instrument;
use uuid::Uuid;

use ts_domain::error::Result;
use ts_domain::event::{BlockDelta, ProviderEvent, StopReason};
use ts_domain::model::{
    BlockType, GenerateRequest, ToolDefinition, ToolUseInput, TurnBlockInput, TurnStatus,
};
use ts_providers::traits::ProviderAdapter;
use ts_store::TurnStore;

use crate::cancel::CancelMap;
use crate::message_builder::build_messages;
use crate::stream_hub::StreamHub;
use crate::tool::ToolRegistry;

/// Generation parameters fixed for the lifetime of one turn (a tool-use
/// round reuses all of these except the message list, which is rebuilt
/// from the Turn Store after each round).
#[derive(Debug, Clone)]
pub struct TurnParams {
    pub model: String,
    pub system: Option<String>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub thinking_budget: Option<u32>,
    pub context_window_tokens: Option<usize>,
}

pub struct TurnExecutor {
    pub store: Arc<TurnStore>,
    pub hub: Arc<StreamHub>,
    pub tools: Arc<dyn ToolRegistry>,
    pub cancel_map: Arc<CancelMap>,
    pub max_tool_rounds: u32,
}

impl TurnExecutor {
    /// Drive `assistant_turn_id` to a terminal status. Spawned by the
    /// Streaming Service right after it creates the turn row; never
    /// returns an `Err` that the caller could usefully act on, because by
    /// the time this is running the only observer is the Stream Hub — all
    /// failures are recorded on the turn itself.
    pub async fn run(self: Arc<Self>, adapter: Arc<dyn ProviderAdapter>, assistant_turn_id: Uuid, params: TurnParams) {
        let span = tracing::info_span!("run_turn", turn_id = %assistant_turn_id);
        if let Err(e) = self.run_inner(adapter, assistant_turn_id, &params).instrument(span).await {
            tracing::error!(turn_id = %assistant_turn_id, error = %e, "turn executor failed");
            let _ = self.store.update_turn_status(assistant_turn_id, TurnStatus::Error, Some(&e.to_string()));
            if let Some(stream) = self.hub.get(assistant_turn_id) {
                stream.publish("turn_error", turn_error_payload(assistant_turn_id, Some(&e.to_string())));
                stream.mark_terminal();
            }
        }
        self.cancel_map.remove(assistant_turn_id);
    }

    async fn run_inner(&self, adapter: Arc<dyn ProviderAdapter>, assistant_turn_id: Uuid, params: &TurnParams) -> Result<()> {
        let cancel_token = self.cancel_map.register(assistant_turn_id);
        let store = self.store.clone();
        let store_for_catchup = store.clone();
        let stream = self.hub.get_or_create(assistant_turn_id, move |last_event_id| {
            reconstruct_catchup_events(&store_for_catchup, assistant_turn_id, last_event_id)
        });

        stream.publish("turn_start", serde_json::json!({"turn_id": assistant_turn_id, "model": params.model}));

        let mut next_sequence = self.store.get_turn_blocks(assistant_turn_id)?.len() as i64;
        let mut rounds: u32 = 0;

        loop {
            if cancel_token.is_cancelled() {
                return self.finalize_cancelled(&stream, assistant_turn_id);
            }

            let request = self.build_request(assistant_turn_id, params)?;
            let mut provider_stream = adapter.stream(&request).await?;

            let mut stop_reason = StopReason::Error;
            let mut input_tokens = None;
            let mut output_tokens = None;
            let mut pending_tool_uses: Vec<ToolUseInput> = Vec::new();

            while let Some(event) = provider_stream.next().await {
                if cancel_token.is_cancelled() {
                    return self.finalize_cancelled(&stream, assistant_turn_id);
                }
                match event? {
                    ProviderEvent::Delta(delta) => {
                        self.handle_delta(&stream, assistant_turn_id, delta);
                    }
                    ProviderEvent::Block(input) => {
                        let sequence = next_sequence;
                        next_sequence += 1;
                        if input.block_type == BlockType::ToolUse {
                            if let Some(use_) = tool_use_from_block(&input) {
                                pending_tool_uses.push(use_);
                            }
                        }
                        self.persist_and_publish_block(&stream, assistant_turn_id, input, sequence)?;
                    }
                    ProviderEvent::Metadata(meta) => {
                        stop_reason = meta.stop_reason;
                        input_tokens = meta.input_tokens;
                        output_tokens = meta.output_tokens;
                    }
                }
            }

            self.store.update_turn_metadata(assistant_turn_id, Some(&params.model), input_tokens, output_tokens)?;

            // A tool_use stop with nothing to call back is not a real
            // tool round; treat it the same as the model ending its turn.
            let is_tool_round = stop_reason == StopReason::ToolUse && !pending_tool_uses.is_empty();
            if !is_tool_round {
                let stop_reason = if stop_reason == StopReason::ToolUse { StopReason::EndTurn } else { stop_reason };
                return self.finalize(&stream, assistant_turn_id, stop_reason, input_tokens, output_tokens);
            }

            rounds += 1;
            if rounds > self.max_tool_rounds {
                return self.finalize(&stream, assistant_turn_id, StopReason::MaxToolRounds, input_tokens, output_tokens);
            }

            let results = self.tools.execute_parallel(&pending_tool_uses).await;
            for result in results {
                let sequence = next_sequence;
                next_sequence += 1;
                let input = TurnBlockInput {
                    block_type: BlockType::ToolResult,
                    text_content: None,
                    content: Some(serde_json::json!({
                        "tool_use_id": result.tool_use_id,
                        "content": result.content,
                        "is_error": result.is_error,
                    })),
                };
                self.persist_and_publish_block(&stream, assistant_turn_id, input, sequence)?;
            }
        }
    }

    fn handle_delta(&self, stream: &crate::stream_hub::Stream, turn_id: Uuid, delta: BlockDelta) {
        if delta.block_type.is_some() {
            stream.publish(
                "block_start",
                serde_json::json!({"turn_id": turn_id, "block_index": delta.block_index, "block_type": delta.block_type}),
            );
        }
        stream.publish("block_delta", delta.to_payload(turn_id));
    }

    fn persist_and_publish_block(
        &self,
        stream: &crate::stream_hub::Stream,
        turn_id: Uuid,
        input: TurnBlockInput,
        sequence: i64,
    ) -> Result<()> {
        let block = input.into_block(Uuid::new_v4(), turn_id, sequence);
        let store = &self.store;
        stream.persist_and_clear(|| store.create_turn_block(&block))?;

        if let Some(content) = block.content.clone() {
            stream.publish("block_delta", BlockDelta::json_delta(sequence, content).to_payload(turn_id));
        }
        stream.publish("block_stop", serde_json::json!({"turn_id": turn_id, "block_index": sequence}));
        Ok(())
    }

    fn build_request(&self, assistant_turn_id: Uuid, params: &TurnParams) -> Result<GenerateRequest> {
        let path = self.store.get_turn_path(assistant_turn_id)?;
        let mut turns_with_blocks = Vec::with_capacity(path.len());
        for turn in path {
            let blocks = self.store.get_turn_blocks(turn.id)?;
            turns_with_blocks.push((turn, blocks));
        }
        let messages = build_messages(&turns_with_blocks, params.context_window_tokens);

        Ok(GenerateRequest {
            model: params.model.clone(),
            messages,
            system: params.system.clone(),
            tools: params.tools.clone(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            thinking_budget: params.thinking_budget,
        })
    }

    fn finalize(
        &self,
        stream: &crate::stream_hub::Stream,
        turn_id: Uuid,
        stop_reason: StopReason,
        input_tokens: Option<i64>,
        output_tokens: Option<i64>,
    ) -> Result<()> {
        if stop_reason == StopReason::Error {
            return self.finalize_error(stream, turn_id, "provider stream ended without a stop reason");
        }
        // Cancelled is still a `turn_complete` on the wire (there is no
        // `turn_cancelled` in the catalogue); only the persisted status
        // distinguishes it.
        let status = if stop_reason == StopReason::Cancelled { TurnStatus::Cancelled } else { TurnStatus::Complete };
        self.store.update_turn_status(turn_id, status, None)?;
        stream.publish("turn_complete", turn_complete_payload(turn_id, stop_reason, input_tokens, output_tokens));
        stream.mark_terminal();
        Ok(())
    }

    fn finalize_error(&self, stream: &crate::stream_hub::Stream, turn_id: Uuid, error: &str) -> Result<()> {
        self.store.update_turn_status(turn_id, TurnStatus::Error, Some(error))?;
        stream.publish("turn_error", turn_error_payload(turn_id, Some(error)));
        stream.mark_terminal();
        Ok(())
    }

    fn finalize_cancelled(&self, stream: &crate::stream_hub::Stream, turn_id: Uuid) -> Result<()> {
        self.finalize(stream, turn_id, StopReason::Cancelled, None, None)
    }
}

/// Build the `turn_complete` payload per §6.3: `{turn_id, stop_reason,
/// input_tokens?, output_tokens?}`. Shared by the live `finalize` path and
/// the DB-catchup replay so a reconnecting client sees the same shape a
/// live observer would have.
fn turn_complete_payload(
    turn_id: Uuid,
    stop_reason: StopReason,
    input_tokens: Option<i64>,
    output_tokens: Option<i64>,
) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert("turn_id".into(), serde_json::json!(turn_id));
    obj.insert("stop_reason".into(), serde_json::to_value(stop_reason).unwrap());
    if let Some(t) = input_tokens {
        obj.insert("input_tokens".into(), serde_json::json!(t));
    }
    if let Some(t) = output_tokens {
        obj.insert("output_tokens".into(), serde_json::json!(t));
    }
    serde_json::Value::Object(obj)
}

fn turn_error_payload(turn_id: Uuid, error: Option<&str>) -> serde_json::Value {
    serde_json::json!({"turn_id": turn_id, "error": error})
}

fn tool_use_from_block(input: &TurnBlockInput) -> Option<ToolUseInput> {
    let content = input.content.as_ref()?;
    Some(ToolUseInput {
        tool_use_id: content.get("tool_use_id")?.as_str()?.to_string(),
        tool_name: content.get("tool_name")?.as_str()?.to_string(),
        input: content.get("input").cloned().unwrap_or(serde_json::Value::Null),
    })
}

/// Replay the canonical event sequence (`block_start` / `block_delta` /
/// `block_stop` per persisted block, plus a terminal event) for a turn
/// whose live buffer no longer covers the requested id. Used both by the
/// Executor's own Hub entry and directly by the gateway for a turn whose
/// stream has already been evicted from the Hub entirely.
pub fn reconstruct_catchup_events(
    store: &TurnStore,
    turn_id: Uuid,
    last_event_id: u64,
) -> Result<Vec<ts_domain::event::SseEvent>> {
    use ts_domain::event::SseEvent;

    let Some((turn, blocks)) = store.get_turn_with_blocks(turn_id)? else {
        return Ok(Vec::new());
    };

    let mut events = Vec::new();
    let mut next_id = last_event_id + 1;
    let mut push = |event: &str, data: serde_json::Value| {
        events.push(SseEvent { id: next_id, event: event.to_string(), data, retry: None });
        next_id += 1;
    };

    push("turn_start", serde_json::json!({"turn_id": turn_id, "model": turn.model}));
    for block in &blocks {
        push("block_start", serde_json::json!({"turn_id": turn_id, "block_index": block.sequence, "block_type": block.block_type}));
        // The real content lives in `text_content` for text/thinking blocks
        // and in `content` for everything else, mirroring the split
        // `persist_and_publish_block` uses on the live path.
        let delta = match block.block_type {
            BlockType::Text | BlockType::Thinking => {
                BlockDelta::text_delta(block.sequence, None, block.text_content.clone().unwrap_or_default())
            }
            _ => BlockDelta::json_delta(block.sequence, block.content.clone().unwrap_or(serde_json::Value::Null)),
        };
        push("block_delta", delta.to_payload(turn_id));
        push("block_stop", serde_json::json!({"turn_id": turn_id, "block_index": block.sequence}));
    }
    if turn.status.is_terminal() {
        match turn.status {
            TurnStatus::Error => push("turn_error", turn_error_payload(turn_id, turn.error.as_deref())),
            TurnStatus::Cancelled => {
                push("turn_complete", turn_complete_payload(turn_id, StopReason::Cancelled, turn.input_tokens, turn.output_tokens))
            }
            _ => push("turn_complete", turn_complete_payload(turn_id, StopReason::EndTurn, turn.input_tokens, turn.output_tokens)),
        }
    }

    Ok(events)
}
