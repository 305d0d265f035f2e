//! `POST /api/chats/{id}/turns` and `GET /api/chats/{id}/turns`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ts_domain::error::{Error, Result};
use ts_domain::model::{Role, Turn, TurnBlockInput, ToolDefinition};
use ts_engine::TurnParams;
use ts_providers::ProviderAdapter;
use ts_store::{create_turn_block_with, create_turn_with, Direction};

use super::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RequestParamsBody {
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub thinking: Option<u32>,
    #[serde(default)]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTurnRequest {
    #[serde(default)]
    pub prev_turn_id: Option<Uuid>,
    pub role: Role,
    pub turn_blocks: Vec<TurnBlockInput>,
    pub request_params: RequestParamsBody,
}

#[derive(Debug, Serialize)]
pub struct CreateTurnResponse {
    pub user_turn: Turn,
    pub assistant_turn: Turn,
    pub stream_url: String,
}

fn resolve_provider(state: &AppState, model: &str) -> Result<Arc<dyn ProviderAdapter>> {
    for (id, pc) in &state.config.llm.providers {
        if pc.default_model.as_deref() == Some(model) {
            if let Some(adapter) = state.providers.get(id) {
                return Ok(adapter);
            }
        }
    }
    state
        .providers
        .list_providers()
        .first()
        .and_then(|id| state.providers.get(id))
        .ok_or_else(|| Error::Unavailable("no LLM provider is registered".into()))
}

pub async fn create_turn(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Json(body): Json<CreateTurnRequest>,
) -> ApiResult<impl IntoResponse> {
    if body.role != Role::User {
        return Err(ApiError(Error::Validation("role must be \"user\"".into())));
    }
    if body.turn_blocks.is_empty() {
        return Err(ApiError(Error::Validation("turn_blocks must contain at least one block".into())));
    }
    if let Some(prev_id) = body.prev_turn_id {
        match state.store.get_turn(prev_id)? {
            Some(prev) if prev.chat_id != chat_id => {
                return Err(ApiError(Error::Validation("prev_turn_id belongs to a different chat".into())));
            }
            Some(_) => {}
            None => return Err(ApiError(Error::Validation("prev_turn_id not found".into()))),
        }
    }

    let adapter = resolve_provider(&state, &body.request_params.model)?;

    let user_turn = Turn::new_user(Uuid::new_v4(), chat_id, body.prev_turn_id);
    let assistant_turn = Turn::new_assistant(Uuid::new_v4(), chat_id, user_turn.id, body.request_params.model.clone());

    let _permit = state
        .turn_locks
        .try_acquire(assistant_turn.id)
        .map_err(|_| ApiError(Error::Conflict("a turn is already streaming for this turn id".into())))?;

    let turn_blocks = body.turn_blocks;
    let user_turn_for_tx = user_turn.clone();
    let assistant_turn_for_tx = assistant_turn.clone();
    state.store.transaction(move |conn| {
        create_turn_with(conn, &user_turn_for_tx)?;
        for (i, input) in turn_blocks.into_iter().enumerate() {
            let block = input.into_block(Uuid::new_v4(), user_turn_for_tx.id, i as i64);
            create_turn_block_with(conn, &block)?;
        }
        create_turn_with(conn, &assistant_turn_for_tx)?;
        Ok(())
    })?;

    let params = TurnParams {
        model: body.request_params.model,
        system: body.request_params.system_prompt,
        tools: body.request_params.tools,
        temperature: body.request_params.temperature,
        max_tokens: body.request_params.max_tokens,
        thinking_budget: body.request_params.thinking,
        context_window_tokens: None,
    };

    let executor = Arc::new(ts_engine::TurnExecutor {
        store: state.store.clone(),
        hub: state.hub.clone(),
        tools: state.tools.clone(),
        cancel_map: state.cancel_map.clone(),
        max_tool_rounds: state.config.executor.max_tool_rounds,
    });

    let assistant_turn_id = assistant_turn.id;
    tokio::spawn(async move {
        let _permit = _permit;
        executor.run(adapter, assistant_turn_id, params).await;
    });

    let stream_url = format!("/api/turns/{}/stream", assistant_turn.id);
    Ok((
        StatusCode::CREATED,
        Json(CreateTurnResponse { user_turn, assistant_turn, stream_url }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListTurnsQuery {
    pub from_turn_id: Option<Uuid>,
    #[serde(default = "d_limit")]
    pub limit: usize,
    #[serde(default)]
    pub direction: ListDirection,
    #[serde(default)]
    pub update_last_viewed: bool,
}

fn d_limit() -> usize {
    50
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListDirection {
    #[default]
    After,
    Before,
    Both,
}

impl From<ListDirection> for Direction {
    fn from(d: ListDirection) -> Self {
        match d {
            ListDirection::After => Direction::After,
            ListDirection::Before => Direction::Before,
            ListDirection::Both => Direction::Both,
        }
    }
}

pub async fn list_chat_turns(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<ListTurnsQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = state.store.get_paginated_turns(chat_id, query.from_turn_id, query.limit, query.direction.into())?;

    if query.update_last_viewed {
        if let Some((last_turn, _)) = page.last() {
            state.store.update_chat_last_viewed(chat_id, Some(last_turn.id))?;
        }
    }

    Ok(Json(serde_json::json!({ "turns": page })))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use ts_domain::config::{AuthConfig, Config, LlmConfig, ProviderConfig, ProviderKind};
    use ts_engine::{CancelMap, EchoTool, InMemoryToolRegistry, StreamHub, TurnLockMap};
    use ts_providers::ProviderRegistry;
    use ts_store::TurnStore;

    use super::*;

    fn provider_cfg(default_model: &str) -> ProviderConfig {
        ProviderConfig {
            kind: ProviderKind::Anthropic,
            base_url: "https://api.anthropic.com".into(),
            auth: AuthConfig { env: None, key: Some("sk-ant-test".into()) },
            default_model: Some(default_model.into()),
        }
    }

    fn state_with_providers(providers: HashMap<String, ProviderConfig>) -> AppState {
        let mut config = Config::default();
        config.llm = LlmConfig { providers };
        let config = Arc::new(config);
        let registry = Arc::new(ProviderRegistry::from_config(&config.llm).unwrap());
        AppState {
            config,
            store: Arc::new(TurnStore::open_in_memory().unwrap()),
            providers: registry,
            hub: Arc::new(StreamHub::new(std::time::Duration::from_secs(600))),
            turn_locks: Arc::new(TurnLockMap::new()),
            cancel_map: Arc::new(CancelMap::new()),
            tools: Arc::new(InMemoryToolRegistry::new(vec![Arc::new(EchoTool)])),
        }
    }

    #[test]
    fn resolve_provider_matches_default_model() {
        let mut providers = HashMap::new();
        providers.insert("anthropic".to_string(), provider_cfg("claude-sonnet-4-20250514"));
        let state = state_with_providers(providers);

        let adapter = resolve_provider(&state, "claude-sonnet-4-20250514").unwrap();
        assert_eq!(adapter.provider_id(), "anthropic");
    }

    #[test]
    fn resolve_provider_falls_back_to_first_registered() {
        let mut providers = HashMap::new();
        providers.insert("anthropic".to_string(), provider_cfg("claude-sonnet-4-20250514"));
        let state = state_with_providers(providers);

        let adapter = resolve_provider(&state, "some-unrecognized-model").unwrap();
        assert_eq!(adapter.provider_id(), "anthropic");
    }

    #[test]
    fn resolve_provider_errors_when_none_registered() {
        let state = state_with_providers(HashMap::new());
        let err = match resolve_provider(&state, "claude-sonnet-4-20250514") {
            Err(e) => e,
            Ok(_) => panic!("expected resolve_provider to error"),
        };
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[test]
    fn list_direction_defaults_to_after() {
        assert!(matches!(ListDirection::default(), ListDirection::After));
    }

    #[test]
    fn list_direction_converts_to_store_direction() {
        assert!(matches!(Direction::from(ListDirection::Before), Direction::Before));
        assert!(matches!(Direction::from(ListDirection::Both), Direction::Both));
    }
}
