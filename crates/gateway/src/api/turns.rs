//! Single-turn endpoints: blocks snapshot, ancestor path, siblings, and
//! cooperative interrupt.

use axum::extract::{Path, State};
use axum::response::Json;
use uuid::Uuid;

use ts_domain::error::Error;
use ts_domain::model::TurnStatus;

use super::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn get_turn_blocks(
    State(state): State<AppState>,
    Path(turn_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let Some(turn) = state.store.get_turn(turn_id)? else {
        return Err(ApiError(Error::NotFound(format!("turn {turn_id} not found"))));
    };
    let blocks = state.store.get_turn_blocks(turn_id)?;
    Ok(Json(serde_json::json!({ "turn": turn, "blocks": blocks })))
}

pub async fn get_turn_path(
    State(state): State<AppState>,
    Path(turn_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let path = state.store.get_turn_path(turn_id)?;
    if path.is_empty() {
        return Err(ApiError(Error::NotFound(format!("turn {turn_id} not found"))));
    }
    Ok(Json(serde_json::json!({ "path": path })))
}

pub async fn get_turn_siblings(
    State(state): State<AppState>,
    Path(turn_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let Some(_turn) = state.store.get_turn(turn_id)? else {
        return Err(ApiError(Error::NotFound(format!("turn {turn_id} not found"))));
    };
    let siblings = state.store.get_siblings(turn_id)?;
    Ok(Json(serde_json::json!({ "siblings": siblings })))
}

pub async fn interrupt_turn(
    State(state): State<AppState>,
    Path(turn_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let Some(turn) = state.store.get_turn(turn_id)? else {
        return Err(ApiError(Error::NotFound(format!("turn {turn_id} not found"))));
    };
    if turn.status.is_terminal() {
        return Ok(Json(serde_json::json!({ "cancelled": false, "status": turn.status })));
    }

    let cancelled = state.cancel_map.cancel(turn_id);
    if !cancelled {
        // No running executor owns this turn (e.g. the process restarted);
        // transition it directly so callers never see it stuck in-flight.
        state.store.update_turn_status(turn_id, TurnStatus::Cancelled, Some("cancelled with no running executor"))?;
        if let Some(stream) = state.hub.get(turn_id) {
            stream.publish(
                "turn_complete",
                serde_json::json!({"turn_id": turn_id, "stop_reason": ts_domain::event::StopReason::Cancelled}),
            );
            stream.mark_terminal();
        }
    }

    Ok(Json(serde_json::json!({ "cancelled": true, "status": TurnStatus::Cancelled })))
}

#[cfg(test)]
mod tests {
    use axum::extract::{Path as AxPath, State as AxState};
    use chrono::Utc;
    use ts_domain::model::{Chat, Turn};
    use ts_engine::{CancelMap, EchoTool, InMemoryToolRegistry, StreamHub, TurnLockMap};
    use ts_providers::ProviderRegistry;
    use ts_store::TurnStore;

    use super::*;
    use std::sync::Arc;

    fn insert_chat(state: &AppState, chat_id: Uuid) {
        let now = Utc::now();
        state
            .store
            .create_chat(&Chat {
                id: chat_id,
                project_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                title: None,
                last_viewed_turn_id: None,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            })
            .unwrap();
    }

    fn empty_state() -> AppState {
        AppState {
            config: Arc::new(ts_domain::config::Config::default()),
            store: Arc::new(TurnStore::open_in_memory().unwrap()),
            providers: Arc::new(ProviderRegistry::from_config(&Default::default()).unwrap()),
            hub: Arc::new(StreamHub::new(std::time::Duration::from_secs(600))),
            turn_locks: Arc::new(TurnLockMap::new()),
            cancel_map: Arc::new(CancelMap::new()),
            tools: Arc::new(InMemoryToolRegistry::new(vec![Arc::new(EchoTool)])),
        }
    }

    #[tokio::test]
    async fn get_turn_blocks_404_for_unknown_turn() {
        let state = empty_state();
        let err = get_turn_blocks(AxState(state), AxPath(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err.0, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn get_turn_path_404_when_empty() {
        let state = empty_state();
        let err = get_turn_path(AxState(state), AxPath(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err.0, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn interrupt_turn_404_for_unknown_turn() {
        let state = empty_state();
        let err = interrupt_turn(AxState(state), AxPath(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err.0, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn interrupt_turn_marks_orphaned_turn_cancelled_directly() {
        let state = empty_state();
        let chat_id = Uuid::new_v4();
        insert_chat(&state, chat_id);
        let user_turn = Turn::new_user(Uuid::new_v4(), chat_id, None);
        let assistant_turn = Turn::new_assistant(Uuid::new_v4(), chat_id, user_turn.id, "claude-sonnet-4-20250514".into());
        state.store.create_turn(&user_turn).unwrap();
        state.store.create_turn(&assistant_turn).unwrap();

        // No executor ever registered a cancel token for this turn, so the
        // handler must fall back to marking it cancelled directly.
        interrupt_turn(AxState(state.clone()), AxPath(assistant_turn.id)).await.unwrap();

        let reloaded = state.store.get_turn(assistant_turn.id).unwrap().unwrap();
        assert_eq!(reloaded.status, TurnStatus::Cancelled);
    }

    #[tokio::test]
    async fn interrupt_turn_on_terminal_turn_is_a_no_op() {
        let state = empty_state();
        let chat_id = Uuid::new_v4();
        insert_chat(&state, chat_id);
        let user_turn = Turn::new_user(Uuid::new_v4(), chat_id, None);
        let mut assistant_turn =
            Turn::new_assistant(Uuid::new_v4(), chat_id, user_turn.id, "claude-sonnet-4-20250514".into());
        assistant_turn.status = TurnStatus::Complete;
        state.store.create_turn(&user_turn).unwrap();
        state.store.create_turn(&assistant_turn).unwrap();

        let Json(body) = interrupt_turn(AxState(state), AxPath(assistant_turn.id)).await.unwrap();
        assert_eq!(body["cancelled"], false);
    }
}
