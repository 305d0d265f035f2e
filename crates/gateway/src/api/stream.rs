//! `GET /api/turns/{id}/stream` — the SSE surface clients reconnect to,
//! honoring `Last-Event-ID` for catchup.

use std::convert::Infallible;
use std::pin::Pin;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_core::Stream as FuturesStream;
use uuid::Uuid;

use ts_engine::reconstruct_catchup_events;

use super::error::ApiError;
use crate::state::AppState;

type BoxSseStream = Pin<Box<dyn FuturesStream<Item = Result<Event, Infallible>> + Send>>;

fn last_event_id(headers: &HeaderMap) -> u64 {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn to_axum_event(e: ts_domain::event::SseEvent) -> Event {
    Event::default().id(e.id.to_string()).event(e.event).json_data(e.data).unwrap_or_else(|_| Event::default())
}

pub async fn stream_turn(
    State(state): State<AppState>,
    Path(turn_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Sse<BoxSseStream>, ApiError> {
    if state.store.get_turn(turn_id)?.is_none() {
        let err = Event::default().event("turn_error").json_data(serde_json::json!({
            "turn_id": turn_id,
            "error": "turn not found",
        })).unwrap_or_default();
        let stream = async_stream::stream! { yield Ok(err); };
        let boxed: BoxSseStream = Box::pin(stream);
        return Ok(Sse::new(boxed).keep_alive(KeepAlive::default()));
    }

    let resume_from = last_event_id(&headers);
    let hub = state.hub.clone();
    let store = state.store.clone();

    let stream = async_stream::stream! {
        let catchup = if let Some(live) = hub.get(turn_id) {
            match live.get_catchup_events(resume_from) {
                Ok(events) => events,
                Err(e) => {
                    yield Ok(Event::default().event("turn_error").json_data(serde_json::json!({"turn_id": turn_id, "error": e.to_string()})).unwrap_or_default());
                    return;
                }
            }
        } else {
            match reconstruct_catchup_events(&store, turn_id, resume_from) {
                Ok(events) => events,
                Err(e) => {
                    yield Ok(Event::default().event("turn_error").json_data(serde_json::json!({"turn_id": turn_id, "error": e.to_string()})).unwrap_or_default());
                    return;
                }
            }
        };

        let mut last_seen = resume_from;
        for event in catchup {
            last_seen = event.id;
            yield Ok(to_axum_event(event));
        }

        let Some(live) = hub.get(turn_id) else {
            return;
        };
        if live.status() == ts_engine::StreamStatus::Terminal {
            return;
        }

        let (sub_id, mut rx) = live.subscribe();
        loop {
            match tokio::time::timeout(Duration::from_secs(15), rx.recv()).await {
                Ok(Some(event)) => {
                    if event.id <= last_seen {
                        continue;
                    }
                    last_seen = event.id;
                    let terminal = matches!(event.event.as_str(), "turn_complete" | "turn_error");
                    yield Ok(to_axum_event(event));
                    if terminal {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    yield Ok(Event::default().comment("keepalive"));
                }
            }
        }
        live.unsubscribe(sub_id);
    };

    let boxed: BoxSseStream = Box::pin(stream);
    Ok(Sse::new(boxed).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use ts_domain::event::SseEvent;

    use super::*;

    #[test]
    fn last_event_id_defaults_to_zero_when_absent() {
        let headers = HeaderMap::new();
        assert_eq!(last_event_id(&headers), 0);
    }

    #[test]
    fn last_event_id_parses_header() {
        let mut headers = HeaderMap::new();
        headers.insert("last-event-id", "42".parse().unwrap());
        assert_eq!(last_event_id(&headers), 42);
    }

    #[test]
    fn last_event_id_defaults_to_zero_on_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("last-event-id", "not-a-number".parse().unwrap());
        assert_eq!(last_event_id(&headers), 0);
    }

    #[test]
    fn to_axum_event_carries_id_and_event_name() {
        let event =
            SseEvent { id: 7, event: "block_delta".into(), data: serde_json::json!({"text": "hi"}), retry: None };
        // Event's fields aren't publicly inspectable, but building one must
        // not panic or silently fall back to the error-path default.
        let _ = to_axum_event(event);
    }
}
