//! Orchestration layer: the Turn Executor loop, the Stream Hub fan-out, and
//! the concurrency-control primitives (`TurnLockMap`, `CancelMap`) that sit
//! between the HTTP gateway and the durable `ts-store` / `ts-providers`
//! crates.

pub mod cancel;
pub mod executor;
pub mod message_builder;
pub mod stream_hub;
pub mod tool;
pub mod turn_lock;

pub use cancel::{CancelMap, CancelToken};
pub use executor::{reconstruct_catchup_events, TurnExecutor, TurnParams};
pub use message_builder::build_messages;
pub use stream_hub::{Stream, StreamHub, StreamStatus};
pub use tool::{EchoTool, InMemoryToolRegistry, Tool, ToolRegistry};
pub use turn_lock::{TurnBusy, TurnLockMap};
