use std::pin::Pin;

use futures_core::Stream;
use ts_domain::error::Result;
use ts_domain::event::ProviderEvent;
use ts_domain::model::{GenerateRequest, Message, ToolDefinition};

/// A boxed, send, owned stream of provider events — the same shape the
/// domain layer uses everywhere a lazily-produced sequence crosses an
/// `async fn` boundary.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Polymorphic translation layer between domain blocks and a specific LLM
/// vendor's wire format and event stream.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable identifier for this adapter instance (matches the config key
    /// it was constructed from).
    fn provider_id(&self) -> &str;

    /// Initiate a streaming generation call and yield provider events until
    /// end-of-stream.
    async fn stream(
        &self,
        request: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>>;

    /// Produce the vendor-specific wire body for a request. Exposed
    /// separately from `stream` so it is directly unit-testable without a
    /// network call.
    fn convert_to_provider_messages(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        tools: Option<&[ToolDefinition]>,
    ) -> serde_json::Value;
}
