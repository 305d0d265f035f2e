//! Provider registry.
//!
//! Constructs and holds all configured provider adapters. At startup the
//! registry reads the [`LlmConfig`], resolves authentication (env vars, direct
//! keys), and instantiates the appropriate adapter for each configured entry.

use std::collections::HashMap;
use std::sync::Arc;

use ts_domain::config::{LlmConfig, ProviderKind};
use ts_domain::error::{Error, Result};

use crate::anthropic::AnthropicProvider;
use crate::traits::ProviderAdapter;

/// Holds all instantiated provider adapters, keyed by the config id they
/// were constructed from.
///
/// Providers that fail to initialize (usually a missing API key) are
/// recorded rather than aborting startup, so a gateway can still boot with
/// a partially configured provider list.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
    init_errors: Vec<ProviderInitError>,
}

/// Records a provider that failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_id: String,
    pub kind: String,
    pub error: String,
}

impl ProviderRegistry {
    /// Build the registry from the gateway's [`LlmConfig`].
    ///
    /// Each entry in `config.providers` is instantiated using the adapter
    /// for its `kind`. Auth keys are resolved eagerly (env vars are read at
    /// this point).
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
        let mut init_errors: Vec<ProviderInitError> = Vec::new();

        for (id, pc) in &config.providers {
            let result: Result<Arc<dyn ProviderAdapter>> = match pc.kind {
                ProviderKind::Anthropic => AnthropicProvider::from_config(id, pc)
                    .map(|p| Arc::new(p) as Arc<dyn ProviderAdapter>),
            };

            match result {
                Ok(provider) => {
                    tracing::info!(provider_id = %id, kind = ?pc.kind, "registered provider adapter");
                    providers.insert(id.clone(), provider);
                }
                Err(e) => {
                    tracing::warn!(
                        provider_id = %id,
                        kind = ?pc.kind,
                        error = %e,
                        "failed to initialize provider, skipping"
                    );
                    init_errors.push(ProviderInitError {
                        provider_id: id.clone(),
                        kind: format!("{:?}", pc.kind),
                        error: e.to_string(),
                    });
                }
            }
        }

        if providers.is_empty() && !config.providers.is_empty() {
            return Err(Error::Config(
                "all configured providers failed to initialize".into(),
            ));
        }

        Ok(Self {
            providers,
            init_errors,
        })
    }

    /// Look up an adapter by its config id.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.get(provider_id).cloned()
    }

    /// Number of registered adapters.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// List all registered provider ids (sorted).
    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Provider initialization errors (empty if all succeeded).
    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}
