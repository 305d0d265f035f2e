//! Registry construction against real [`LlmConfig`] values — no network
//! calls, since building an adapter only resolves auth and builds an HTTP
//! client.

use std::collections::HashMap;

use ts_domain::config::{AuthConfig, LlmConfig, ProviderConfig, ProviderKind};
use ts_providers::ProviderRegistry;

fn provider(auth: AuthConfig) -> ProviderConfig {
    ProviderConfig {
        kind: ProviderKind::Anthropic,
        base_url: "https://api.anthropic.com".into(),
        auth,
        default_model: Some("claude-sonnet-4-20250514".into()),
    }
}

#[test]
fn registry_from_config_with_valid_key() {
    let mut providers = HashMap::new();
    providers.insert(
        "anthropic".to_string(),
        provider(AuthConfig { env: None, key: Some("sk-ant-test".into()) }),
    );
    let registry = ProviderRegistry::from_config(&LlmConfig { providers }).unwrap();

    assert_eq!(registry.len(), 1);
    assert!(!registry.is_empty());
    assert_eq!(registry.list_providers(), vec!["anthropic".to_string()]);
    assert!(registry.get("anthropic").is_some());
    assert!(registry.get("missing").is_none());
    assert!(registry.init_errors().is_empty());
}

#[test]
fn registry_skips_provider_with_no_auth_configured() {
    let mut providers = HashMap::new();
    providers.insert("anthropic".to_string(), provider(AuthConfig { env: None, key: None }));
    let err = match ProviderRegistry::from_config(&LlmConfig { providers }) {
        Err(e) => e,
        Ok(_) => panic!("expected from_config to error"),
    };

    assert!(err.to_string().contains("all configured providers failed"));
}

#[test]
fn registry_empty_config_is_empty_not_an_error() {
    let registry = ProviderRegistry::from_config(&LlmConfig::default()).unwrap();
    assert!(registry.is_empty());
    assert_eq!(registry.len(), 0);
}

#[test]
fn registry_partial_failure_keeps_working_providers() {
    let mut providers = HashMap::new();
    providers.insert(
        "good".to_string(),
        provider(AuthConfig { env: None, key: Some("sk-ant-good".into()) }),
    );
    providers.insert("bad".to_string(), provider(AuthConfig { env: None, key: None }));
    let registry = ProviderRegistry::from_config(&LlmConfig { providers }).unwrap();

    assert_eq!(registry.len(), 1);
    assert!(registry.get("good").is_some());
    assert!(registry.get("bad").is_none());
    assert_eq!(registry.init_errors().len(), 1);
    assert_eq!(registry.init_errors()[0].provider_id, "bad");
}
