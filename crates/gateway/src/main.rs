mod api;
mod cli;
mod state;

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use ts_domain::config::{Config, ConfigSeverity, CorsConfig};
use ts_engine::{CancelMap, EchoTool, InMemoryToolRegistry, StreamHub, ToolRegistry, TurnLockMap};
use ts_providers::ProviderRegistry;
use ts_store::TurnStore;

use cli::{Cli, Command, ConfigCommand};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config()?;
            if !cli::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config()?;
            cli::show(&config);
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ts_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("turnstream starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let store = Arc::new(
        TurnStore::open(std::path::Path::new(&config.store.database_path))
            .context("opening turn store")?,
    );
    let sweep_count = store.sweep_abandoned_streaming_turns().context("sweeping abandoned turns")?;
    if sweep_count > 0 {
        tracing::warn!(count = sweep_count, "marked abandoned streaming turns as errored on startup");
    }

    let providers = Arc::new(ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?);
    if providers.is_empty() {
        tracing::warn!("no LLM providers initialized — turn creation will fail until one is configured");
    } else {
        tracing::info!(providers = providers.len(), "LLM provider registry ready");
    }

    let hub = Arc::new(StreamHub::new(std::time::Duration::from_secs(config.executor.retention_window_secs)));
    let turn_locks = Arc::new(TurnLockMap::new());
    let cancel_map = Arc::new(CancelMap::new());

    let tools: Arc<dyn ToolRegistry> = Arc::new(InMemoryToolRegistry::new(vec![Arc::new(EchoTool)]));

    let state = AppState {
        config: config.clone(),
        store,
        providers,
        hub: hub.clone(),
        turn_locks: turn_locks.clone(),
        cancel_map,
        tools,
    };

    {
        let hub = hub.clone();
        let turn_locks = turn_locks.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                hub.sweep_stale();
                turn_locks.prune_idle();
            }
        });
    }

    let cors_layer = build_cors_layer(&config.server.cors);
    let app = api::router().layer(cors_layer).with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "turnstream listening");
    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}

fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
