mod config;
mod proxy_client;
mod routes;
mod state;
mod webhook;

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use broker_auth::{AuthEngine, PostConnectionHooks, RefreshCoordinator, VerificationProber};
use broker_types::{LoggingNotifier, SessionStore};
use tracing_subscriber::{prelude::*, EnvFilter};

use broker_store::YamlProviderRegistry;

use crate::config::BrokerConfig;
use crate::proxy_client::ReqwestProxyClient;
use crate::state::AppState;
use crate::webhook::HttpWebhookSender;

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level))
        .add_directive("hyper=off".parse().unwrap())
        .add_directive("h2=off".parse().unwrap())
        .add_directive("rustls=off".parse().unwrap())
        .add_directive("reqwest=off".parse().unwrap());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact();

    tracing_subscriber::registry().with(fmt_layer.with_filter(filter)).init();
}

#[actix_web::main]
async fn main() -> Result<()> {
    let config = BrokerConfig::from_env()?;
    init_logging(&config.log_level);

    tracing::info!(bind_addr = %config.bind_addr, "starting broker-server");

    let providers_path = std::env::var("NANGO_PROVIDERS_FILE").unwrap_or_else(|_| "providers.yaml".to_string());
    let integrations_path =
        std::env::var("NANGO_INTEGRATIONS_FILE").unwrap_or_else(|_| "integrations.yaml".to_string());
    let registry = Arc::new(
        YamlProviderRegistry::load(&providers_path, &integrations_path)
            .context("failed to load provider registry")?,
    );

    let pool = broker_store::pool::sqlite_pool(&config.database_url, 10)
        .await
        .context("failed to initialize sqlite pool")?;
    let sessions = Arc::new(broker_store::SqliteSessionStore::from_pool(pool.clone()));
    let connections = Arc::new(broker_store::SqliteConnectionStore::from_pool(pool));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build http client")?;

    let webhook_sender = match std::env::var("NANGO_WEBHOOK_URL") {
        Ok(url) if !url.trim().is_empty() => {
            let secret = std::env::var("NANGO_WEBHOOK_SECRET").unwrap_or_default();
            Some(Arc::new(HttpWebhookSender::new(http.clone(), url, secret))
                as Arc<dyn broker_types::WebhookSender>)
        }
        _ => None,
    };

    let hooks = PostConnectionHooks {
        sync_scheduler: None,
        internal_script: None,
        external_script: None,
        webhook_sender,
        notifier: Arc::new(LoggingNotifier),
    };

    let prober = VerificationProber {
        proxy: Arc::new(ReqwestProxyClient::new(http.clone())),
    };

    let engine = Arc::new(AuthEngine {
        registry,
        sessions,
        connections,
        http: http.clone(),
        hooks,
        prober,
        refresh: RefreshCoordinator::new(http),
    });

    spawn_session_sweeper(engine.clone());

    let bind_addr = config.bind_addr;
    let app_state = web::Data::new(AppState { engine, config });

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(Cors::default().allow_any_origin().allow_any_method().allow_any_header())
            .configure(routes::configure_routes)
    })
    .bind(bind_addr)
    .with_context(|| format!("failed to bind to {bind_addr}"))?
    .run()
    .await
    .context("server error")?;

    Ok(())
}

/// Periodic, idempotent sweeper for expired sessions; the only long-lived
/// task the core keeps besides the refresh single-flight registry.
fn spawn_session_sweeper(engine: Arc<AuthEngine>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            match engine
                .sessions
                .sweep_expired(chrono::Duration::seconds(broker_auth::SESSION_MAX_AGE_SECONDS))
                .await
            {
                Ok(count) if count > 0 => tracing::info!(count, "swept expired oauth sessions"),
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "session sweep failed"),
            }
        }
    });
}
