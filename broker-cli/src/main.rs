mod cli;
mod logging;

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use broker_auth::{AuthEngine, PostConnectionHooks, RefreshCoordinator, StartOutcome, StartParams, VerificationProber};
use broker_types::{BrokerError, LoggingNotifier, ProxyClient, ProxyRequest, ProxyResponse, RequestContext};
use clap::Parser;
use cli::{Cli, Commands};
use uuid::Uuid;

/// A no-op proxy for the CLI: verification probes are skipped outside the
/// server, since the CLI has no downstream proxy wired up.
struct NullProxyClient;

#[async_trait::async_trait]
impl ProxyClient for NullProxyClient {
    async fn send(&self, _request: ProxyRequest) -> Result<ProxyResponse, BrokerError> {
        Ok(ProxyResponse { status: 200 })
    }
}

async fn build_engine() -> Result<AuthEngine> {
    let providers_path = std::env::var("NANGO_PROVIDERS_FILE").unwrap_or_else(|_| "providers.yaml".to_string());
    let integrations_path =
        std::env::var("NANGO_INTEGRATIONS_FILE").unwrap_or_else(|_| "integrations.yaml".to_string());
    let registry = Arc::new(
        broker_store::YamlProviderRegistry::load(&providers_path, &integrations_path)
            .context("failed to load provider registry")?,
    );

    let database_url = std::env::var("NANGO_DB_URL").unwrap_or_else(|_| "broker.sqlite".to_string());
    let pool = broker_store::pool::sqlite_pool(&database_url, 5)
        .await
        .context("failed to initialize sqlite pool")?;
    let sessions = Arc::new(broker_store::SqliteSessionStore::from_pool(pool.clone()));
    let connections = Arc::new(broker_store::SqliteConnectionStore::from_pool(pool));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build http client")?;

    Ok(AuthEngine {
        registry,
        sessions,
        connections,
        http: http.clone(),
        hooks: PostConnectionHooks {
            sync_scheduler: None,
            internal_script: None,
            external_script: None,
            webhook_sender: None,
            notifier: Arc::new(LoggingNotifier),
        },
        prober: VerificationProber {
            proxy: Arc::new(NullProxyClient),
        },
        refresh: RefreshCoordinator::new(http),
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init_logging("info");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let engine = build_engine().await?;

    match cli.command {
        Commands::Connect {
            provider_config_key,
            connection_id,
            callback_url,
        } => {
            let connection_id = connection_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let callback_url = callback_url
                .or_else(|| std::env::var("NANGO_CALLBACK_URL").ok())
                .unwrap_or_else(|| "http://localhost:3003/oauth/callback".to_string());

            let params = StartParams {
                context: RequestContext::new(cli.environment_id, Uuid::new_v4().to_string()),
                provider_config_key,
                connection_id,
                callback_url,
                connection_config: HashMap::new(),
                authorization_params: HashMap::new(),
                web_socket_client_id: None,
                user_scope: None,
                client_id_override: None,
                client_secret_override: None,
                hmac: None,
            };

            match engine.start(params).await.map_err(as_anyhow)? {
                StartOutcome::Redirect(url) => println!("{url}"),
                StartOutcome::Completed(result) => {
                    println!("{}", serde_json::to_string_pretty(&connection_summary(&result.connection))?);
                }
            }
        }
        Commands::ClientCredentials {
            provider_config_key,
            connection_id,
            client_id,
            client_secret,
        } => {
            let context = RequestContext::new(cli.environment_id, Uuid::new_v4().to_string());
            let result = engine
                .start_client_credentials(
                    context,
                    &provider_config_key,
                    &connection_id,
                    &client_id,
                    &client_secret,
                    HashMap::new(),
                )
                .await
                .map_err(as_anyhow)?;
            println!("{}", serde_json::to_string_pretty(&connection_summary(&result.connection))?);
        }
        Commands::SimpleAuth {
            provider_config_key,
            connection_id,
            credentials,
        } => {
            let body: HashMap<String, serde_json::Value> =
                serde_json::from_str(&credentials).context("--credentials must be a JSON object")?;
            let context = RequestContext::new(cli.environment_id, Uuid::new_v4().to_string());
            let result = engine
                .start_simple(context, &provider_config_key, &connection_id, body, HashMap::new())
                .await
                .map_err(as_anyhow)?;
            println!("{}", serde_json::to_string_pretty(&connection_summary(&result.connection))?);
        }
        Commands::Status {
            provider_config_key,
            connection_id,
        } => {
            let connection = broker_types::ConnectionStore::get(
                engine.connections.as_ref(),
                &cli.environment_id,
                &provider_config_key,
                &connection_id,
            )
            .await
            .map_err(as_anyhow)?;

            match connection {
                Some(connection) => {
                    println!("{}", serde_json::to_string_pretty(&connection_summary(&connection))?);
                }
                None => anyhow::bail!("no connection found for '{connection_id}'"),
            }
        }
        Commands::Refresh {
            provider_config_key,
            connection_id,
        } => {
            engine
                .get_fresh_credentials(&cli.environment_id, &provider_config_key, &connection_id)
                .await
                .map_err(as_anyhow)?;
            println!("refreshed");
        }
    }

    Ok(())
}

fn as_anyhow(err: BrokerError) -> anyhow::Error {
    anyhow::anyhow!("{}: {}", err.code.as_str(), err.message)
}

/// Connection fields safe to print: credentials are never logged.
fn connection_summary(connection: &broker_types::Connection) -> serde_json::Value {
    serde_json::json!({
        "environmentId": connection.environment_id,
        "providerConfigKey": connection.provider_config_key,
        "connectionId": connection.connection_id,
        "provider": connection.provider,
        "pending": connection.pending,
        "createdAt": connection.created_at,
        "updatedAt": connection.updated_at,
    })
}
