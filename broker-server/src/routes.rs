use std::collections::HashMap;

use actix_web::{web, HttpResponse, Result};
use broker_auth::{FinishOutcome, StartOutcome, StartParams};
use broker_types::{BrokerError, ErrorCode, RequestContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl From<&BrokerError> for ErrorResponse {
    fn from(err: &BrokerError) -> Self {
        Self {
            error: err.code.as_str(),
            message: err.message.clone(),
        }
    }
}

/// Every recoverable engine failure is surfaced as a 200-and-published-error
/// per the design's propagation policy, except for guard failures (missing
/// or invalid hmac) which are rejected before any state is touched.
fn error_response(err: BrokerError) -> HttpResponse {
    let status = match err.code {
        ErrorCode::MissingHmac | ErrorCode::InvalidHmac => actix_web::http::StatusCode::UNAUTHORIZED,
        ErrorCode::UnknownProviderConfig | ErrorCode::UnknownProviderTemplate => {
            actix_web::http::StatusCode::NOT_FOUND
        }
        ErrorCode::UpstreamTimeout => actix_web::http::StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::UnknownError => actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
        _ => actix_web::http::StatusCode::BAD_REQUEST,
    };
    HttpResponse::build(status).json(ErrorResponse::from(&err))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/oauth/connect/{provider_config_key}",
        web::get().to(connect),
    )
    .route("/oauth2/cc/{provider_config_key}", web::post().to(client_credentials))
    .route("/oauth/callback", web::get().to(callback))
    .route("/api-auth/{provider_config_key}", web::post().to(simple_auth))
    .route("/basic-auth/{provider_config_key}", web::post().to(simple_auth))
    .route("/app-store-auth/{provider_config_key}", web::post().to(simple_auth))
    .route("/tba-auth/{provider_config_key}", web::post().to(simple_auth))
    .route("/tableau-auth/{provider_config_key}", web::post().to(simple_auth))
    .route("/signature-auth/{provider_config_key}", web::post().to(simple_auth))
    .route("/jwt-auth/{provider_config_key}", web::post().to(simple_auth))
    .route("/bill-auth/{provider_config_key}", web::post().to(simple_auth))
    .route("/two-step-auth/{provider_config_key}", web::post().to(simple_auth));
}

#[derive(Deserialize)]
struct ConnectQuery {
    #[serde(default)]
    environment_id: Option<String>,
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    ws_client_id: Option<String>,
    #[serde(default)]
    user_scope: Option<String>,
    #[serde(default)]
    params: Option<String>,
    #[serde(default)]
    authorization_params: Option<String>,
    #[serde(default)]
    credentials: Option<String>,
    #[serde(default)]
    hmac: Option<String>,
}

fn parse_json_map(raw: Option<&str>) -> HashMap<String, Value> {
    raw.and_then(|s| serde_json::from_str::<HashMap<String, Value>>(s).ok())
        .unwrap_or_default()
}

fn parse_string_map(raw: Option<&str>) -> HashMap<String, String> {
    raw.and_then(|s| serde_json::from_str::<HashMap<String, String>>(s).ok())
        .unwrap_or_default()
}

fn environment_id(raw: &Option<String>) -> String {
    raw.clone().unwrap_or_else(|| "default".to_string())
}

async fn connect(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ConnectQuery>,
) -> Result<HttpResponse> {
    let provider_config_key = path.into_inner();
    let query = query.into_inner();
    let environment_id = environment_id(&query.environment_id);
    let connection_id = query.connection_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

    let integration = state
        .engine
        .registry
        .get_integration(&environment_id, &provider_config_key)
        .await;
    if let Some(integration) = &integration {
        if let Some(secret) = integration.custom.get("hmac_secret").and_then(Value::as_str) {
            match broker_hmac::verify(secret, &provider_config_key, Some(&connection_id), query.hmac.as_deref()) {
                broker_hmac::HmacVerdict::Valid => {}
                broker_hmac::HmacVerdict::Missing => {
                    return Ok(error_response(BrokerError::new(ErrorCode::MissingHmac, "hmac required for this provider config")));
                }
                broker_hmac::HmacVerdict::Invalid => {
                    return Ok(error_response(BrokerError::new(ErrorCode::InvalidHmac, "hmac did not verify")));
                }
            }
        }
    }

    let credentials = parse_json_map(query.credentials.as_deref());
    let client_id_override = credentials
        .get("oauth_client_id_override")
        .and_then(Value::as_str)
        .map(str::to_string);
    let client_secret_override = credentials
        .get("oauth_client_secret_override")
        .and_then(Value::as_str)
        .map(str::to_string);

    let callback_url = state.config.callback_config.callback_url();
    let params = StartParams {
        context: RequestContext::new(environment_id, Uuid::new_v4().to_string()),
        provider_config_key,
        connection_id,
        callback_url,
        connection_config: parse_json_map(query.params.as_deref()),
        authorization_params: parse_string_map(query.authorization_params.as_deref()),
        web_socket_client_id: query.ws_client_id,
        user_scope: query.user_scope,
        client_id_override,
        client_secret_override,
        hmac: query.hmac,
    };

    match state.engine.start(params).await {
        Ok(StartOutcome::Redirect(url)) => Ok(HttpResponse::Found()
            .append_header(("Location", url))
            .finish()),
        Ok(StartOutcome::Completed(result)) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "providerConfigKey": result.connection.provider_config_key,
            "connectionId": result.connection.connection_id,
        }))),
        Err(err) => Ok(error_response(err)),
    }
}

#[derive(Deserialize)]
struct ClientCredentialsQuery {
    #[serde(default)]
    environment_id: Option<String>,
}

#[derive(Deserialize)]
struct ClientCredentialsBody {
    connection_id: Option<String>,
    client_id: String,
    client_secret: String,
    #[serde(default)]
    params: HashMap<String, Value>,
    #[serde(default)]
    hmac: Option<String>,
}

async fn client_credentials(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ClientCredentialsQuery>,
    body: web::Json<ClientCredentialsBody>,
) -> Result<HttpResponse> {
    let provider_config_key = path.into_inner();
    let environment_id = environment_id(&query.environment_id);
    let body = body.into_inner();
    let connection_id = body.connection_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let integration = state
        .engine
        .registry
        .get_integration(&environment_id, &provider_config_key)
        .await;
    if let Some(integration) = &integration {
        if let Some(secret) = integration.custom.get("hmac_secret").and_then(Value::as_str) {
            match broker_hmac::verify(secret, &provider_config_key, Some(&connection_id), body.hmac.as_deref()) {
                broker_hmac::HmacVerdict::Valid => {}
                broker_hmac::HmacVerdict::Missing => {
                    return Ok(error_response(BrokerError::new(ErrorCode::MissingHmac, "hmac required for this provider config")));
                }
                broker_hmac::HmacVerdict::Invalid => {
                    return Ok(error_response(BrokerError::new(ErrorCode::InvalidHmac, "hmac did not verify")));
                }
            }
        }
    }

    let context = RequestContext::new(environment_id, Uuid::new_v4().to_string());
    match state
        .engine
        .start_client_credentials(
            context,
            &provider_config_key,
            &connection_id,
            &body.client_id,
            &body.client_secret,
            body.params,
        )
        .await
    {
        Ok(result) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "providerConfigKey": result.connection.provider_config_key,
            "connectionId": result.connection.connection_id,
        }))),
        Err(err) => Ok(error_response(err)),
    }
}

async fn callback(
    state: web::Data<AppState>,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse> {
    let engine = state.engine.clone();
    let callback_params = query.into_inner();

    // Spawned as a detached task so the connection upsert and hook dispatch
    // run to completion even if the caller disconnects before they finish.
    let handle = tokio::spawn(async move { engine.finish(callback_params).await });

    match handle.await {
        Ok(Ok(FinishOutcome::Connected(result))) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "status": "connected",
            "providerConfigKey": result.connection.provider_config_key,
            "connectionId": result.connection.connection_id,
        }))),
        Ok(Ok(FinishOutcome::PendingApproval(result))) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "status": "pending_approval",
            "providerConfigKey": result.connection.provider_config_key,
            "connectionId": result.connection.connection_id,
        }))),
        Ok(Ok(FinishOutcome::RedirectTo(url))) => Ok(HttpResponse::Found()
            .append_header(("Location", url))
            .finish()),
        Ok(Err(err)) => Ok(error_response(err)),
        Err(join_err) => Ok(error_response(BrokerError::new(
            ErrorCode::UnknownError,
            format!("callback task panicked: {join_err}"),
        ))),
    }
}

#[derive(Deserialize)]
struct SimpleAuthQuery {
    #[serde(default)]
    environment_id: Option<String>,
}

#[derive(Deserialize)]
struct SimpleAuthBody {
    connection_id: Option<String>,
    #[serde(default)]
    credentials: HashMap<String, Value>,
    #[serde(default)]
    connection_config: HashMap<String, Value>,
}

async fn simple_auth(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<SimpleAuthQuery>,
    body: web::Json<SimpleAuthBody>,
) -> Result<HttpResponse> {
    let provider_config_key = path.into_inner();
    let environment_id = environment_id(&query.environment_id);
    let body = body.into_inner();
    let connection_id = body.connection_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let context = RequestContext::new(environment_id, Uuid::new_v4().to_string());
    match state
        .engine
        .start_simple(
            context,
            &provider_config_key,
            &connection_id,
            body.credentials,
            body.connection_config,
        )
        .await
    {
        Ok(result) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "providerConfigKey": result.connection.provider_config_key,
            "connectionId": result.connection.connection_id,
        }))),
        Err(err) => Ok(error_response(err)),
    }
}
