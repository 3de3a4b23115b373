use std::collections::HashMap;
use std::sync::Arc;

use broker_types::{
    AuthMode, AuthOperation, BrokerError, Connection, ConnectionStore, ErrorCode,
    IntegrationConfig, OAuthSession, Provider, ProviderRegistry, RequestContext, SessionStore,
    UpsertOperation, UpsertResult,
};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::drivers::{app, oauth1, oauth2, oauth2_cc, simple};
use crate::hooks::PostConnectionHooks;
use crate::prober::VerificationProber;
use crate::refresh::{RefreshCoordinator, DEFAULT_SKEW_SECONDS};

/// Session TTL: bounded per the design's data model (>= 10 min, <= 1 h).
pub const SESSION_MAX_AGE_SECONDS: i64 = 30 * 60;

pub struct StartParams {
    pub context: RequestContext,
    pub provider_config_key: String,
    pub connection_id: String,
    pub callback_url: String,
    pub connection_config: HashMap<String, Value>,
    pub authorization_params: HashMap<String, String>,
    pub web_socket_client_id: Option<String>,
    pub user_scope: Option<String>,
    pub client_id_override: Option<String>,
    pub client_secret_override: Option<String>,
    pub hmac: Option<String>,
}

pub enum StartOutcome {
    Redirect(String),
    Completed(UpsertResult),
}

pub enum FinishOutcome {
    Connected(UpsertResult),
    PendingApproval(UpsertResult),
    RedirectTo(String),
}

/// Ties together the per-auth-mode drivers, session/connection stores,
/// refresh coordination, and post-connection hooks into the two public
/// entry points described by the design: `start` and `finish`.
pub struct AuthEngine {
    pub registry: Arc<dyn ProviderRegistry>,
    pub sessions: Arc<dyn SessionStore>,
    pub connections: Arc<dyn ConnectionStore>,
    pub http: reqwest::Client,
    pub hooks: PostConnectionHooks,
    pub prober: VerificationProber,
    pub refresh: RefreshCoordinator,
}

impl AuthEngine {
    async fn resolve(
        &self,
        environment_id: &str,
        provider_config_key: &str,
    ) -> Result<(IntegrationConfig, Provider), BrokerError> {
        let integration = self
            .registry
            .get_integration(environment_id, provider_config_key)
            .await
            .ok_or_else(|| BrokerError::unknown_provider_config(provider_config_key))?;
        let provider = self
            .registry
            .get_provider(&integration.provider)
            .await
            .ok_or_else(|| {
                BrokerError::new(
                    ErrorCode::UnknownProviderTemplate,
                    format!("no provider template registered for '{}'", integration.provider),
                )
            })?;
        Ok((integration, provider))
    }

    fn new_session(
        &self,
        params: &StartParams,
        integration: &IntegrationConfig,
        provider: &Provider,
    ) -> OAuthSession {
        let code_verifier = if provider.auth_mode == AuthMode::Oauth2 && !provider.disable_pkce {
            Some(broker_types::generate_code_verifier())
        } else {
            None
        };
        OAuthSession {
            id: Uuid::new_v4().to_string(),
            environment_id: params.context.environment_id.clone(),
            provider_config_key: params.provider_config_key.clone(),
            provider: integration.provider.clone(),
            auth_mode: provider.auth_mode,
            connection_id: params.connection_id.clone(),
            callback_url: params.callback_url.clone(),
            code_verifier,
            connection_config: params.connection_config.clone(),
            web_socket_client_id: params.web_socket_client_id.clone(),
            activity_log_id: params.context.activity_log_id.clone(),
            request_token_secret: None,
            created_at: Utc::now(),
        }
    }

    /// Dispatches a `start` request onto the auth-mode-appropriate driver.
    pub async fn start(&self, params: StartParams) -> Result<StartOutcome, BrokerError> {
        let (integration, provider) = self
            .resolve(&params.context.environment_id, &params.provider_config_key)
            .await?;

        match provider.auth_mode {
            AuthMode::Oauth2 => {
                let mut session = self.new_session(&params, &integration, &provider);
                let client_id = params
                    .client_id_override
                    .clone()
                    .or_else(|| integration.oauth_client_id.clone())
                    .unwrap_or_default();
                let uri = oauth2::build_authorize_url(
                    &provider,
                    &IntegrationConfig {
                        oauth_client_id: Some(client_id),
                        ..integration.clone()
                    },
                    &session,
                    &params.authorization_params,
                    params.user_scope.as_deref(),
                )?;
                session.connection_config.insert(
                    "_client_id_override".to_string(),
                    Value::String(params.client_id_override.clone().unwrap_or_default()),
                );
                session.connection_config.insert(
                    "_client_secret_override".to_string(),
                    Value::String(
                        params
                            .client_secret_override
                            .clone()
                            .unwrap_or_default(),
                    ),
                );
                self.sessions.create(session).await?;
                Ok(StartOutcome::Redirect(uri))
            }
            AuthMode::Oauth1 => {
                let (oauth_token, oauth_token_secret) =
                    oauth1::request_token(&self.http, &provider, &integration, &params.callback_url)
                        .await?;
                let mut session = self.new_session(&params, &integration, &provider);
                session.request_token_secret = Some(oauth_token_secret);
                let uri = oauth1::authorize_url(&provider, &oauth_token)?;
                self.sessions.create(session).await?;
                Ok(StartOutcome::Redirect(uri))
            }
            AuthMode::App | AuthMode::Custom | AuthMode::AppStore => {
                let session = self.new_session(&params, &integration, &provider);
                let uri = app::build_install_url(&provider, &integration, &session)?;
                self.sessions.create(session).await?;
                Ok(StartOutcome::Redirect(uri))
            }
            other => Err(BrokerError::new(
                ErrorCode::InvalidAuthMode,
                format!("{other:?} must be started via its dedicated endpoint, not /oauth/connect"),
            )),
        }
    }

    /// OAUTH2_CC is synchronous: caller supplies client credentials directly,
    /// no session, no redirect.
    pub async fn start_client_credentials(
        &self,
        context: RequestContext,
        provider_config_key: &str,
        connection_id: &str,
        client_id: &str,
        client_secret: &str,
        connection_config: HashMap<String, Value>,
    ) -> Result<UpsertResult, BrokerError> {
        let (integration, provider) = self
            .resolve(&context.environment_id, provider_config_key)
            .await?;
        if provider.auth_mode != AuthMode::Oauth2Cc {
            return Err(BrokerError::new(
                ErrorCode::InvalidAuthMode,
                "provider is not configured for OAUTH2_CC",
            ));
        }

        let outcome = oauth2_cc::get_token(
            &self.http,
            &provider,
            &integration,
            &connection_config,
            client_id,
            client_secret,
        )
        .await?;

        let connection = Connection {
            environment_id: context.environment_id,
            provider_config_key: provider_config_key.to_string(),
            connection_id: connection_id.to_string(),
            provider: integration.provider.clone(),
            credentials: outcome.credentials,
            connection_config,
            metadata: outcome.token_metadata,
            pending: false,
            last_auth_error: None,
            failing_since: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let result = self.connections.upsert(connection).await?;
        self.hooks
            .run(self.connections.as_ref(), &result.connection, AuthOperation::Creation, None, true)
            .await;
        Ok(result)
    }

    /// Non-redirect modes (API_KEY, BASIC, JWT, SIGNATURE, TBA, TABLEAU,
    /// BILL, TWO_STEP): a single synchronous call with an optional
    /// verification probe.
    pub async fn start_simple(
        &self,
        context: RequestContext,
        provider_config_key: &str,
        connection_id: &str,
        body: HashMap<String, Value>,
        connection_config: HashMap<String, Value>,
    ) -> Result<UpsertResult, BrokerError> {
        let (integration, provider) = self
            .resolve(&context.environment_id, provider_config_key)
            .await?;

        let outcome = simple::build_credentials(provider.auth_mode, &body)?;

        if provider.verification.is_some() {
            let auth_header = match &outcome.credentials {
                broker_types::Credentials::ApiKey { api_key } => format!("Bearer {api_key}"),
                broker_types::Credentials::Basic { username, password } => {
                    use base64::Engine as _;
                    format!(
                        "Basic {}",
                        base64::engine::general_purpose::STANDARD
                            .encode(format!("{username}:{password}"))
                    )
                }
                _ => String::new(),
            };
            self.prober.probe(&provider, &auth_header).await?;
        }

        let connection = Connection {
            environment_id: context.environment_id,
            provider_config_key: provider_config_key.to_string(),
            connection_id: connection_id.to_string(),
            provider: integration.provider.clone(),
            credentials: outcome.credentials,
            connection_config,
            metadata: outcome.token_metadata,
            pending: false,
            last_auth_error: None,
            failing_since: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let result = self.connections.upsert(connection).await?;
        self.hooks
            .run(self.connections.as_ref(), &result.connection, AuthOperation::Creation, None, true)
            .await;
        Ok(result)
    }

    /// Consumes a callback. Deletes the session before doing anything else so
    /// a replayed `state` is rejected (§8's at-most-once property).
    pub async fn finish(
        &self,
        callback_params: HashMap<String, String>,
    ) -> Result<FinishOutcome, BrokerError> {
        let state = callback_params
            .get("state")
            .ok_or_else(BrokerError::invalid_state)?;
        let session = self
            .sessions
            .find_and_delete(state)
            .await?
            .ok_or_else(BrokerError::invalid_state)?;

        if session.is_expired(chrono::Duration::seconds(SESSION_MAX_AGE_SECONDS)) {
            return Err(BrokerError::invalid_state());
        }

        let (integration, provider) = self
            .resolve(&session.environment_id, &session.provider_config_key)
            .await?;

        match session.auth_mode {
            AuthMode::Oauth2 => self.finish_oauth2(session, integration, provider, callback_params).await,
            AuthMode::Oauth1 => self.finish_oauth1(session, integration, provider, callback_params).await,
            AuthMode::App | AuthMode::Custom | AuthMode::AppStore => {
                self.finish_app(session, integration, provider, callback_params).await
            }
            other => Err(BrokerError::new(
                ErrorCode::InvalidAuthMode,
                format!("{other:?} has no callback to finish"),
            )),
        }
    }

    async fn finish_oauth2(
        &self,
        session: OAuthSession,
        integration: IntegrationConfig,
        provider: Provider,
        callback_params: HashMap<String, String>,
    ) -> Result<FinishOutcome, BrokerError> {
        let code = callback_params
            .get("code")
            .ok_or_else(|| BrokerError::new(ErrorCode::InvalidCallbackOauth2, "callback is missing 'code'"))?;

        let client_id = session
            .connection_config
            .get("_client_id_override")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| integration.oauth_client_id.clone())
            .unwrap_or_default();
        let client_secret = session
            .connection_config
            .get("_client_secret_override")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| integration.oauth_client_secret.clone())
            .unwrap_or_default();

        let outcome = oauth2::exchange_code(
            &self.http,
            &provider,
            &integration,
            &session,
            code,
            &client_id,
            &client_secret,
        )
        .await?;

        let mut connection_config = session.connection_config.clone();
        connection_config.remove("_client_id_override");
        connection_config.remove("_client_secret_override");
        for (k, v) in outcome.token_metadata {
            connection_config.insert(k, v);
        }
        for (k, v) in &callback_params {
            if k != "state" && k != "code" {
                connection_config.insert(k.clone(), Value::String(v.clone()));
            }
        }

        let pending = provider.auth_mode == AuthMode::Custom
            && app::installation_id(&callback_params).is_none();

        let connection = Connection {
            environment_id: session.environment_id,
            provider_config_key: session.provider_config_key,
            connection_id: session.connection_id,
            provider: session.provider,
            credentials: outcome.credentials,
            connection_config,
            metadata: HashMap::new(),
            pending,
            last_auth_error: None,
            failing_since: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let result = self.connections.upsert(connection).await?;
        let operation = match result.operation {
            UpsertOperation::Creation => AuthOperation::Creation,
            UpsertOperation::Update => AuthOperation::Refresh,
        };

        if pending {
            self.hooks
                .run(self.connections.as_ref(), &result.connection, operation, session.web_socket_client_id.clone(), false)
                .await;
            Ok(FinishOutcome::PendingApproval(result))
        } else {
            self.hooks
                .run(self.connections.as_ref(), &result.connection, operation, session.web_socket_client_id.clone(), true)
                .await;
            Ok(FinishOutcome::Connected(result))
        }
    }

    async fn finish_oauth1(
        &self,
        session: OAuthSession,
        integration: IntegrationConfig,
        provider: Provider,
        callback_params: HashMap<String, String>,
    ) -> Result<FinishOutcome, BrokerError> {
        let oauth_token = callback_params.get("oauth_token").ok_or_else(|| {
            BrokerError::new(ErrorCode::InvalidCallbackOauth1, "callback is missing 'oauth_token'")
        })?;
        let oauth_verifier = callback_params.get("oauth_verifier").ok_or_else(|| {
            BrokerError::new(ErrorCode::InvalidCallbackOauth1, "callback is missing 'oauth_verifier'")
        })?;
        let token_secret = session.request_token_secret.as_deref().ok_or_else(|| {
            BrokerError::new(ErrorCode::InvalidCallbackOauth1, "session has no request token secret")
        })?;

        let outcome = oauth1::access_token(
            &self.http,
            &provider,
            &integration,
            oauth_token,
            token_secret,
            oauth_verifier,
        )
        .await?;

        let connection = Connection {
            environment_id: session.environment_id,
            provider_config_key: session.provider_config_key,
            connection_id: session.connection_id,
            provider: session.provider,
            credentials: outcome.credentials,
            connection_config: session.connection_config,
            metadata: HashMap::new(),
            pending: false,
            last_auth_error: None,
            failing_since: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let result = self.connections.upsert(connection).await?;
        self.hooks
            .run(self.connections.as_ref(), &result.connection, AuthOperation::Creation, session.web_socket_client_id, true)
            .await;
        Ok(FinishOutcome::Connected(result))
    }

    async fn finish_app(
        &self,
        session: OAuthSession,
        integration: IntegrationConfig,
        provider: Provider,
        callback_params: HashMap<String, String>,
    ) -> Result<FinishOutcome, BrokerError> {
        let _ = &integration;

        if app::is_setup_update(&callback_params) {
            if let Some(referer) = session
                .connection_config
                .get("referer")
                .and_then(Value::as_str)
            {
                return Ok(FinishOutcome::RedirectTo(referer.to_string()));
            }
        }

        let installation_id = app::installation_id(&callback_params).cloned();
        let pending = installation_id.is_none();

        let mut fields: HashMap<String, Value> = callback_params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        if let Some(id) = &installation_id {
            fields.insert("installation_id".to_string(), Value::String(id.clone()));
        }

        let _ = provider.auth_mode;
        let credentials = broker_types::Credentials::AppStore { fields };

        let connection = Connection {
            environment_id: session.environment_id,
            provider_config_key: session.provider_config_key,
            connection_id: session.connection_id,
            provider: session.provider,
            credentials,
            connection_config: session.connection_config,
            metadata: HashMap::new(),
            pending,
            last_auth_error: None,
            failing_since: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let result = self.connections.upsert(connection).await?;
        let operation = match result.operation {
            UpsertOperation::Creation => AuthOperation::Creation,
            UpsertOperation::Update => AuthOperation::Refresh,
        };
        self.hooks
            .run(self.connections.as_ref(), &result.connection, operation, session.web_socket_client_id, !pending)
            .await;

        if pending {
            Ok(FinishOutcome::PendingApproval(result))
        } else {
            Ok(FinishOutcome::Connected(result))
        }
    }

    /// Returns fresh credentials for a connection, refreshing first if they
    /// are due. Used by proxy calls and scheduled syncs.
    pub async fn get_fresh_credentials(
        &self,
        environment_id: &str,
        provider_config_key: &str,
        connection_id: &str,
    ) -> Result<broker_types::Credentials, BrokerError> {
        let connection = self
            .connections
            .get(environment_id, provider_config_key, connection_id)
            .await?
            .ok_or_else(|| BrokerError::missing_connection(connection_id))?;
        let (integration, provider) = self.resolve(environment_id, provider_config_key).await?;

        self.refresh
            .get_fresh_credentials(
                self.connections.as_ref(),
                &self.hooks,
                &provider,
                &integration,
                &connection,
                DEFAULT_SKEW_SECONDS,
            )
            .await
    }
}
