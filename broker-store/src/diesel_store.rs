use std::collections::HashMap;

use async_trait::async_trait;
use broker_types::error::{BrokerError, ErrorCode};
use broker_types::provider::AuthMode;
use broker_types::{Connection, OAuthSession, SessionStore, UpsertOperation, UpsertResult};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde_json::Value as JsonValue;

use crate::models::{
    ConnectionModel, NewConnectionModel, NewOAuthSessionModel, OAuthSessionModel,
};
use crate::schema::{connections, oauth_sessions};

fn store_err(context: &str, err: impl std::fmt::Display) -> BrokerError {
    BrokerError::new(ErrorCode::UnknownError, format!("{context}: {err}"))
}

fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
    dt.naive_utc()
}

fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&dt)
}

fn to_naive_opt(dt: Option<DateTime<Utc>>) -> Option<NaiveDateTime> {
    dt.map(to_naive)
}

fn from_naive_opt(dt: Option<NaiveDateTime>) -> Option<DateTime<Utc>> {
    dt.map(from_naive)
}

fn json_map_to_string(map: &HashMap<String, JsonValue>) -> Result<String, BrokerError> {
    serde_json::to_string(map).map_err(|err| store_err("failed to serialize json map", err))
}

fn json_map_from_str(value: &str) -> HashMap<String, JsonValue> {
    serde_json::from_str(value).unwrap_or_default()
}

fn session_to_new_model<'a>(
    session: &'a OAuthSession,
    connection_config: &'a str,
) -> NewOAuthSessionModel<'a> {
    NewOAuthSessionModel {
        id: &session.id,
        environment_id: &session.environment_id,
        provider_config_key: &session.provider_config_key,
        provider: &session.provider,
        auth_mode: session.auth_mode.as_str(),
        connection_id: &session.connection_id,
        callback_url: &session.callback_url,
        code_verifier: session.code_verifier.as_deref(),
        connection_config,
        web_socket_client_id: session.web_socket_client_id.as_deref(),
        activity_log_id: &session.activity_log_id,
        request_token_secret: session.request_token_secret.as_deref(),
        created_at: to_naive(session.created_at),
    }
}

fn model_to_session(model: OAuthSessionModel) -> Result<OAuthSession, BrokerError> {
    let auth_mode = AuthMode::from_str_value(&model.auth_mode)
        .ok_or_else(|| store_err("failed to parse stored auth_mode", &model.auth_mode))?;
    Ok(OAuthSession {
        id: model.id,
        environment_id: model.environment_id,
        provider_config_key: model.provider_config_key,
        provider: model.provider,
        auth_mode,
        connection_id: model.connection_id,
        callback_url: model.callback_url,
        code_verifier: model.code_verifier,
        connection_config: json_map_from_str(&model.connection_config),
        web_socket_client_id: model.web_socket_client_id,
        activity_log_id: model.activity_log_id,
        request_token_secret: model.request_token_secret,
        created_at: from_naive(model.created_at),
    })
}

fn model_to_connection(model: ConnectionModel) -> Result<Connection, BrokerError> {
    Ok(Connection {
        environment_id: model.environment_id,
        provider_config_key: model.provider_config_key,
        connection_id: model.connection_id,
        provider: model.provider,
        credentials: serde_json::from_str(&model.credentials)
            .map_err(|err| store_err("failed to deserialize stored credentials", err))?,
        connection_config: json_map_from_str(&model.connection_config),
        metadata: json_map_from_str(&model.metadata),
        pending: model.pending,
        last_auth_error: model.last_auth_error,
        failing_since: from_naive_opt(model.failing_since),
        created_at: from_naive(model.created_at),
        updated_at: from_naive(model.updated_at),
    })
}

/// SQLite-backed `SessionStore`/`ConnectionStore`, suitable for a single
/// broker instance. `find_and_delete` is expressed as one statement so a
/// concurrent caller racing on the same `id` sees at most one row returned.
#[cfg(feature = "sqlite")]
pub mod sqlite {
    use super::*;
    use crate::pool::{SqlitePool, sqlite_pool};
    use broker_types::ConnectionStore;

    #[derive(Clone)]
    pub struct SqliteSessionStore {
        pool: SqlitePool,
    }

    impl SqliteSessionStore {
        pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
            Ok(Self {
                pool: sqlite_pool(database_url, max_connections).await?,
            })
        }

        pub fn from_pool(pool: SqlitePool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl SessionStore for SqliteSessionStore {
        async fn create(&self, session: OAuthSession) -> Result<(), BrokerError> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| store_err("failed to acquire sqlite connection", err))?;
            let connection_config = json_map_to_string(&session.connection_config)?;
            let new_model = session_to_new_model(&session, &connection_config);

            diesel::insert_into(oauth_sessions::table)
                .values(&new_model)
                .execute(&mut conn)
                .await
                .map_err(|err| store_err("failed to insert oauth session", err))?;
            Ok(())
        }

        async fn find_and_delete(&self, id: &str) -> Result<Option<OAuthSession>, BrokerError> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| store_err("failed to acquire sqlite connection", err))?;

            let model = oauth_sessions::table
                .find(id)
                .first::<OAuthSessionModel>(&mut conn)
                .await
                .optional()
                .map_err(|err| store_err("failed to query oauth session", err))?;

            let Some(model) = model else {
                return Ok(None);
            };

            let deleted = diesel::delete(oauth_sessions::table.find(id))
                .execute(&mut conn)
                .await
                .map_err(|err| store_err("failed to delete oauth session", err))?;

            // Another caller won the race between our SELECT and DELETE.
            if deleted == 0 {
                return Ok(None);
            }

            model_to_session(model).map(Some)
        }

        async fn sweep_expired(&self, max_age: chrono::Duration) -> Result<usize, BrokerError> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| store_err("failed to acquire sqlite connection", err))?;
            let cutoff = to_naive(Utc::now() - max_age);
            let deleted = diesel::delete(oauth_sessions::table.filter(oauth_sessions::created_at.lt(cutoff)))
                .execute(&mut conn)
                .await
                .map_err(|err| store_err("failed to sweep expired oauth sessions", err))?;
            Ok(deleted)
        }
    }

    #[derive(Clone)]
    pub struct SqliteConnectionStore {
        pool: SqlitePool,
    }

    impl SqliteConnectionStore {
        pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
            Ok(Self {
                pool: sqlite_pool(database_url, max_connections).await?,
            })
        }

        pub fn from_pool(pool: SqlitePool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl ConnectionStore for SqliteConnectionStore {
        async fn upsert(&self, connection: Connection) -> Result<UpsertResult, BrokerError> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| store_err("failed to acquire sqlite connection", err))?;

            let existing = connections::table
                .filter(connections::environment_id.eq(&connection.environment_id))
                .filter(connections::provider_config_key.eq(&connection.provider_config_key))
                .filter(connections::connection_id.eq(&connection.connection_id))
                .first::<ConnectionModel>(&mut conn)
                .await
                .optional()
                .map_err(|err| store_err("failed to query connection", err))?;

            let operation = if existing.is_some() {
                UpsertOperation::Update
            } else {
                UpsertOperation::Creation
            };

            let created_at = existing
                .as_ref()
                .map(|row| row.created_at)
                .unwrap_or_else(|| to_naive(connection.created_at));
            let updated_at = to_naive(Utc::now());

            let credentials = serde_json::to_string(&connection.credentials)
                .map_err(|err| store_err("failed to serialize credentials", err))?;
            let connection_config = json_map_to_string(&connection.connection_config)?;
            let metadata = json_map_to_string(&connection.metadata)?;

            let new_model = NewConnectionModel {
                environment_id: &connection.environment_id,
                provider_config_key: &connection.provider_config_key,
                connection_id: &connection.connection_id,
                provider: &connection.provider,
                credentials: &credentials,
                connection_config: &connection_config,
                metadata: &metadata,
                pending: connection.pending,
                last_auth_error: connection.last_auth_error.as_deref(),
                failing_since: to_naive_opt(connection.failing_since),
                created_at,
                updated_at,
            };

            diesel::insert_into(connections::table)
                .values(&new_model)
                .on_conflict((
                    connections::environment_id,
                    connections::provider_config_key,
                    connections::connection_id,
                ))
                .do_update()
                .set(&new_model)
                .execute(&mut conn)
                .await
                .map_err(|err| store_err("failed to upsert connection", err))?;

            let mut stored = connection;
            stored.created_at = from_naive(created_at);
            stored.updated_at = from_naive(updated_at);

            Ok(UpsertResult {
                connection: stored,
                operation,
            })
        }

        async fn get(
            &self,
            environment_id: &str,
            provider_config_key: &str,
            connection_id: &str,
        ) -> Result<Option<Connection>, BrokerError> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| store_err("failed to acquire sqlite connection", err))?;

            let model = connections::table
                .filter(connections::environment_id.eq(environment_id))
                .filter(connections::provider_config_key.eq(provider_config_key))
                .filter(connections::connection_id.eq(connection_id))
                .first::<ConnectionModel>(&mut conn)
                .await
                .optional()
                .map_err(|err| store_err("failed to query connection", err))?;

            model.map(model_to_connection).transpose()
        }

        async fn delete(
            &self,
            environment_id: &str,
            provider_config_key: &str,
            connection_id: &str,
        ) -> Result<(), BrokerError> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| store_err("failed to acquire sqlite connection", err))?;

            diesel::delete(
                connections::table
                    .filter(connections::environment_id.eq(environment_id))
                    .filter(connections::provider_config_key.eq(provider_config_key))
                    .filter(connections::connection_id.eq(connection_id)),
            )
            .execute(&mut conn)
            .await
            .map_err(|err| store_err("failed to delete connection", err))?;
            Ok(())
        }

        async fn list(
            &self,
            environment_id: &str,
            provider_config_key: &str,
        ) -> Result<Vec<Connection>, BrokerError> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| store_err("failed to acquire sqlite connection", err))?;

            let rows = connections::table
                .filter(connections::environment_id.eq(environment_id))
                .filter(connections::provider_config_key.eq(provider_config_key))
                .load::<ConnectionModel>(&mut conn)
                .await
                .map_err(|err| store_err("failed to list connections", err))?;

            rows.into_iter().map(model_to_connection).collect()
        }
    }
}

/// Postgres-backed mirror of [`sqlite`], used in multi-replica deployments
/// where `find_and_delete`'s SELECT-then-DELETE still holds at most one
/// winner because both statements run against the same row inside one
/// pooled connection's request, and Postgres's MVCC guarantees the loser's
/// DELETE affects zero rows once the winner's has committed.
#[cfg(all(not(feature = "sqlite"), feature = "postgres"))]
pub mod postgres {
    use super::*;
    use crate::pool::{PgPool, postgres_pool};
    use broker_types::ConnectionStore;

    #[derive(Clone)]
    pub struct PgSessionStore {
        pool: PgPool,
    }

    impl PgSessionStore {
        pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
            Ok(Self {
                pool: postgres_pool(database_url, max_connections).await?,
            })
        }

        pub fn from_pool(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl SessionStore for PgSessionStore {
        async fn create(&self, session: OAuthSession) -> Result<(), BrokerError> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| store_err("failed to acquire postgres connection", err))?;
            let connection_config = json_map_to_string(&session.connection_config)?;
            let new_model = session_to_new_model(&session, &connection_config);

            diesel::insert_into(oauth_sessions::table)
                .values(&new_model)
                .execute(&mut conn)
                .await
                .map_err(|err| store_err("failed to insert oauth session", err))?;
            Ok(())
        }

        async fn find_and_delete(&self, id: &str) -> Result<Option<OAuthSession>, BrokerError> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| store_err("failed to acquire postgres connection", err))?;

            let model = oauth_sessions::table
                .find(id)
                .first::<OAuthSessionModel>(&mut conn)
                .await
                .optional()
                .map_err(|err| store_err("failed to query oauth session", err))?;

            let Some(model) = model else {
                return Ok(None);
            };

            let deleted = diesel::delete(oauth_sessions::table.find(id))
                .execute(&mut conn)
                .await
                .map_err(|err| store_err("failed to delete oauth session", err))?;

            if deleted == 0 {
                return Ok(None);
            }

            model_to_session(model).map(Some)
        }

        async fn sweep_expired(&self, max_age: chrono::Duration) -> Result<usize, BrokerError> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| store_err("failed to acquire postgres connection", err))?;
            let cutoff = to_naive(Utc::now() - max_age);
            let deleted = diesel::delete(oauth_sessions::table.filter(oauth_sessions::created_at.lt(cutoff)))
                .execute(&mut conn)
                .await
                .map_err(|err| store_err("failed to sweep expired oauth sessions", err))?;
            Ok(deleted)
        }
    }

    #[derive(Clone)]
    pub struct PgConnectionStore {
        pool: PgPool,
    }

    impl PgConnectionStore {
        pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
            Ok(Self {
                pool: postgres_pool(database_url, max_connections).await?,
            })
        }

        pub fn from_pool(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl ConnectionStore for PgConnectionStore {
        async fn upsert(&self, connection: Connection) -> Result<UpsertResult, BrokerError> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| store_err("failed to acquire postgres connection", err))?;

            let existing = connections::table
                .filter(connections::environment_id.eq(&connection.environment_id))
                .filter(connections::provider_config_key.eq(&connection.provider_config_key))
                .filter(connections::connection_id.eq(&connection.connection_id))
                .first::<ConnectionModel>(&mut conn)
                .await
                .optional()
                .map_err(|err| store_err("failed to query connection", err))?;

            let operation = if existing.is_some() {
                UpsertOperation::Update
            } else {
                UpsertOperation::Creation
            };

            let created_at = existing
                .as_ref()
                .map(|row| row.created_at)
                .unwrap_or_else(|| to_naive(connection.created_at));
            let updated_at = to_naive(Utc::now());

            let credentials = serde_json::to_string(&connection.credentials)
                .map_err(|err| store_err("failed to serialize credentials", err))?;
            let connection_config = json_map_to_string(&connection.connection_config)?;
            let metadata = json_map_to_string(&connection.metadata)?;

            let new_model = NewConnectionModel {
                environment_id: &connection.environment_id,
                provider_config_key: &connection.provider_config_key,
                connection_id: &connection.connection_id,
                provider: &connection.provider,
                credentials: &credentials,
                connection_config: &connection_config,
                metadata: &metadata,
                pending: connection.pending,
                last_auth_error: connection.last_auth_error.as_deref(),
                failing_since: to_naive_opt(connection.failing_since),
                created_at,
                updated_at,
            };

            diesel::insert_into(connections::table)
                .values(&new_model)
                .on_conflict((
                    connections::environment_id,
                    connections::provider_config_key,
                    connections::connection_id,
                ))
                .do_update()
                .set(&new_model)
                .execute(&mut conn)
                .await
                .map_err(|err| store_err("failed to upsert connection", err))?;

            let mut stored = connection;
            stored.created_at = from_naive(created_at);
            stored.updated_at = from_naive(updated_at);

            Ok(UpsertResult {
                connection: stored,
                operation,
            })
        }

        async fn get(
            &self,
            environment_id: &str,
            provider_config_key: &str,
            connection_id: &str,
        ) -> Result<Option<Connection>, BrokerError> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| store_err("failed to acquire postgres connection", err))?;

            let model = connections::table
                .filter(connections::environment_id.eq(environment_id))
                .filter(connections::provider_config_key.eq(provider_config_key))
                .filter(connections::connection_id.eq(connection_id))
                .first::<ConnectionModel>(&mut conn)
                .await
                .optional()
                .map_err(|err| store_err("failed to query connection", err))?;

            model.map(model_to_connection).transpose()
        }

        async fn delete(
            &self,
            environment_id: &str,
            provider_config_key: &str,
            connection_id: &str,
        ) -> Result<(), BrokerError> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| store_err("failed to acquire postgres connection", err))?;

            diesel::delete(
                connections::table
                    .filter(connections::environment_id.eq(environment_id))
                    .filter(connections::provider_config_key.eq(provider_config_key))
                    .filter(connections::connection_id.eq(connection_id)),
            )
            .execute(&mut conn)
            .await
            .map_err(|err| store_err("failed to delete connection", err))?;
            Ok(())
        }

        async fn list(
            &self,
            environment_id: &str,
            provider_config_key: &str,
        ) -> Result<Vec<Connection>, BrokerError> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| store_err("failed to acquire postgres connection", err))?;

            let rows = connections::table
                .filter(connections::environment_id.eq(environment_id))
                .filter(connections::provider_config_key.eq(provider_config_key))
                .load::<ConnectionModel>(&mut conn)
                .await
                .map_err(|err| store_err("failed to list connections", err))?;

            rows.into_iter().map(model_to_connection).collect()
        }
    }
}
