use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = oauth_sessions, primary_key(id))]
pub struct OAuthSessionModel {
    pub id: String,
    pub environment_id: String,
    pub provider_config_key: String,
    pub provider: String,
    pub auth_mode: String,
    pub connection_id: String,
    pub callback_url: String,
    pub code_verifier: Option<String>,
    pub connection_config: String,
    pub web_socket_client_id: Option<String>,
    pub activity_log_id: String,
    pub request_token_secret: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = oauth_sessions)]
pub struct NewOAuthSessionModel<'a> {
    pub id: &'a str,
    pub environment_id: &'a str,
    pub provider_config_key: &'a str,
    pub provider: &'a str,
    pub auth_mode: &'a str,
    pub connection_id: &'a str,
    pub callback_url: &'a str,
    pub code_verifier: Option<&'a str>,
    pub connection_config: &'a str,
    pub web_socket_client_id: Option<&'a str>,
    pub activity_log_id: &'a str,
    pub request_token_secret: Option<&'a str>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = connections, primary_key(environment_id, provider_config_key, connection_id))]
pub struct ConnectionModel {
    pub environment_id: String,
    pub provider_config_key: String,
    pub connection_id: String,
    pub provider: String,
    pub credentials: String,
    pub connection_config: String,
    pub metadata: String,
    pub pending: bool,
    pub last_auth_error: Option<String>,
    pub failing_since: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = connections)]
pub struct NewConnectionModel<'a> {
    pub environment_id: &'a str,
    pub provider_config_key: &'a str,
    pub connection_id: &'a str,
    pub provider: &'a str,
    pub credentials: &'a str,
    pub connection_config: &'a str,
    pub metadata: &'a str,
    pub pending: bool,
    pub last_auth_error: Option<&'a str>,
    pub failing_since: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
