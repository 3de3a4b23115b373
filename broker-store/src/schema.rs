#![allow(clippy::all)]

pub mod types {
    pub type Jsonb = diesel::sql_types::Text;
}

diesel::table! {
    use diesel::sql_types::*;
    use crate::schema::types::Jsonb;

    oauth_sessions (id) {
        id -> Text,
        environment_id -> Text,
        provider_config_key -> Text,
        provider -> Text,
        auth_mode -> Text,
        connection_id -> Text,
        callback_url -> Text,
        code_verifier -> Nullable<Text>,
        connection_config -> Jsonb,
        web_socket_client_id -> Nullable<Text>,
        activity_log_id -> Text,
        request_token_secret -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    use diesel::sql_types::*;
    use crate::schema::types::Jsonb;

    connections (environment_id, provider_config_key, connection_id) {
        environment_id -> Text,
        provider_config_key -> Text,
        connection_id -> Text,
        provider -> Text,
        credentials -> Jsonb,
        connection_config -> Jsonb,
        metadata -> Jsonb,
        pending -> Bool,
        last_auth_error -> Nullable<Text>,
        failing_since -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::allow_tables_to_appear_in_same_query!(oauth_sessions, connections,);
