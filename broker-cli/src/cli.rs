use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Tenant identifier; defaults to "default" for single-tenant setups
    #[arg(long, global = true, default_value = "default")]
    pub environment_id: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a redirect-based flow (OAUTH1, OAUTH2, APP, CUSTOM, APP_STORE)
    /// and print the authorize URL for the operator to open.
    Connect {
        provider_config_key: String,
        #[arg(long)]
        connection_id: Option<String>,
        #[arg(long)]
        callback_url: Option<String>,
    },
    /// Mint a connection directly from a client id/secret pair (OAUTH2_CC).
    ClientCredentials {
        provider_config_key: String,
        connection_id: String,
        #[arg(long)]
        client_id: String,
        #[arg(long)]
        client_secret: String,
    },
    /// Mint a connection from a non-redirect credential body (API_KEY,
    /// BASIC, JWT, SIGNATURE, TBA, TABLEAU, BILL, TWO_STEP).
    SimpleAuth {
        provider_config_key: String,
        connection_id: String,
        /// JSON object of credential fields, e.g. '{"api_key":"..."}'
        #[arg(long)]
        credentials: String,
    },
    /// Print the stored connection, or exit 1 if none exists.
    Status {
        provider_config_key: String,
        connection_id: String,
    },
    /// Force-evaluate freshness and refresh the stored credentials if due.
    Refresh {
        provider_config_key: String,
        connection_id: String,
    },
}
