pub mod connection;
pub mod context;
pub mod credential;
pub mod error;
pub mod hooks;
pub mod notify;
pub mod provider;
pub mod proxy;
pub mod registry;
pub mod session;

pub use connection::{Connection, ConnectionStore, SessionStore, UpsertOperation, UpsertResult};
pub use context::RequestContext;
pub use credential::{ConfigOverride, Credentials};
pub use error::{BrokerError, ErrorCode};
pub use hooks::{PostConnectionScript, SyncScheduler, WebhookSender};
pub use notify::{AuthEvent, AuthOperation, LoggingNotifier, Notifier};
pub use provider::{AuthMode, BodyFormat, IntegrationConfig, Provider, TokenRequestAuthMethod, VerificationProbe};
pub use proxy::{ProxyClient, ProxyRequest, ProxyResponse};
pub use registry::ProviderRegistry;
pub use session::{generate_code_verifier, pkce_challenge, OAuthSession};
