pub mod diesel_store;
pub mod models;
pub mod pool;
pub mod registry;
pub mod schema;

#[cfg(feature = "sqlite")]
pub use diesel_store::sqlite::{SqliteConnectionStore, SqliteSessionStore};

#[cfg(all(not(feature = "sqlite"), feature = "postgres"))]
pub use diesel_store::postgres::{PgConnectionStore, PgSessionStore};

pub use registry::YamlProviderRegistry;
