// [rust] Module declarations - organize storage-related functionality
pub mod memory; // In-process store used for development and tests
pub mod models; // Data structures representing persisted entities and API responses
pub mod postgres; // PostgreSQL store

// [rust] Re-export models so callers can import from db:: instead of db::models::
pub use models::*;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Internal(String),
}

/// Registered OAuth2 clients, keyed by `client_id`.
#[async_trait]
pub trait ClientStore: Send + Sync + 'static {
    async fn insert_client(&self, client: &Client) -> Result<(), StoreError>;

    async fn find_client(&self, client_id: &str) -> Result<Option<Client>, StoreError>;

    /// Returns false when no client with that `client_id` exists.
    async fn update_client(&self, client: &Client) -> Result<bool, StoreError>;

    async fn delete_client(&self, client_id: &str) -> Result<bool, StoreError>;
}

/// Resource servers, keyed by audience.
#[async_trait]
pub trait ResourceServerStore: Send + Sync + 'static {
    async fn insert_resource_server(&self, server: &ResourceServer) -> Result<(), StoreError>;

    async fn find_resource_server(&self, audience: &str) -> Result<Option<ResourceServer>, StoreError>;

    async fn update_resource_server(&self, server: &ResourceServer) -> Result<bool, StoreError>;

    async fn delete_resource_server(&self, audience: &str) -> Result<bool, StoreError>;
}

/// Private signing keys and their published JWK halves.
#[async_trait]
pub trait KeyStore: Send + Sync + 'static {
    /// Atomically clears `is_current` on every key of the new key's (algorithm, audience) pair,
    /// then stores the key and its JWK. Returns how many keys stopped being current.
    async fn swap_current_key(
        &self,
        key: &PrivateSigningKey,
        jwk: &PublicJwk,
    ) -> Result<u64, StoreError>;

    async fn find_current_key(
        &self,
        algorithm: &SigningAlgorithm,
        audience: &str,
    ) -> Result<Option<PrivateSigningKey>, StoreError>;

    /// All keys of the pair, newest first.
    async fn find_keys(
        &self,
        algorithm: &SigningAlgorithm,
        audience: &str,
    ) -> Result<Vec<PrivateSigningKey>, StoreError>;

    /// Clears `is_current` on every key of the pair. Returns the number of keys matched.
    async fn revoke_keys(&self, algorithm: &SigningAlgorithm, audience: &str) -> Result<u64, StoreError>;

    /// Deletes a key together with its JWK.
    async fn delete_key(&self, identifier: Uuid) -> Result<bool, StoreError>;

    async fn find_public_key(&self, kid: &str) -> Result<Option<PublicJwk>, StoreError>;

    async fn public_keys(&self) -> Result<Vec<PublicJwk>, StoreError>;
}

#[async_trait]
pub trait TokenStore: Send + Sync + 'static {
    async fn insert_token(&self, token: &IssuedToken) -> Result<(), StoreError>;

    async fn find_token(&self, access_token: &str) -> Result<Option<IssuedToken>, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn find_user(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn user_exists(&self, username: &str, email: &str) -> Result<bool, StoreError>;
}

/// Everything the server persists.
pub trait Store: ClientStore + ResourceServerStore + KeyStore + TokenStore + UserStore {}

impl<T> Store for T where T: ClientStore + ResourceServerStore + KeyStore + TokenStore + UserStore {}

// [rust] Type alias - shared handle to whichever store backs the server
// Arc enables sharing the store across multiple async tasks safely
pub type Database = Arc<dyn Store>;

// [business] Storage factory - `memory://` selects the in-process store,
// any other URL connects to Postgres and runs migrations
pub async fn connect(database_url: &str) -> Result<Database, StoreError> {
    if database_url.starts_with("memory://") {
        tracing::warn!("Using in-memory store; nothing survives a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = PgStore::connect(database_url).await?;
    Ok(Arc::new(store))
}
