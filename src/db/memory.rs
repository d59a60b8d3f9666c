//! In-process store. Every operation takes one lock, so multi-record updates such as the
//! current-key swap are atomic with respect to each other.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    models::*, ClientStore, KeyStore, ResourceServerStore, StoreError, TokenStore, UserStore,
};

#[derive(Default)]
struct Collections {
    clients: HashMap<String, Client>,
    resource_servers: HashMap<String, ResourceServer>,
    // Insertion order; the last element is the newest key.
    keys: Vec<PrivateSigningKey>,
    jwks: Vec<PublicJwk>,
    tokens: HashMap<String, IssuedToken>,
    users: HashMap<String, User>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times a store operation (e.g. `"resource_server.find"`) has been called.
    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    pub fn token_count(&self) -> usize {
        self.inner.lock().tokens.len()
    }

    fn record(&self, operation: &'static str) {
        *self.calls.lock().entry(operation).or_insert(0) += 1;
    }
}

fn same_pair(key: &PrivateSigningKey, algorithm: &SigningAlgorithm, audience: &str) -> bool {
    &key.algorithm == algorithm && key.audience == audience
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn insert_client(&self, client: &Client) -> Result<(), StoreError> {
        self.record("client.insert");
        let mut inner = self.inner.lock();
        let duplicate = inner.clients.values().any(|existing| {
            existing.client_id == client.client_id
                || existing.client_secret == client.client_secret
                || existing.header.identifier == client.header.identifier
        });
        if duplicate {
            return Err(StoreError::Conflict("client".to_string()));
        }
        inner.clients.insert(client.client_id.clone(), client.clone());
        Ok(())
    }

    async fn find_client(&self, client_id: &str) -> Result<Option<Client>, StoreError> {
        self.record("client.find");
        Ok(self.inner.lock().clients.get(client_id).cloned())
    }

    async fn update_client(&self, client: &Client) -> Result<bool, StoreError> {
        self.record("client.update");
        let mut inner = self.inner.lock();
        match inner.clients.get_mut(&client.client_id) {
            Some(existing) => {
                *existing = client.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_client(&self, client_id: &str) -> Result<bool, StoreError> {
        self.record("client.delete");
        Ok(self.inner.lock().clients.remove(client_id).is_some())
    }
}

#[async_trait]
impl ResourceServerStore for MemoryStore {
    async fn insert_resource_server(&self, server: &ResourceServer) -> Result<(), StoreError> {
        self.record("resource_server.insert");
        let mut inner = self.inner.lock();
        let duplicate = inner.resource_servers.values().any(|existing| {
            existing.audience == server.audience
                || existing.header.identifier == server.header.identifier
        });
        if duplicate {
            return Err(StoreError::Conflict("resource server".to_string()));
        }
        inner
            .resource_servers
            .insert(server.audience.clone(), server.clone());
        Ok(())
    }

    async fn find_resource_server(&self, audience: &str) -> Result<Option<ResourceServer>, StoreError> {
        self.record("resource_server.find");
        Ok(self.inner.lock().resource_servers.get(audience).cloned())
    }

    async fn update_resource_server(&self, server: &ResourceServer) -> Result<bool, StoreError> {
        self.record("resource_server.update");
        let mut inner = self.inner.lock();
        match inner.resource_servers.get_mut(&server.audience) {
            Some(existing) => {
                *existing = server.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_resource_server(&self, audience: &str) -> Result<bool, StoreError> {
        self.record("resource_server.delete");
        Ok(self.inner.lock().resource_servers.remove(audience).is_some())
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn swap_current_key(
        &self,
        key: &PrivateSigningKey,
        jwk: &PublicJwk,
    ) -> Result<u64, StoreError> {
        self.record("key.swap");
        let mut inner = self.inner.lock();
        if inner
            .keys
            .iter()
            .any(|existing| existing.header.identifier == key.header.identifier)
            || inner.jwks.iter().any(|existing| existing.kid == jwk.kid)
        {
            return Err(StoreError::Conflict("signing key".to_string()));
        }

        let mut replaced = 0;
        for existing in inner
            .keys
            .iter_mut()
            .filter(|existing| same_pair(existing, &key.algorithm, &key.audience))
        {
            if existing.is_current {
                existing.is_current = false;
                replaced += 1;
            }
        }

        let mut key = key.clone();
        key.is_current = true;
        inner.keys.push(key);
        inner.jwks.push(jwk.clone());
        Ok(replaced)
    }

    async fn find_current_key(
        &self,
        algorithm: &SigningAlgorithm,
        audience: &str,
    ) -> Result<Option<PrivateSigningKey>, StoreError> {
        self.record("key.find_current");
        Ok(self
            .inner
            .lock()
            .keys
            .iter()
            .find(|key| key.is_current && same_pair(key, algorithm, audience))
            .cloned())
    }

    async fn find_keys(
        &self,
        algorithm: &SigningAlgorithm,
        audience: &str,
    ) -> Result<Vec<PrivateSigningKey>, StoreError> {
        self.record("key.find");
        Ok(self
            .inner
            .lock()
            .keys
            .iter()
            .rev()
            .filter(|key| same_pair(key, algorithm, audience))
            .cloned()
            .collect())
    }

    async fn revoke_keys(&self, algorithm: &SigningAlgorithm, audience: &str) -> Result<u64, StoreError> {
        self.record("key.revoke");
        let mut inner = self.inner.lock();
        let mut matched = 0;
        for key in inner
            .keys
            .iter_mut()
            .filter(|key| same_pair(key, algorithm, audience))
        {
            key.is_current = false;
            matched += 1;
        }
        Ok(matched)
    }

    async fn delete_key(&self, identifier: Uuid) -> Result<bool, StoreError> {
        self.record("key.delete");
        let mut inner = self.inner.lock();
        let before = inner.keys.len();
        inner.keys.retain(|key| key.header.identifier != identifier);
        let kid = identifier.to_string();
        inner.jwks.retain(|jwk| jwk.kid != kid);
        Ok(inner.keys.len() != before)
    }

    async fn find_public_key(&self, kid: &str) -> Result<Option<PublicJwk>, StoreError> {
        self.record("jwk.find");
        Ok(self
            .inner
            .lock()
            .jwks
            .iter()
            .find(|jwk| jwk.kid == kid)
            .cloned())
    }

    async fn public_keys(&self) -> Result<Vec<PublicJwk>, StoreError> {
        self.record("jwk.list");
        Ok(self.inner.lock().jwks.clone())
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert_token(&self, token: &IssuedToken) -> Result<(), StoreError> {
        self.record("token.insert");
        let mut inner = self.inner.lock();
        if inner.tokens.contains_key(&token.access_token) {
            return Err(StoreError::Conflict("access token".to_string()));
        }
        inner
            .tokens
            .insert(token.access_token.clone(), token.clone());
        Ok(())
    }

    async fn find_token(&self, access_token: &str) -> Result<Option<IssuedToken>, StoreError> {
        self.record("token.find");
        Ok(self.inner.lock().tokens.get(access_token).cloned())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        self.record("user.insert");
        let mut inner = self.inner.lock();
        let duplicate = inner.users.values().any(|existing| {
            existing.username == user.username
                || existing.email == user.email
                || existing.header.identifier == user.header.identifier
        });
        if duplicate {
            return Err(StoreError::Conflict("user".to_string()));
        }
        inner.users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    async fn find_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.record("user.find");
        Ok(self.inner.lock().users.get(username).cloned())
    }

    async fn user_exists(&self, username: &str, email: &str) -> Result<bool, StoreError> {
        self.record("user.exists");
        Ok(self
            .inner
            .lock()
            .users
            .values()
            .any(|user| user.username == username || user.email == email))
    }
}
