use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    db::{
        models::{JsonWebKeySet, PrivateSigningKey, PublicJwk, SigningAlgorithm},
        Database,
    },
    error::KeyError,
    keygen::{self, KEY_TYPE_RSA},
};

/// Key generation and retention settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    /// RSA modulus size for newly generated keys.
    pub rsa_bits: usize,
    /// Non-current keys kept per pair after a rotation, so tokens signed shortly before the
    /// rotation still verify. Older keys and their JWKs are deleted.
    pub max_retained: usize,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            rsa_bits: 4096,
            max_retained: 3,
        }
    }
}

type KeyPair = (SigningAlgorithm, String);

/// Owns the signing-key lifecycle: activation, rotation, revocation and publication.
///
/// Mutations of one (algorithm, audience) pair are serialized through a per-pair lock,
/// and the store swaps the current key atomically, so a pair never has two current keys.
#[derive(Clone)]
pub struct KeyManager {
    db: Database,
    policy: KeyPolicy,
    locks: Arc<DashMap<KeyPair, Arc<Mutex<()>>>>,
}

fn ensure_managed(algorithm: &SigningAlgorithm) -> Result<(), KeyError> {
    match algorithm {
        SigningAlgorithm::RS256 => Ok(()),
        other => Err(KeyError::UnsupportedAlgorithm(other.to_string())),
    }
}

impl KeyManager {
    pub fn new(db: Database, policy: KeyPolicy) -> Self {
        Self {
            db,
            policy,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn pair_lock(&self, algorithm: &SigningAlgorithm, audience: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((algorithm.clone(), audience.to_string()))
            .or_default()
            .clone()
    }

    /// Generate a new RSA keypair for `audience` without persisting it.
    pub async fn generate_key(
        &self,
        audience: &str,
    ) -> Result<(PrivateSigningKey, PublicJwk), KeyError> {
        let audience = audience.to_string();
        let bits = self.policy.rsa_bits;

        tokio::task::spawn_blocking(move || keygen::generate_rsa_keypair(&audience, bits))
            .await
            .map_err(|e| KeyError::KeyGenerationFailed(e.to_string()))?
    }

    // Caller must hold the pair lock.
    async fn install_new_key(&self, audience: &str) -> Result<PrivateSigningKey, KeyError> {
        let (key, jwk) = self.generate_key(audience).await?;

        let replaced = self
            .db
            .swap_current_key(&key, &jwk)
            .await
            .map_err(|e| KeyError::KeyGenerationFailed(format!("failed to persist key: {e}")))?;

        info!(
            kid = %key.header.identifier,
            audience = %audience,
            replaced,
            "Signing key activated"
        );
        Ok(key)
    }

    /// Generate a key and make it the single current key of the pair.
    pub async fn activate_key(
        &self,
        algorithm: &SigningAlgorithm,
        audience: &str,
    ) -> Result<PrivateSigningKey, KeyError> {
        ensure_managed(algorithm)?;

        let lock = self.pair_lock(algorithm, audience);
        let _guard = lock.lock().await;

        self.install_new_key(audience).await
    }

    /// Replace the current key of an existing pair and prune old keys beyond the retention cap.
    pub async fn rotate_keys(
        &self,
        algorithm: &SigningAlgorithm,
        audience: &str,
    ) -> Result<PrivateSigningKey, KeyError> {
        ensure_managed(algorithm)?;

        let lock = self.pair_lock(algorithm, audience);
        let _guard = lock.lock().await;

        if self.db.find_keys(algorithm, audience).await?.is_empty() {
            return Err(KeyError::NoKeysToRevoke {
                algorithm: algorithm.to_string(),
                audience: audience.to_string(),
            });
        }

        let key = self.install_new_key(audience).await?;

        // The new key is already current; a failed prune only delays cleanup to the next rotation
        if let Err(err) = self.prune_retired_keys(algorithm, audience).await {
            warn!(audience = %audience, "Pruning retired signing keys failed: {}", err);
        }
        Ok(key)
    }

    async fn prune_retired_keys(
        &self,
        algorithm: &SigningAlgorithm,
        audience: &str,
    ) -> Result<(), KeyError> {
        let retired = self
            .db
            .find_keys(algorithm, audience)
            .await?
            .into_iter()
            .filter(|key| !key.is_current)
            .skip(self.policy.max_retained);

        for key in retired {
            if self.db.delete_key(key.header.identifier).await? {
                info!(kid = %key.header.identifier, audience = %audience, "Retired signing key deleted");
            }
        }
        Ok(())
    }

    /// Mark every key of the pair as not current. Nothing will sign for the pair afterwards.
    pub async fn revoke_all(
        &self,
        algorithm: &SigningAlgorithm,
        audience: &str,
    ) -> Result<u64, KeyError> {
        let lock = self.pair_lock(algorithm, audience);
        let _guard = lock.lock().await;

        let matched = self.db.revoke_keys(algorithm, audience).await?;
        if matched == 0 {
            return Err(KeyError::NoKeysToRevoke {
                algorithm: algorithm.to_string(),
                audience: audience.to_string(),
            });
        }

        warn!(audience = %audience, matched, "All signing keys revoked");
        Ok(matched)
    }

    pub async fn get_active_key(
        &self,
        algorithm: &SigningAlgorithm,
        audience: &str,
    ) -> Result<PrivateSigningKey, KeyError> {
        match self.db.find_current_key(algorithm, audience).await? {
            Some(key) => Ok(key),
            None => {
                // A resource server without a current key was never provisioned or was revoked
                error!(
                    algorithm = %algorithm,
                    audience = %audience,
                    "No current signing key; tokens cannot be issued for this audience"
                );
                Err(KeyError::KeyNotFound {
                    algorithm: algorithm.to_string(),
                    audience: audience.to_string(),
                })
            }
        }
    }

    /// Published key set: every stored asymmetric public key, current or retained.
    pub async fn public_key_set(&self) -> Result<JsonWebKeySet, KeyError> {
        let keys = self
            .db
            .public_keys()
            .await?
            .into_iter()
            .filter(|jwk| {
                jwk.kty == KEY_TYPE_RSA && !SigningAlgorithm::from(jwk.alg.as_str()).is_symmetric()
            })
            .collect();

        Ok(JsonWebKeySet { keys })
    }
}
