use crate::db::models::{JsonWebKeySet, OAuthError};
use crate::security::KeyManager;
use axum::{extract::State, http::StatusCode, response::Json};
use tracing::{error, info};

/// GET /.well-known/jwks.json
/// Returns every published RS256 public key, including retained predecessors of the current keys
pub async fn jwks_handler(
    State(keys): State<KeyManager>,
) -> Result<Json<JsonWebKeySet>, (StatusCode, Json<OAuthError>)> {
    match keys.public_key_set().await {
        Ok(jwks) => {
            info!("Returning JWKS with {} keys", jwks.keys.len());
            Ok(Json(jwks))
        }
        Err(e) => {
            error!("Failed to get JWKS: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(OAuthError::new("server_error").with_description("Failed to retrieve keys")),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{models::SigningAlgorithm, MemoryStore};
    use crate::security::KeyPolicy;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_jwks_response_structure() {
        let keys = KeyManager::new(
            Arc::new(MemoryStore::new()),
            KeyPolicy {
                rsa_bits: 2048,
                max_retained: 1,
            },
        );
        keys.activate_key(&SigningAlgorithm::RS256, "billing")
            .await
            .unwrap();

        let Json(jwks) = jwks_handler(State(keys)).await.unwrap();
        let json = serde_json::to_value(&jwks).expect("Failed to serialize JWKS");

        let key = &json["keys"][0];
        assert_eq!(key["kty"], "RSA");
        assert_eq!(key["use"], "sig");
        assert_eq!(key["alg"], "RS256");
        assert_eq!(key["e"], "AQAB");
        assert!(key["n"].as_str().is_some_and(|n| !n.is_empty()));
        assert!(key.get("key_material").is_none());
    }
}
