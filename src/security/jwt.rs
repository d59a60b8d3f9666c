// [business] Entities a token is issued for and the issued-token record
use crate::db::{
    models::{Client, IssuedToken, ResourceServer, SigningAlgorithm},
    Database, StoreError,
};
use crate::error::SignError;
use crate::keygen;
use crate::security::keys::KeyManager;

// [library] JOSE kit - JSON Web Signature and JWT implementation for Rust
use josekit::{
    jws::{JwsHeader, HS256, RS256}, // [security] RSA-SHA256 and HMAC-SHA256 signature algorithms
    jwt::{self, JwtPayload},        // [security] JWT creation and parsing utilities
};

// [library] DER encoders for handing validated RSA keys to josekit
use rsa::{pkcs8::EncodePrivateKey, pkcs8::EncodePublicKey};

// [library] JSON serialization for JWT claims
use serde::{Deserialize, Serialize};
use serde_json::Value;

// [security] Constant-time equality for secrets
use subtle::ConstantTimeEq;

// [library] Time handling for token expiration and timestamps
use time::OffsetDateTime;

// [library] Structured logging
use tracing::error;

// [library] UUID generation for unique token identifiers (jti claim)
use uuid::Uuid;

// [library] Base64 encoding for JWT headers and generated secrets
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

// [security] Tolerated clock difference between this server and token consumers
const CLOCK_SKEW_SECS: i64 = 60;

// [business] Access token claims - standard registered claims only (RFC 7519)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String, // [security] Issuer - who created and signed the token
    pub aud: String, // [security] Audience - the resource server the token is for
    pub sub: String, // [business] Subject - the client_id for client_credentials
    pub iat: i64,    // [security] Issued at
    pub nbf: i64,    // [security] Not valid before
    pub exp: i64,    // [security] Expiration time
    pub jti: String, // [security] JWT ID - makes every token unique even within one second
}

impl Claims {
    pub fn new(
        issuer: &str,
        audience: &str,
        subject: &str,
        lifetime_secs: i64,
    ) -> Result<Self, SignError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let exp = now
            .checked_add(lifetime_secs)
            .ok_or(SignError::InvalidLifetime(lifetime_secs))?;
        Ok(Self {
            iss: issuer.to_string(),
            aud: audience.to_string(),
            sub: subject.to_string(),
            iat: now,
            nbf: now,
            exp,
            jti: Uuid::new_v4().to_string(),
        })
    }
}

// [library] Convert claims struct to JWT payload format
fn to_payload(claims: &Claims) -> Result<JwtPayload, SignError> {
    let payload_json =
        serde_json::to_value(claims).map_err(|e| SignError::Signing(e.to_string()))?;
    let mut payload = JwtPayload::new();
    if let Value::Object(map) = payload_json {
        for (key, value) in map {
            payload.set_claim(&key, Some(value))?;
        }
    }
    Ok(payload)
}

// [security] HS256 keys are the decoded bytes of the client secret
fn decode_secret(secret: &str) -> Result<Vec<u8>, SignError> {
    URL_SAFE_NO_PAD
        .decode(secret)
        .map_err(|_| SignError::MalformedSecret)
}

// [business] Token signing and verification service
// RS256 tokens are signed with the resource server's current key and carry its kid;
// HS256 tokens are signed with the requesting client's secret.
#[derive(Clone)]
pub struct TokenSigner {
    db: Database,
    keys: KeyManager,
    issuer: String,
}

impl TokenSigner {
    pub fn new(db: Database, keys: KeyManager, issuer: String) -> Self {
        Self { db, keys, issuer }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign `claims` for `resource_server` and record the issued token.
    pub async fn sign(
        &self,
        resource_server: &ResourceServer,
        client: &Client,
        claims: &Claims,
    ) -> Result<IssuedToken, SignError> {
        let payload = to_payload(claims)?;

        let mut header = JwsHeader::new();
        header.set_token_type("JWT");

        let access_token = match &resource_server.token_type {
            SigningAlgorithm::RS256 => {
                let key = self
                    .keys
                    .get_active_key(&SigningAlgorithm::RS256, &resource_server.audience)
                    .await?;

                // [security] Never sign with a key that fails the consistency check
                let private_key = keygen::to_rsa_private_key(&key)?;
                let der = private_key
                    .to_pkcs8_der()
                    .map_err(|e| SignError::Signing(e.to_string()))?;

                header.set_key_id(key.header.identifier.to_string());
                let signer = RS256.signer_from_der(der.as_bytes())?;
                jwt::encode_with_signer(&payload, &header, &signer)?
            }
            SigningAlgorithm::HS256 => {
                let secret = decode_secret(&client.client_secret)?;
                let signer = HS256.signer_from_bytes(&secret)?;
                jwt::encode_with_signer(&payload, &header, &signer)?
            }
            SigningAlgorithm::Unsupported(name) => {
                return Err(SignError::UnsupportedAlgorithm(name.clone()))
            }
        };

        // Expiry is anchored to the claim's issue time, not a second clock read
        let expires_at = claims
            .iat
            .checked_add(client.token_lifetime)
            .ok_or(SignError::InvalidLifetime(client.token_lifetime))?;

        let issued = IssuedToken {
            subject: claims.sub.clone(),
            client_id: client.client_id.clone(),
            access_token,
            refresh_token: String::new(),
            id_token: String::new(),
            expires_in: client.token_lifetime,
            expires_at,
            scope: String::new(),
        };

        match self.db.insert_token(&issued).await {
            Ok(()) => Ok(issued),
            Err(StoreError::Conflict(_)) => Err(SignError::TokenCollision),
            Err(e) => {
                error!(client_id = %client.client_id, "Failed to record issued token: {}", e);
                Err(SignError::Storage(e))
            }
        }
    }

    /// Verify a token issued for `resource_server` and return its claims.
    ///
    /// HS256 tokens need the shared secret of the client they were issued to.
    pub async fn verify(
        &self,
        token: &str,
        resource_server: &ResourceServer,
        shared_secret: Option<&str>,
    ) -> Result<Claims, SignError> {
        let payload = match &resource_server.token_type {
            SigningAlgorithm::RS256 => {
                let kid = extract_kid_from_jwt(token)?;
                let jwk = self
                    .db
                    .find_public_key(&kid)
                    .await
                    .map_err(SignError::Storage)?
                    .ok_or_else(|| SignError::InvalidToken(format!("unknown key id {kid}")))?;

                let public_key = keygen::to_rsa_public_key(&jwk)?;
                let der = public_key
                    .to_public_key_der()
                    .map_err(|e| SignError::Signing(e.to_string()))?;
                let verifier = RS256.verifier_from_der(der.as_bytes())?;

                let (payload, _) = jwt::decode_with_verifier(token, &verifier)
                    .map_err(|e| SignError::InvalidToken(e.to_string()))?;
                payload
            }
            SigningAlgorithm::HS256 => {
                let secret = shared_secret
                    .ok_or_else(|| SignError::InvalidToken("missing shared secret".to_string()))?;
                let verifier = HS256.verifier_from_bytes(decode_secret(secret)?)?;

                let (payload, _) = jwt::decode_with_verifier(token, &verifier)
                    .map_err(|e| SignError::InvalidToken(e.to_string()))?;
                payload
            }
            SigningAlgorithm::Unsupported(name) => {
                return Err(SignError::UnsupportedAlgorithm(name.clone()))
            }
        };

        let claims: Claims = serde_json::from_value(Value::Object(payload.claims_set().clone()))
            .map_err(|e| SignError::InvalidToken(e.to_string()))?;

        self.validate_claims(&claims, &resource_server.audience)?;
        Ok(claims)
    }

    // [security] Validate critical JWT claims to ensure token authenticity and validity
    fn validate_claims(&self, claims: &Claims, audience: &str) -> Result<(), SignError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();

        if claims.iss != self.issuer {
            return Err(SignError::InvalidToken(format!(
                "invalid issuer: expected {}, got {}",
                self.issuer, claims.iss
            )));
        }

        if claims.aud != audience {
            return Err(SignError::InvalidToken(format!(
                "invalid audience: expected {}, got {}",
                audience, claims.aud
            )));
        }

        if claims.exp < now - CLOCK_SKEW_SECS {
            return Err(SignError::InvalidToken("token has expired".to_string()));
        }

        if claims.nbf > now + CLOCK_SKEW_SECS || claims.iat > now + CLOCK_SKEW_SECS {
            return Err(SignError::InvalidToken("token is not valid yet".to_string()));
        }

        Ok(())
    }
}

// [business] Extract key ID from JWT header without full token verification
// Used for key lookup before performing expensive signature verification
pub fn extract_kid_from_jwt(token: &str) -> Result<String, SignError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(SignError::InvalidToken("invalid JWT format".to_string()));
    }

    let header_json = URL_SAFE_NO_PAD
        .decode(parts[0])
        .map_err(|_| SignError::InvalidToken("invalid JWT header encoding".to_string()))?;

    let header: Value = serde_json::from_slice(&header_json)
        .map_err(|_| SignError::InvalidToken("invalid JWT header JSON".to_string()))?;

    header
        .get("kid")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| SignError::InvalidToken("missing 'kid' in JWT header".to_string()))
}

// [security] Generate cryptographically secure random token
// Used for client secrets: 32 bytes (256 bits), base64url without padding
pub fn generate_random_token() -> String {
    use rand::Rng;

    let random_bytes: [u8; 32] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

// [business] Public client identifier: 18 random bytes, 24 URL-safe characters
pub fn generate_client_id() -> String {
    use rand::Rng;

    let random_bytes: [u8; 18] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

// [security] Equality that does not short-circuit on the first differing byte
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        models::{GrantType, Header, DEFAULT_TOKEN_LIFETIME},
        MemoryStore, TokenStore,
    };
    use crate::security::keys::KeyPolicy;
    use std::sync::Arc;

    const ISSUER: &str = "https://id.example.test";

    fn create_test_client() -> Client {
        let client_id = generate_client_id();
        Client {
            header: Header::new(&client_id),
            name: "Reporting job".to_string(),
            is_public: false,
            client_id,
            client_secret: generate_random_token(),
            redirect_uri: String::new(),
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
            grant_types: vec![GrantType::ClientCredentials],
            allowed_audiences: vec!["billing".to_string()],
        }
    }

    fn create_test_server(token_type: SigningAlgorithm) -> ResourceServer {
        ResourceServer {
            header: Header::new("billing"),
            name: "Billing API".to_string(),
            audience: "billing".to_string(),
            token_type,
            enforce_rbac: false,
        }
    }

    fn test_signer() -> (Arc<MemoryStore>, KeyManager, TokenSigner) {
        let store = Arc::new(MemoryStore::new());
        let keys = KeyManager::new(
            store.clone(),
            KeyPolicy {
                rsa_bits: 2048,
                max_retained: 1,
            },
        );
        let signer = TokenSigner::new(store.clone(), keys.clone(), ISSUER.to_string());
        (store, keys, signer)
    }

    #[test]
    fn test_generate_random_token() {
        let token1 = generate_random_token();
        let token2 = generate_random_token();

        assert_ne!(token1, token2);
        // [library] Base64 encoding of 32 bytes without padding is 43 characters
        assert_eq!(token1.len(), 43);
        assert_eq!(generate_client_id().len(), 24);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret-but-longer"));
        assert!(!constant_time_eq(b"", b"secret"));
    }

    #[test]
    fn test_extract_kid_rejects_malformed_tokens() {
        assert!(extract_kid_from_jwt("not-a-jwt").is_err());
        assert!(extract_kid_from_jwt("a.b").is_err());
        assert!(extract_kid_from_jwt("!!!.b.c").is_err());
    }

    #[tokio::test]
    async fn test_rs256_token_carries_kid_and_verifies() {
        let (store, keys, signer) = test_signer();
        let key = keys
            .activate_key(&SigningAlgorithm::RS256, "billing")
            .await
            .unwrap();

        let client = create_test_client();
        let server = create_test_server(SigningAlgorithm::RS256);
        let claims = Claims::new(ISSUER, "billing", &client.client_id, 3600).unwrap();

        let issued = signer.sign(&server, &client, &claims).await.unwrap();
        assert_eq!(issued.expires_in, client.token_lifetime);
        assert_eq!(issued.subject, client.client_id);
        assert!(issued.refresh_token.is_empty());
        assert!(store.find_token(&issued.access_token).await.unwrap().is_some());

        assert_eq!(
            extract_kid_from_jwt(&issued.access_token).unwrap(),
            key.header.identifier.to_string()
        );

        let verified = signer.verify(&issued.access_token, &server, None).await.unwrap();
        assert_eq!(verified, claims);
    }

    #[tokio::test]
    async fn test_rs256_without_current_key_fails() {
        let (store, _keys, signer) = test_signer();
        let client = create_test_client();
        let server = create_test_server(SigningAlgorithm::RS256);
        let claims = Claims::new(ISSUER, "billing", &client.client_id, 3600).unwrap();

        assert!(matches!(
            signer.sign(&server, &client, &claims).await,
            Err(SignError::Key(crate::error::KeyError::KeyNotFound { .. }))
        ));
        assert_eq!(store.token_count(), 0);
    }

    #[tokio::test]
    async fn test_hs256_token_uses_client_secret() {
        let (_store, _keys, signer) = test_signer();
        let client = create_test_client();
        let server = create_test_server(SigningAlgorithm::HS256);
        let claims = Claims::new(ISSUER, "billing", &client.client_id, 3600).unwrap();

        let issued = signer.sign(&server, &client, &claims).await.unwrap();
        assert!(extract_kid_from_jwt(&issued.access_token).is_err());

        let verified = signer
            .verify(&issued.access_token, &server, Some(&client.client_secret))
            .await
            .unwrap();
        assert_eq!(verified.sub, client.client_id);

        let other = create_test_client();
        assert!(matches!(
            signer
                .verify(&issued.access_token, &server, Some(&other.client_secret))
                .await,
            Err(SignError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_algorithm_is_rejected() {
        let (store, _keys, signer) = test_signer();
        let client = create_test_client();
        let server = create_test_server(SigningAlgorithm::from("ES256"));
        let claims = Claims::new(ISSUER, "billing", &client.client_id, 3600).unwrap();

        assert!(matches!(
            signer.sign(&server, &client, &claims).await,
            Err(SignError::UnsupportedAlgorithm(name)) if name == "ES256"
        ));
        assert_eq!(store.token_count(), 0);
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_audience_and_expired_tokens() {
        let (_store, keys, signer) = test_signer();
        keys.activate_key(&SigningAlgorithm::RS256, "billing")
            .await
            .unwrap();
        let client = create_test_client();
        let server = create_test_server(SigningAlgorithm::RS256);

        let mut claims = Claims::new(ISSUER, "reporting", &client.client_id, 3600).unwrap();
        let issued = signer.sign(&server, &client, &claims).await.unwrap();
        assert!(matches!(
            signer.verify(&issued.access_token, &server, None).await,
            Err(SignError::InvalidToken(_))
        ));

        claims = Claims::new(ISSUER, "billing", &client.client_id, -3600).unwrap();
        let issued = signer.sign(&server, &client, &claims).await.unwrap();
        assert!(matches!(
            signer.verify(&issued.access_token, &server, None).await,
            Err(SignError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_access_token_is_a_collision() {
        let (store, _keys, signer) = test_signer();
        let client = create_test_client();
        let server = create_test_server(SigningAlgorithm::HS256);

        // HS256 over identical claims (same jti and iat) yields an identical token
        let claims = Claims::new(ISSUER, "billing", &client.client_id, 3600).unwrap();
        let first = signer.sign(&server, &client, &claims).await.unwrap();

        let err = signer.sign(&server, &client, &claims).await.unwrap_err();
        assert!(matches!(err, SignError::TokenCollision));
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
        assert_eq!(store.token_count(), 1);
        assert!(store.find_token(&first.access_token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expiry_is_anchored_to_issue_time() {
        let (_store, _keys, signer) = test_signer();
        let client = create_test_client();
        let server = create_test_server(SigningAlgorithm::HS256);

        let claims = Claims::new(ISSUER, "billing", &client.client_id, 3600).unwrap();
        let issued = signer.sign(&server, &client, &claims).await.unwrap();
        assert_eq!(issued.expires_at, claims.iat + client.token_lifetime);
    }

    #[test]
    fn test_overflowing_lifetime_is_rejected() {
        assert!(matches!(
            Claims::new(ISSUER, "billing", "client", i64::MAX),
            Err(SignError::InvalidLifetime(i64::MAX))
        ));
    }
}
