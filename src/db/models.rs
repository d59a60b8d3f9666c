// [library] Serde - JSON serialization/deserialization framework for Rust
// Serialize: convert Rust structs to JSON for API responses and stored documents
// Deserialize: parse JSON/form data into Rust structs
use serde::{Deserialize, Serialize};

use std::{collections::BTreeMap, fmt, str::FromStr};

// [library] Time handling - every persisted timestamp is a unix timestamp in seconds
use time::OffsetDateTime;

// [library] UUID support - v5 identifiers are derived deterministically from a basis string
use uuid::Uuid;

use crate::security::password::HashParams;

/// Token lifetime applied to clients registered without an explicit one (24 hours).
pub const DEFAULT_TOKEN_LIFETIME: i64 = 86_400;
// [security] Upper bound on access token lifetime: one year
pub const MAX_TOKEN_LIFETIME: i64 = 365 * 86_400;

// [business] Shared identity/metadata block attached to every persisted entity
// The identifier is derived from a basis unique to the entity (client_id, audience, key modulus),
// so creating the same entity twice yields the same identifier and trips the unique index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub identifier: Uuid, // [business] Immutable after creation
    pub created_at: i64,
    pub updated_at: i64,
    pub accessed_at: i64,
    pub tags: BTreeMap<String, String>, // [business] Free-form labels, no security meaning
}

impl Header {
    pub fn new(basis: &str) -> Self {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Self {
            identifier: identifier_for(basis),
            created_at: now,
            updated_at: now,
            accessed_at: now,
            tags: BTreeMap::new(),
        }
    }

    /// Marks the entity as modified.
    pub fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc().unix_timestamp();
    }
}

/// Deterministic identifier for a basis string (UUID v5 in the OID namespace).
pub fn identifier_for(basis: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, basis.as_bytes())
}

// [business] OAuth2 grant types a client may be allowed to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    ClientCredentials,
    AuthorizationCode,
    RefreshToken,
    Password,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::ClientCredentials => "client_credentials",
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
            GrantType::Password => "password",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized grant type: {0}")]
pub struct UnknownGrantType(pub String);

impl FromStr for GrantType {
    type Err = UnknownGrantType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "client_credentials" => Ok(GrantType::ClientCredentials),
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "refresh_token" => Ok(GrantType::RefreshToken),
            "password" => Ok(GrantType::Password),
            other => Err(UnknownGrantType(other.to_string())),
        }
    }
}

// [security] Signing algorithm of a resource server's tokens
// Stored as its wire string; anything unrecognized is kept as `Unsupported` so that signing
// fails closed instead of falling through to a default algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SigningAlgorithm {
    RS256,
    HS256,
    Unsupported(String),
}

impl SigningAlgorithm {
    pub fn as_str(&self) -> &str {
        match self {
            SigningAlgorithm::RS256 => "RS256",
            SigningAlgorithm::HS256 => "HS256",
            SigningAlgorithm::Unsupported(name) => name,
        }
    }

    /// Symmetric algorithms sign with a shared secret that must never be published.
    pub fn is_symmetric(&self) -> bool {
        self.as_str().starts_with("HS")
    }
}

impl From<String> for SigningAlgorithm {
    fn from(value: String) -> Self {
        match value.as_str() {
            "RS256" => SigningAlgorithm::RS256,
            "HS256" => SigningAlgorithm::HS256,
            _ => SigningAlgorithm::Unsupported(value),
        }
    }
}

impl From<&str> for SigningAlgorithm {
    fn from(value: &str) -> Self {
        SigningAlgorithm::from(value.to_string())
    }
}

impl From<SigningAlgorithm> for String {
    fn from(value: SigningAlgorithm) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// [business] OAuth2 application/client entity - a registered actor requesting tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub header: Header,
    pub name: String,
    pub is_public: bool, // [security] Public clients cannot use the client_credentials grant
    pub client_id: String, // [business] Unique, cryptographically random public identifier
    pub client_secret: String, // [security] Unique, high-entropy, base64url encoded
    pub redirect_uri: String,
    pub token_lifetime: i64, // [business] Access token lifetime in seconds
    pub grant_types: Vec<GrantType>, // [security] Grants this client may use
    pub allowed_audiences: Vec<String>, // [security] Resource servers this client may target
}

impl Client {
    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.grant_types.contains(&grant)
    }

    pub fn allows_audience(&self, audience: &str) -> bool {
        self.allowed_audiences.iter().any(|allowed| allowed == audience)
    }
}

// [business] Resource server (API) entity - what a token grants access to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceServer {
    pub header: Header,
    pub name: String,
    pub audience: String, // [security] Unique; becomes the `aud` claim
    pub token_type: SigningAlgorithm,
    pub enforce_rbac: bool, // [business] Reserved for scope/role enforcement
}

// [security] Private half of an asymmetric signing key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateSigningKey {
    pub header: Header,
    pub algorithm: SigningAlgorithm,
    pub key_material: String, // [security] Base64 encoded PKCS#8 DER
    pub size: u32,            // [security] Modulus size in bits
    pub is_current: bool,     // [security] Exactly one current key per (algorithm, audience)
    pub audience: String,
}

// [security] Public half of a signing key, published through the JWKS endpoint
// `n` and `e` are base64url encoded big-endian bytes so no precision is lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    pub kty: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub kid: String, // [security] Equals the private key's header identifier
    pub alg: String,
    pub n: String,
    pub e: String,
}

// [business] JSON Web Key Set response for /.well-known/jwks.json
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<PublicJwk>,
}

// [business] Internal record of an issued token, kept for introspection and future revocation
// Deleting it does not invalidate the JWT itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub subject: String,
    pub client_id: String,
    pub access_token: String, // [security] Unique in the token collection
    pub refresh_token: String,
    pub id_token: String,
    pub expires_in: i64, // [business] Relative lifetime in seconds
    pub expires_at: i64, // [business] Absolute unix timestamp
    pub scope: String,
}

// [security] Argon2id credential with the exact parameters used to derive it
// Verification always re-derives with these stored parameters, never with current defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredential {
    pub key: String,  // [security] Base64url encoded derived key
    pub salt: String, // [security] Base64url encoded random salt
    #[serde(flatten)]
    pub params: HashParams,
}

// [business] Registered end user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub header: Header,
    pub email: String,
    pub username: String,
    pub phone_number: Option<String>,
    pub credential: UserCredential,
}

// [business] Data Transfer Objects (DTOs) for API responses

// [business] OAuth2 token endpoint response - RFC 6749 compliant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String, // [business] Always "Bearer"
    pub expires_in: i64,
    pub refresh_token: String, // [business] Empty until refresh tokens are issued
    pub id_token: String,      // [business] Empty until ID tokens are issued
    pub scope: String,
}

impl From<&IssuedToken> for TokenResponse {
    fn from(token: &IssuedToken) -> Self {
        Self {
            access_token: token.access_token.clone(),
            token_type: "Bearer".to_string(),
            expires_in: token.expires_in,
            refresh_token: token.refresh_token.clone(),
            id_token: token.id_token.clone(),
            scope: token.scope.clone(),
        }
    }
}

// [business] Discovery metadata for /.well-known/openid-configuration
#[derive(Debug, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub issuer: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub grant_types_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
}

// [business] OAuth2 error response structure - RFC 6749 compliant error handling
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthError {
    pub error: String, // [business] Standard OAuth2 error codes (e.g., "invalid_request")

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl OAuthError {
    pub fn new(error: &str) -> Self {
        Self {
            error: error.to_string(),
            error_description: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.error_description = Some(description.to_string());
        self
    }
}
