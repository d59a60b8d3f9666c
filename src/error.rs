use axum::http::StatusCode;
use thiserror::Error;

use crate::{
    db::{models::GrantType, StoreError},
    security::password::PasswordError,
};

/// Coarse classification shared by every error family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing input.
    Validation,
    /// Well-formed request refused by authorization policy.
    Policy,
    /// Unique constraint violated.
    Conflict,
    /// Referenced entity does not exist.
    NotFound,
    /// Storage, crypto or configuration failure.
    Internal,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Policy => StatusCode::UNAUTHORIZED,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("no current signing key for {algorithm}/{audience}")]
    KeyNotFound { algorithm: String, audience: String },

    #[error("no signing keys recorded for {algorithm}/{audience}")]
    NoKeysToRevoke { algorithm: String, audience: String },

    #[error("algorithm {0} does not use managed signing keys")]
    UnsupportedAlgorithm(String),

    #[error("stored key is malformed: {0}")]
    MalformedKey(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl KeyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeyError::NoKeysToRevoke { .. } => ErrorKind::NotFound,
            KeyError::UnsupportedAlgorithm(_) => ErrorKind::Validation,
            KeyError::KeyGenerationFailed(_)
            | KeyError::KeyNotFound { .. }
            | KeyError::MalformedKey(_)
            | KeyError::Storage(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Error)]
pub enum SignError {
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("generated token collided with an existing token")]
    TokenCollision,

    #[error("client secret is not valid base64url")]
    MalformedSecret,

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("token rejected: {0}")]
    InvalidToken(String),

    #[error("token lifetime {0} overflows the expiry timestamp")]
    InvalidLifetime(i64),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("failed to record issued token: {0}")]
    Storage(StoreError),
}

impl From<josekit::JoseError> for SignError {
    fn from(err: josekit::JoseError) -> Self {
        SignError::Signing(err.to_string())
    }
}

impl SignError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SignError::InvalidToken(_) => ErrorKind::Policy,
            SignError::TokenCollision => ErrorKind::Conflict,
            SignError::Key(err) => err.kind(),
            _ => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid token request: {0}")]
    InvalidTokenRequest(&'static str),

    #[error("client not found")]
    ClientNotFound,

    #[error("unrecognized grant type: {0}")]
    InvalidGrantType(String),

    #[error("client is not allowed to use grant type {0}")]
    UnauthorizedGrantType(GrantType),

    #[error("client is not allowed to request audience {0}")]
    UnauthorizedAudience(String),

    #[error("resource server not found")]
    ResourceServerNotFound,

    #[error("public clients cannot use the client_credentials grant")]
    VisibilityViolation,

    #[error("invalid client credentials")]
    InvalidClientCredentials,

    #[error("grant type {0} is not supported by this server")]
    UnsupportedGrantType(GrantType),

    #[error(transparent)]
    Signing(#[from] SignError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::InvalidTokenRequest(_)
            | FlowError::InvalidGrantType(_)
            | FlowError::UnsupportedGrantType(_) => ErrorKind::Validation,
            FlowError::ClientNotFound | FlowError::ResourceServerNotFound => ErrorKind::NotFound,
            FlowError::UnauthorizedGrantType(_)
            | FlowError::UnauthorizedAudience(_)
            | FlowError::VisibilityViolation
            | FlowError::InvalidClientCredentials => ErrorKind::Policy,
            FlowError::Signing(err) => err.kind(),
            FlowError::Storage(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("client not found")]
    ClientNotFound,

    #[error("resource server not found")]
    ResourceServerNotFound,

    #[error("already exists: {0}")]
    Conflict(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Storage(StoreError),
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(what) => RegistryError::Conflict(what),
            other => RegistryError::Storage(other),
        }
    }
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Validation(_) => ErrorKind::Validation,
            RegistryError::ClientNotFound | RegistryError::ResourceServerNotFound => {
                ErrorKind::NotFound
            }
            RegistryError::Conflict(_) => ErrorKind::Conflict,
            RegistryError::Key(err) => err.kind(),
            RegistryError::Storage(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("already registered: {0}")]
    Conflict(String),

    #[error("invalid username or password")]
    InvalidCredential,

    #[error("credential hashing failed: {0}")]
    Hashing(PasswordError),

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Storage(StoreError),
}

impl From<StoreError> for RegistrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(what) => RegistrationError::Conflict(what),
            other => RegistrationError::Storage(other),
        }
    }
}

impl From<PasswordError> for RegistrationError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::InvalidCredential => RegistrationError::InvalidCredential,
            other => RegistrationError::Hashing(other),
        }
    }
}

impl RegistrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistrationError::Validation(_) => ErrorKind::Validation,
            RegistrationError::Conflict(_) => ErrorKind::Conflict,
            RegistrationError::InvalidCredential => ErrorKind::Policy,
            RegistrationError::Hashing(_)
            | RegistrationError::Task(_)
            | RegistrationError::Storage(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflicts_become_conflicts() {
        let err = RegistryError::from(StoreError::Conflict("audience".to_string()));
        assert!(matches!(err, RegistryError::Conflict(_)));
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = RegistrationError::from(StoreError::Internal("down".to_string()));
        assert!(matches!(err, RegistrationError::Storage(_)));
        assert_eq!(err.kind().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_password_mismatch_is_a_policy_error() {
        let err = RegistrationError::from(PasswordError::InvalidCredential);
        assert!(matches!(err, RegistrationError::InvalidCredential));
        assert_eq!(err.kind(), ErrorKind::Policy);
    }

    #[test]
    fn test_flow_error_kinds() {
        assert_eq!(FlowError::ClientNotFound.kind(), ErrorKind::NotFound);
        assert_eq!(FlowError::VisibilityViolation.kind(), ErrorKind::Policy);
        assert_eq!(
            FlowError::UnsupportedGrantType(GrantType::Password).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            FlowError::Signing(SignError::TokenCollision).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            FlowError::Signing(SignError::Key(KeyError::KeyNotFound {
                algorithm: "RS256".to_string(),
                audience: "api".to_string(),
            }))
            .kind(),
            ErrorKind::Internal
        );
    }
}
