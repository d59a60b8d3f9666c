use crate::{
    config::CredentialPolicy,
    db::{models::*, Database},
    error::{ErrorKind, RegistrationError},
    security::password::HashParams,
    web::routes::AppState,
};
use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

// [business] Public view of a user; credential material never leaves the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub identifier: Uuid,
    pub username: String,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            identifier: user.header.identifier,
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }
}

fn validate_registration(
    request: &RegisterRequest,
    policy: &CredentialPolicy,
) -> Option<String> {
    if request.username.trim().is_empty() {
        return Some("Username is required".to_string());
    }

    if request.email.is_empty() {
        return Some("Email is required".to_string());
    }

    if !request.email.contains('@') {
        return Some("Please enter a valid email address".to_string());
    }

    if request.password.is_empty() {
        return Some("Password is required".to_string());
    }

    // Length is counted in characters, not bytes
    let length = request.password.chars().count();
    if length < policy.min_password_length {
        return Some(format!(
            "Password must be at least {} characters long",
            policy.min_password_length
        ));
    }
    if length > policy.max_password_length {
        return Some(format!(
            "Password must be at most {} characters long",
            policy.max_password_length
        ));
    }

    if let Some(phone) = &request.phone_number {
        if phone.trim().is_empty() {
            return Some("Phone number cannot be empty".to_string());
        }
    }

    None
}

/// Register a user. Validation and the uniqueness pre-check run before the expensive hash;
/// the store's unique indexes still decide races between concurrent registrations.
pub async fn register_user(
    db: &Database,
    policy: &CredentialPolicy,
    params: &HashParams,
    request: &RegisterRequest,
) -> Result<User, RegistrationError> {
    if let Some(message) = validate_registration(request, policy) {
        return Err(RegistrationError::Validation(message));
    }

    if db.user_exists(&request.username, &request.email).await? {
        return Err(RegistrationError::Conflict(
            "username or email already registered".to_string(),
        ));
    }

    let password = request.password.clone();
    let params = *params;
    let credential =
        tokio::task::spawn_blocking(move || UserCredential::derive(&password, &params))
            .await
            .map_err(|e| RegistrationError::Task(e.to_string()))??;

    let user = User {
        header: Header::new(&request.username),
        email: request.email.clone(),
        username: request.username.clone(),
        phone_number: request.phone_number.clone(),
        credential,
    };

    db.insert_user(&user).await?;
    info!(username = %user.username, "User registered");
    Ok(user)
}

/// Verify a username and password against the stored credential.
///
/// Unknown users and wrong passwords produce the same error.
pub async fn authenticate_user(
    db: &Database,
    request: &LoginRequest,
) -> Result<User, RegistrationError> {
    let user = db
        .find_user(&request.username)
        .await?
        .ok_or(RegistrationError::InvalidCredential)?;

    let credential = user.credential.clone();
    let password = request.password.clone();
    tokio::task::spawn_blocking(move || credential.verify(&password))
        .await
        .map_err(|e| RegistrationError::Task(e.to_string()))??;

    Ok(user)
}

fn registration_error_response(err: &RegistrationError) -> (StatusCode, Json<OAuthError>) {
    let body = match err {
        RegistrationError::Validation(message) => {
            OAuthError::new("invalid_request").with_description(message)
        }
        RegistrationError::Conflict(_) => OAuthError::new("invalid_request")
            .with_description("An account with this username or email already exists."),
        RegistrationError::InvalidCredential => {
            OAuthError::new("access_denied").with_description("Invalid username or password.")
        }
        RegistrationError::Hashing(_)
        | RegistrationError::Task(_)
        | RegistrationError::Storage(_) => OAuthError::new("server_error"),
    };
    (err.kind().status(), Json(body))
}

/// POST /register - Create a user account
pub async fn register_handler(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserSummary>), (StatusCode, Json<OAuthError>)> {
    info!("Registration attempt for username: {}", request.username);

    match register_user(
        &state.db,
        &state.config.credentials,
        &state.config.hashing,
        &request,
    )
    .await
    {
        Ok(user) => Ok((StatusCode::CREATED, Json(UserSummary::from(&user)))),
        Err(err) => {
            if err.kind() == ErrorKind::Internal {
                error!("Registration failed: {}", err);
            } else {
                warn!("Registration rejected: {}", err);
            }
            Err(registration_error_response(&err))
        }
    }
}

/// POST /login - Verify user credentials
pub async fn login_handler(
    State(db): State<Database>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<UserSummary>, (StatusCode, Json<OAuthError>)> {
    match authenticate_user(&db, &request).await {
        Ok(user) => {
            info!(username = %user.username, "Login succeeded");
            Ok(Json(UserSummary::from(&user)))
        }
        Err(err) => {
            if err.kind() == ErrorKind::Internal {
                error!("Login failed: {}", err);
            } else {
                warn!(username = %request.username, "Login rejected");
            }
            Err(registration_error_response(&err))
        }
    }
}
