use crate::{
    config::Config,
    db::models::{Client, OAuthError, ResourceServer},
    error::{ErrorKind, RegistryError},
    registry::{ClientUpdate, NewClient, NewResourceServer, Registry, ResourceServerUpdate},
    security::constant_time_eq,
};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use tracing::{error, info, warn};

type AdminRejection = (StatusCode, Json<OAuthError>);

fn extract_api_key(headers: &HeaderMap) -> Result<String, AdminRejection> {
    if let Some(api_key) = headers.get("x-api-key") {
        return api_key.to_str().map(|s| s.to_string()).map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                Json(
                    OAuthError::new("invalid_request").with_description("Invalid X-API-Key header"),
                ),
            )
        });
    }

    if let Some(auth_header) = headers.get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(key) = auth_str.strip_prefix("API-Key ") {
                return Ok(key.to_string());
            }
        }
    }

    Err((
        StatusCode::UNAUTHORIZED,
        Json(
            OAuthError::new("invalid_client")
                .with_description("API key required in X-API-Key or Authorization header"),
        ),
    ))
}

// [security] Administration is closed unless an API key is configured
fn authorize(headers: &HeaderMap, config: &Config) -> Result<(), AdminRejection> {
    let Some(expected) = config.admin_api_key() else {
        warn!("Administration request refused: ADMIN_API_KEY is not configured");
        return Err((
            StatusCode::FORBIDDEN,
            Json(
                OAuthError::new("access_denied")
                    .with_description("Administration API is disabled"),
            ),
        ));
    };

    let provided = extract_api_key(headers)?;
    if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        warn!("Administration request refused: invalid API key");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(OAuthError::new("invalid_client").with_description("Invalid API key")),
        ));
    }
    Ok(())
}

fn registry_error_response(err: RegistryError) -> AdminRejection {
    let kind = err.kind();
    let code = match kind {
        ErrorKind::Validation => "invalid_request",
        ErrorKind::NotFound => "not_found",
        ErrorKind::Conflict => "conflict",
        ErrorKind::Policy => "access_denied",
        ErrorKind::Internal => "server_error",
    };

    if kind == ErrorKind::Internal {
        error!("Administration request failed: {}", err);
        return (kind.status(), Json(OAuthError::new(code)));
    }
    (
        kind.status(),
        Json(OAuthError::new(code).with_description(&err.to_string())),
    )
}

/// POST /admin/clients
pub async fn create_client_handler(
    State(config): State<Config>,
    State(registry): State<Registry>,
    headers: HeaderMap,
    Json(new): Json<NewClient>,
) -> Result<(StatusCode, Json<Client>), AdminRejection> {
    authorize(&headers, &config)?;
    let client = registry
        .register_client(new)
        .await
        .map_err(registry_error_response)?;
    Ok((StatusCode::CREATED, Json(client)))
}

/// GET /admin/clients/:client_id
pub async fn get_client_handler(
    State(config): State<Config>,
    State(registry): State<Registry>,
    headers: HeaderMap,
    Path(client_id): Path<String>,
) -> Result<Json<Client>, AdminRejection> {
    authorize(&headers, &config)?;
    registry
        .get_client(&client_id)
        .await
        .map(Json)
        .map_err(registry_error_response)
}

/// PATCH /admin/clients/:client_id
pub async fn update_client_handler(
    State(config): State<Config>,
    State(registry): State<Registry>,
    headers: HeaderMap,
    Path(client_id): Path<String>,
    Json(update): Json<ClientUpdate>,
) -> Result<Json<Client>, AdminRejection> {
    authorize(&headers, &config)?;
    registry
        .update_client(&client_id, update)
        .await
        .map(Json)
        .map_err(registry_error_response)
}

/// DELETE /admin/clients/:client_id
pub async fn delete_client_handler(
    State(config): State<Config>,
    State(registry): State<Registry>,
    headers: HeaderMap,
    Path(client_id): Path<String>,
) -> Result<StatusCode, AdminRejection> {
    authorize(&headers, &config)?;
    registry
        .delete_client(&client_id)
        .await
        .map_err(registry_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/apis
pub async fn create_resource_server_handler(
    State(config): State<Config>,
    State(registry): State<Registry>,
    headers: HeaderMap,
    Json(new): Json<NewResourceServer>,
) -> Result<(StatusCode, Json<ResourceServer>), AdminRejection> {
    authorize(&headers, &config)?;
    let server = registry
        .create_resource_server(new)
        .await
        .map_err(registry_error_response)?;
    Ok((StatusCode::CREATED, Json(server)))
}

/// GET /admin/apis/:audience
pub async fn get_resource_server_handler(
    State(config): State<Config>,
    State(registry): State<Registry>,
    headers: HeaderMap,
    Path(audience): Path<String>,
) -> Result<Json<ResourceServer>, AdminRejection> {
    authorize(&headers, &config)?;
    registry
        .get_resource_server(&audience)
        .await
        .map(Json)
        .map_err(registry_error_response)
}

/// PATCH /admin/apis/:audience
pub async fn update_resource_server_handler(
    State(config): State<Config>,
    State(registry): State<Registry>,
    headers: HeaderMap,
    Path(audience): Path<String>,
    Json(update): Json<ResourceServerUpdate>,
) -> Result<Json<ResourceServer>, AdminRejection> {
    authorize(&headers, &config)?;
    registry
        .update_resource_server(&audience, update)
        .await
        .map(Json)
        .map_err(registry_error_response)
}

/// DELETE /admin/apis/:audience
pub async fn delete_resource_server_handler(
    State(config): State<Config>,
    State(registry): State<Registry>,
    headers: HeaderMap,
    Path(audience): Path<String>,
) -> Result<StatusCode, AdminRejection> {
    authorize(&headers, &config)?;
    registry
        .delete_resource_server(&audience)
        .await
        .map_err(registry_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/apis/:audience/rotate
pub async fn rotate_keys_handler(
    State(config): State<Config>,
    State(registry): State<Registry>,
    headers: HeaderMap,
    Path(audience): Path<String>,
) -> Result<StatusCode, AdminRejection> {
    authorize(&headers, &config)?;
    registry
        .rotate_resource_server_keys(&audience)
        .await
        .map_err(registry_error_response)?;
    info!(audience = %audience, "Signing keys rotated");
    Ok(StatusCode::NO_CONTENT)
}
