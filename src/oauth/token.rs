use crate::{
    db::{models::*, Database},
    error::{ErrorKind, FlowError},
    security::{constant_time_eq, jwt::Claims, TokenSigner},
};
use axum::{extract::State, http::StatusCode, response::Json, Form};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub client_id: String,
    pub client_secret: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
}

/// Where a token request is in the pipeline. Each stage either passes or ends the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    RequestReceived,
    ClientResolved,
    PolicyChecked,
    GrantValidated,
    TokenIssued,
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowStage::RequestReceived => "request_received",
            FlowStage::ClientResolved => "client_resolved",
            FlowStage::PolicyChecked => "policy_checked",
            FlowStage::GrantValidated => "grant_validated",
            FlowStage::TokenIssued => "token_issued",
        };
        f.write_str(name)
    }
}

/// Runs token requests through validation, client resolution, policy, grant validation
/// and signing. Policy is checked before the resource server is looked up, so a request
/// the client is not allowed to make never touches resource server storage.
#[derive(Clone)]
pub struct FlowEngine {
    db: Database,
    signer: TokenSigner,
}

impl FlowEngine {
    pub fn new(db: Database, signer: TokenSigner) -> Self {
        Self { db, signer }
    }

    pub async fn issue_token(&self, request: &TokenRequest) -> Result<IssuedToken, FlowError> {
        debug!(stage = %FlowStage::RequestReceived, grant_type = %request.grant_type, "Token request");
        if request.audience.is_empty() {
            return Err(FlowError::InvalidTokenRequest("missing 'audience' parameter"));
        }
        if request.grant_type.is_empty() {
            return Err(FlowError::InvalidTokenRequest("missing 'grant_type' parameter"));
        }

        let client = self
            .db
            .find_client(&request.client_id)
            .await?
            .ok_or(FlowError::ClientNotFound)?;
        debug!(stage = %FlowStage::ClientResolved, client_id = %client.client_id);

        let grant = check_policy(&client, request)?;
        debug!(stage = %FlowStage::PolicyChecked, client_id = %client.client_id, grant = %grant);

        let resource_server = self
            .db
            .find_resource_server(&request.audience)
            .await?
            .ok_or(FlowError::ResourceServerNotFound)?;

        let claims = match grant {
            GrantType::ClientCredentials => {
                self.client_credentials(&client, &resource_server, request)?
            }
            other => return Err(FlowError::UnsupportedGrantType(other)),
        };
        debug!(stage = %FlowStage::GrantValidated, client_id = %client.client_id);

        let issued = self.signer.sign(&resource_server, &client, &claims).await?;
        info!(
            stage = %FlowStage::TokenIssued,
            client_id = %client.client_id,
            audience = %resource_server.audience,
            "Access token issued"
        );
        Ok(issued)
    }

    fn client_credentials(
        &self,
        client: &Client,
        resource_server: &ResourceServer,
        request: &TokenRequest,
    ) -> Result<Claims, FlowError> {
        // Public clients cannot keep a secret, so the secret is never even compared
        if client.is_public {
            return Err(FlowError::VisibilityViolation);
        }

        let supplied = request.client_secret.as_deref().unwrap_or_default();
        if !constant_time_eq(supplied.as_bytes(), client.client_secret.as_bytes()) {
            return Err(FlowError::InvalidClientCredentials);
        }

        Ok(Claims::new(
            self.signer.issuer(),
            &resource_server.audience,
            &client.client_id,
            client.token_lifetime,
        )?)
    }
}

fn check_policy(client: &Client, request: &TokenRequest) -> Result<GrantType, FlowError> {
    let grant: GrantType = request
        .grant_type
        .parse()
        .map_err(|_| FlowError::InvalidGrantType(request.grant_type.clone()))?;

    if !client.allows_grant(grant) {
        return Err(FlowError::UnauthorizedGrantType(grant));
    }
    if !client.allows_audience(&request.audience) {
        return Err(FlowError::UnauthorizedAudience(request.audience.clone()));
    }
    Ok(grant)
}

// [business] RFC 6749 section 5.2 error codes
// Audience and resource server failures share one response so callers cannot probe
// which audiences exist.
pub fn flow_error_response(err: &FlowError) -> (StatusCode, Json<OAuthError>) {
    let (status, body) = match err {
        FlowError::InvalidTokenRequest(description) => (
            StatusCode::BAD_REQUEST,
            OAuthError::new("invalid_request").with_description(description),
        ),
        FlowError::InvalidGrantType(_) | FlowError::UnsupportedGrantType(_) => (
            StatusCode::BAD_REQUEST,
            OAuthError::new("unsupported_grant_type"),
        ),
        FlowError::ClientNotFound
        | FlowError::VisibilityViolation
        | FlowError::InvalidClientCredentials => (
            StatusCode::UNAUTHORIZED,
            OAuthError::new("invalid_client"),
        ),
        FlowError::UnauthorizedGrantType(_) => (
            StatusCode::BAD_REQUEST,
            OAuthError::new("unauthorized_client")
                .with_description("client is not allowed to use this grant type"),
        ),
        FlowError::UnauthorizedAudience(_) | FlowError::ResourceServerNotFound => (
            StatusCode::BAD_REQUEST,
            OAuthError::new("unauthorized_client")
                .with_description("client is not allowed to request this audience"),
        ),
        FlowError::Signing(_) | FlowError::Storage(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            OAuthError::new("server_error"),
        ),
    };
    (status, Json(body))
}

/// POST /oauth2/token - Token endpoint (form encoded)
pub async fn token_handler(
    State(engine): State<FlowEngine>,
    Form(request): Form<TokenRequest>,
) -> Result<Json<TokenResponse>, (StatusCode, Json<OAuthError>)> {
    match engine.issue_token(&request).await {
        Ok(issued) => Ok(Json(TokenResponse::from(&issued))),
        Err(err) => {
            if err.kind() == ErrorKind::Internal {
                error!("Token request failed: {}", err);
            } else {
                warn!(client_id = %request.client_id, "Token request rejected: {}", err);
            }
            Err(flow_error_response(&err))
        }
    }
}
