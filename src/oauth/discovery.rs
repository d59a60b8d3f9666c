use crate::config::Config;
use crate::db::models::{DiscoveryResponse, OAuthError};
use axum::{extract::State, http::StatusCode, response::Json};
use tracing::info;

/// GET /.well-known/openid-configuration
/// Returns authorization server metadata for token consumers
pub async fn discovery_handler(
    State(config): State<Config>,
) -> Result<Json<DiscoveryResponse>, (StatusCode, Json<OAuthError>)> {
    info!("Discovery endpoint called");

    let discovery = create_discovery_response(&config);
    Ok(Json(discovery))
}

fn create_discovery_response(config: &Config) -> DiscoveryResponse {
    let base_url = config.issuer.trim_end_matches('/');

    DiscoveryResponse {
        issuer: config.issuer.clone(),
        token_endpoint: format!("{}/oauth2/token", base_url),
        jwks_uri: format!("{}/.well-known/jwks.json", base_url),
        grant_types_supported: vec!["client_credentials".to_string()],
        token_endpoint_auth_methods_supported: vec!["client_secret_post".to_string()],
        id_token_signing_alg_values_supported: vec!["RS256".to_string(), "HS256".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_response() {
        let config = Config {
            issuer: "https://auth.example.com/".to_string(),
            ..Config::default()
        };

        let discovery = create_discovery_response(&config);

        assert_eq!(discovery.issuer, "https://auth.example.com/");
        assert_eq!(
            discovery.token_endpoint,
            "https://auth.example.com/oauth2/token"
        );
        assert_eq!(
            discovery.jwks_uri,
            "https://auth.example.com/.well-known/jwks.json"
        );
        assert_eq!(discovery.grant_types_supported, vec!["client_credentials"]);
    }
}
