//! Administration of clients and resource servers.

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    db::{
        models::{
            Client, GrantType, Header, ResourceServer, SigningAlgorithm, DEFAULT_TOKEN_LIFETIME,
            MAX_TOKEN_LIFETIME,
        },
        Database,
    },
    error::{KeyError, RegistryError},
    security::{generate_client_id, generate_random_token, KeyManager},
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewClient {
    pub name: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub redirect_uri: String,
    pub token_lifetime: Option<i64>,
    #[serde(default)]
    pub grant_types: Vec<GrantType>,
    #[serde(default)]
    pub allowed_audiences: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientUpdate {
    pub name: Option<String>,
    pub is_public: Option<bool>,
    pub redirect_uri: Option<String>,
    pub token_lifetime: Option<i64>,
    pub grant_types: Option<Vec<GrantType>>,
    pub allowed_audiences: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewResourceServer {
    pub name: String,
    pub audience: String,
    pub token_type: SigningAlgorithm,
    #[serde(default)]
    pub enforce_rbac: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceServerUpdate {
    pub name: Option<String>,
    pub token_type: Option<SigningAlgorithm>,
    pub enforce_rbac: Option<bool>,
}

fn validate_lifetime(lifetime: i64) -> Result<(), RegistryError> {
    if lifetime <= 0 {
        return Err(RegistryError::Validation(
            "token_lifetime must be positive".to_string(),
        ));
    }
    if lifetime > MAX_TOKEN_LIFETIME {
        return Err(RegistryError::Validation(format!(
            "token_lifetime must not exceed {MAX_TOKEN_LIFETIME} seconds"
        )));
    }
    Ok(())
}

fn validate_token_type(token_type: &SigningAlgorithm) -> Result<(), RegistryError> {
    if let SigningAlgorithm::Unsupported(name) = token_type {
        return Err(RegistryError::Validation(format!(
            "unsupported token type {name}"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct Registry {
    db: Database,
    keys: KeyManager,
}

impl Registry {
    pub fn new(db: Database, keys: KeyManager) -> Self {
        Self { db, keys }
    }

    /// Register a client with a fresh random `client_id` and secret.
    ///
    /// Clients registered without grant types may only use `authorization_code`.
    pub async fn register_client(&self, new: NewClient) -> Result<Client, RegistryError> {
        if new.name.trim().is_empty() {
            return Err(RegistryError::Validation("name is required".to_string()));
        }
        let token_lifetime = new.token_lifetime.unwrap_or(DEFAULT_TOKEN_LIFETIME);
        validate_lifetime(token_lifetime)?;

        let grant_types = if new.grant_types.is_empty() {
            vec![GrantType::AuthorizationCode]
        } else {
            new.grant_types
        };

        let client_id = generate_client_id();
        let client = Client {
            header: Header::new(&client_id),
            name: new.name,
            is_public: new.is_public,
            client_id,
            client_secret: generate_random_token(),
            redirect_uri: new.redirect_uri,
            token_lifetime,
            grant_types,
            allowed_audiences: new.allowed_audiences,
        };

        self.db.insert_client(&client).await?;
        info!(client_id = %client.client_id, name = %client.name, "Client registered");
        Ok(client)
    }

    pub async fn get_client(&self, client_id: &str) -> Result<Client, RegistryError> {
        self.db
            .find_client(client_id)
            .await?
            .ok_or(RegistryError::ClientNotFound)
    }

    pub async fn update_client(
        &self,
        client_id: &str,
        update: ClientUpdate,
    ) -> Result<Client, RegistryError> {
        let mut client = self.get_client(client_id).await?;

        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(RegistryError::Validation("name is required".to_string()));
            }
            client.name = name;
        }
        if let Some(is_public) = update.is_public {
            client.is_public = is_public;
        }
        if let Some(redirect_uri) = update.redirect_uri {
            client.redirect_uri = redirect_uri;
        }
        if let Some(lifetime) = update.token_lifetime {
            validate_lifetime(lifetime)?;
            client.token_lifetime = lifetime;
        }
        if let Some(grant_types) = update.grant_types {
            client.grant_types = grant_types;
        }
        if let Some(audiences) = update.allowed_audiences {
            client.allowed_audiences = audiences;
        }
        client.header.touch();

        if !self.db.update_client(&client).await? {
            return Err(RegistryError::ClientNotFound);
        }
        Ok(client)
    }

    pub async fn delete_client(&self, client_id: &str) -> Result<(), RegistryError> {
        if !self.db.delete_client(client_id).await? {
            return Err(RegistryError::ClientNotFound);
        }
        info!(client_id = %client_id, "Client deleted");
        Ok(())
    }

    /// Create a resource server. RS256 servers get a current signing key before this returns;
    /// if key activation fails the server record is removed again.
    pub async fn create_resource_server(
        &self,
        new: NewResourceServer,
    ) -> Result<ResourceServer, RegistryError> {
        if new.name.trim().is_empty() || new.audience.trim().is_empty() {
            return Err(RegistryError::Validation(
                "name and audience are required".to_string(),
            ));
        }
        validate_token_type(&new.token_type)?;

        let server = ResourceServer {
            header: Header::new(&new.audience),
            name: new.name,
            audience: new.audience,
            token_type: new.token_type,
            enforce_rbac: new.enforce_rbac,
        };

        // Duplicate audiences are rejected here, before paying for key generation
        self.db.insert_resource_server(&server).await?;

        if server.token_type == SigningAlgorithm::RS256 {
            if let Err(err) = self
                .keys
                .activate_key(&server.token_type, &server.audience)
                .await
            {
                warn!(audience = %server.audience, "Key activation failed, removing resource server: {}", err);
                self.db.delete_resource_server(&server.audience).await?;
                return Err(err.into());
            }
        }

        info!(audience = %server.audience, token_type = %server.token_type, "Resource server created");
        Ok(server)
    }

    pub async fn get_resource_server(&self, audience: &str) -> Result<ResourceServer, RegistryError> {
        self.db
            .find_resource_server(audience)
            .await?
            .ok_or(RegistryError::ResourceServerNotFound)
    }

    pub async fn update_resource_server(
        &self,
        audience: &str,
        update: ResourceServerUpdate,
    ) -> Result<ResourceServer, RegistryError> {
        let mut server = self.get_resource_server(audience).await?;

        if let Some(name) = update.name {
            server.name = name;
        }
        if let Some(enforce_rbac) = update.enforce_rbac {
            server.enforce_rbac = enforce_rbac;
        }
        if let Some(token_type) = update.token_type {
            validate_token_type(&token_type)?;
            server.token_type = token_type;
        }
        server.header.touch();

        // Switching to RS256 needs a current key before the first token is requested
        if server.token_type == SigningAlgorithm::RS256
            && self
                .db
                .find_current_key(&server.token_type, &server.audience)
                .await?
                .is_none()
        {
            self.keys
                .activate_key(&server.token_type, &server.audience)
                .await?;
        }

        if !self.db.update_resource_server(&server).await? {
            return Err(RegistryError::ResourceServerNotFound);
        }
        Ok(server)
    }

    /// Delete a resource server and revoke its signing keys.
    pub async fn delete_resource_server(&self, audience: &str) -> Result<(), RegistryError> {
        let server = self.get_resource_server(audience).await?;

        if !self.db.delete_resource_server(audience).await? {
            return Err(RegistryError::ResourceServerNotFound);
        }

        match self
            .keys
            .revoke_all(&SigningAlgorithm::RS256, &server.audience)
            .await
        {
            Ok(_) | Err(KeyError::NoKeysToRevoke { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        info!(audience = %audience, "Resource server deleted");
        Ok(())
    }

    /// Rotate the signing key of an RS256 resource server.
    pub async fn rotate_resource_server_keys(&self, audience: &str) -> Result<(), RegistryError> {
        let server = self.get_resource_server(audience).await?;
        self.keys
            .rotate_keys(&server.token_type, &server.audience)
            .await?;
        Ok(())
    }
}
