use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    models::*, ClientStore, KeyStore, ResourceServerStore, StoreError, TokenStore, UserStore,
};
use crate::security::password::HashParams;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict(db_err.constraint().unwrap_or("unique").to_string())
            }
            _ => StoreError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Internal(err.to_string())
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    // [business] Establishes the pool and runs migrations embedded at compile time
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

// Row types mirror the tables; conversions rebuild the shared Header block.

#[derive(FromRow)]
struct ClientRow {
    identifier: Uuid,
    created_at: i64,
    updated_at: i64,
    accessed_at: i64,
    tags: Json<BTreeMap<String, String>>,
    name: String,
    is_public: bool,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    token_lifetime: i64,
    grant_types: Vec<String>,
    allowed_audiences: Vec<String>,
}

impl From<ClientRow> for Client {
    fn from(row: ClientRow) -> Self {
        Client {
            header: Header {
                identifier: row.identifier,
                created_at: row.created_at,
                updated_at: row.updated_at,
                accessed_at: row.accessed_at,
                tags: row.tags.0,
            },
            name: row.name,
            is_public: row.is_public,
            client_id: row.client_id,
            client_secret: row.client_secret,
            redirect_uri: row.redirect_uri,
            token_lifetime: row.token_lifetime,
            // Grants written by an older build and no longer recognized are dropped
            grant_types: row
                .grant_types
                .iter()
                .filter_map(|grant| grant.parse().ok())
                .collect(),
            allowed_audiences: row.allowed_audiences,
        }
    }
}

fn grant_names(client: &Client) -> Vec<String> {
    client
        .grant_types
        .iter()
        .map(|grant| grant.as_str().to_string())
        .collect()
}

#[derive(FromRow)]
struct ResourceServerRow {
    identifier: Uuid,
    created_at: i64,
    updated_at: i64,
    accessed_at: i64,
    tags: Json<BTreeMap<String, String>>,
    name: String,
    audience: String,
    token_type: String,
    enforce_rbac: bool,
}

impl From<ResourceServerRow> for ResourceServer {
    fn from(row: ResourceServerRow) -> Self {
        ResourceServer {
            header: Header {
                identifier: row.identifier,
                created_at: row.created_at,
                updated_at: row.updated_at,
                accessed_at: row.accessed_at,
                tags: row.tags.0,
            },
            name: row.name,
            audience: row.audience,
            token_type: SigningAlgorithm::from(row.token_type),
            enforce_rbac: row.enforce_rbac,
        }
    }
}

#[derive(FromRow)]
struct SigningKeyRow {
    identifier: Uuid,
    created_at: i64,
    updated_at: i64,
    accessed_at: i64,
    tags: Json<BTreeMap<String, String>>,
    algorithm: String,
    key_material: String,
    size: i32,
    is_current: bool,
    audience: String,
}

impl From<SigningKeyRow> for PrivateSigningKey {
    fn from(row: SigningKeyRow) -> Self {
        PrivateSigningKey {
            header: Header {
                identifier: row.identifier,
                created_at: row.created_at,
                updated_at: row.updated_at,
                accessed_at: row.accessed_at,
                tags: row.tags.0,
            },
            algorithm: SigningAlgorithm::from(row.algorithm),
            key_material: row.key_material,
            size: row.size as u32,
            is_current: row.is_current,
            audience: row.audience,
        }
    }
}

#[derive(FromRow)]
struct JwkRow {
    kid: String,
    kty: String,
    use_: String,
    alg: String,
    n: String,
    e: String,
}

impl From<JwkRow> for PublicJwk {
    fn from(row: JwkRow) -> Self {
        PublicJwk {
            kty: row.kty,
            use_: row.use_,
            kid: row.kid,
            alg: row.alg,
            n: row.n,
            e: row.e,
        }
    }
}

#[derive(FromRow)]
struct TokenRow {
    access_token: String,
    subject: String,
    client_id: String,
    refresh_token: String,
    id_token: String,
    expires_in: i64,
    expires_at: i64,
    scope: String,
}

impl From<TokenRow> for IssuedToken {
    fn from(row: TokenRow) -> Self {
        IssuedToken {
            subject: row.subject,
            client_id: row.client_id,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            id_token: row.id_token,
            expires_in: row.expires_in,
            expires_at: row.expires_at,
            scope: row.scope,
        }
    }
}

#[derive(FromRow)]
struct UserRow {
    identifier: Uuid,
    created_at: i64,
    updated_at: i64,
    accessed_at: i64,
    tags: Json<BTreeMap<String, String>>,
    email: String,
    username: String,
    phone_number: Option<String>,
    credential_key: String,
    credential_salt: String,
    hash_time: i32,
    hash_memory: i32,
    hash_threads: i32,
    hash_key_length: i32,
    hash_salt_length: i32,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            header: Header {
                identifier: row.identifier,
                created_at: row.created_at,
                updated_at: row.updated_at,
                accessed_at: row.accessed_at,
                tags: row.tags.0,
            },
            email: row.email,
            username: row.username,
            phone_number: row.phone_number,
            credential: UserCredential {
                key: row.credential_key,
                salt: row.credential_salt,
                params: HashParams {
                    time: row.hash_time as u32,
                    memory: row.hash_memory as u32,
                    threads: row.hash_threads as u32,
                    key_length: row.hash_key_length as u32,
                    salt_length: row.hash_salt_length as u32,
                },
            },
        }
    }
}

const CLIENT_COLUMNS: &str = "identifier, created_at, updated_at, accessed_at, tags, name, \
     is_public, client_id, client_secret, redirect_uri, token_lifetime, grant_types, allowed_audiences";

const API_COLUMNS: &str =
    "identifier, created_at, updated_at, accessed_at, tags, name, audience, token_type, enforce_rbac";

const KEY_COLUMNS: &str = "identifier, created_at, updated_at, accessed_at, tags, algorithm, \
     key_material, size, is_current, audience";

const USER_COLUMNS: &str = "identifier, created_at, updated_at, accessed_at, tags, email, username, \
     phone_number, credential_key, credential_salt, hash_time, hash_memory, hash_threads, \
     hash_key_length, hash_salt_length";

#[async_trait]
impl ClientStore for PgStore {
    async fn insert_client(&self, client: &Client) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO clients (identifier, created_at, updated_at, accessed_at, tags, name, \
             is_public, client_id, client_secret, redirect_uri, token_lifetime, grant_types, \
             allowed_audiences) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(client.header.identifier)
        .bind(client.header.created_at)
        .bind(client.header.updated_at)
        .bind(client.header.accessed_at)
        .bind(Json(&client.header.tags))
        .bind(&client.name)
        .bind(client.is_public)
        .bind(&client.client_id)
        .bind(&client.client_secret)
        .bind(&client.redirect_uri)
        .bind(client.token_lifetime)
        .bind(grant_names(client))
        .bind(&client.allowed_audiences)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_client(&self, client_id: &str) -> Result<Option<Client>, StoreError> {
        let row: Option<ClientRow> = sqlx::query_as(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE client_id = $1"
        ))
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Client::from))
    }

    async fn update_client(&self, client: &Client) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE clients SET updated_at = $2, tags = $3, name = $4, is_public = $5, \
             redirect_uri = $6, token_lifetime = $7, grant_types = $8, allowed_audiences = $9 \
             WHERE client_id = $1",
        )
        .bind(&client.client_id)
        .bind(client.header.updated_at)
        .bind(Json(&client.header.tags))
        .bind(&client.name)
        .bind(client.is_public)
        .bind(&client.redirect_uri)
        .bind(client.token_lifetime)
        .bind(grant_names(client))
        .bind(&client.allowed_audiences)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_client(&self, client_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM clients WHERE client_id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ResourceServerStore for PgStore {
    async fn insert_resource_server(&self, server: &ResourceServer) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO apis (identifier, created_at, updated_at, accessed_at, tags, name, \
             audience, token_type, enforce_rbac) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(server.header.identifier)
        .bind(server.header.created_at)
        .bind(server.header.updated_at)
        .bind(server.header.accessed_at)
        .bind(Json(&server.header.tags))
        .bind(&server.name)
        .bind(&server.audience)
        .bind(server.token_type.as_str())
        .bind(server.enforce_rbac)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_resource_server(&self, audience: &str) -> Result<Option<ResourceServer>, StoreError> {
        let row: Option<ResourceServerRow> =
            sqlx::query_as(&format!("SELECT {API_COLUMNS} FROM apis WHERE audience = $1"))
                .bind(audience)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(ResourceServer::from))
    }

    async fn update_resource_server(&self, server: &ResourceServer) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE apis SET updated_at = $2, tags = $3, name = $4, token_type = $5, \
             enforce_rbac = $6 WHERE audience = $1",
        )
        .bind(&server.audience)
        .bind(server.header.updated_at)
        .bind(Json(&server.header.tags))
        .bind(&server.name)
        .bind(server.token_type.as_str())
        .bind(server.enforce_rbac)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_resource_server(&self, audience: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM apis WHERE audience = $1")
            .bind(audience)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl KeyStore for PgStore {
    async fn swap_current_key(
        &self,
        key: &PrivateSigningKey,
        jwk: &PublicJwk,
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let replaced = sqlx::query(
            "UPDATE signing_keys SET is_current = FALSE, updated_at = $3 \
             WHERE algorithm = $1 AND audience = $2 AND is_current",
        )
        .bind(key.algorithm.as_str())
        .bind(&key.audience)
        .bind(now())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        // The partial unique index rejects a concurrent writer that slipped past the update
        sqlx::query(
            "INSERT INTO signing_keys (identifier, created_at, updated_at, accessed_at, tags, \
             algorithm, key_material, size, is_current, audience) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, $9)",
        )
        .bind(key.header.identifier)
        .bind(key.header.created_at)
        .bind(key.header.updated_at)
        .bind(key.header.accessed_at)
        .bind(Json(&key.header.tags))
        .bind(key.algorithm.as_str())
        .bind(&key.key_material)
        .bind(key.size as i32)
        .bind(&key.audience)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO jwks (kid, key_identifier, kty, use_, alg, n, e) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&jwk.kid)
        .bind(key.header.identifier)
        .bind(&jwk.kty)
        .bind(&jwk.use_)
        .bind(&jwk.alg)
        .bind(&jwk.n)
        .bind(&jwk.e)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(replaced)
    }

    async fn find_current_key(
        &self,
        algorithm: &SigningAlgorithm,
        audience: &str,
    ) -> Result<Option<PrivateSigningKey>, StoreError> {
        let row: Option<SigningKeyRow> = sqlx::query_as(&format!(
            "SELECT {KEY_COLUMNS} FROM signing_keys \
             WHERE algorithm = $1 AND audience = $2 AND is_current"
        ))
        .bind(algorithm.as_str())
        .bind(audience)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PrivateSigningKey::from))
    }

    async fn find_keys(
        &self,
        algorithm: &SigningAlgorithm,
        audience: &str,
    ) -> Result<Vec<PrivateSigningKey>, StoreError> {
        let rows: Vec<SigningKeyRow> = sqlx::query_as(&format!(
            "SELECT {KEY_COLUMNS} FROM signing_keys \
             WHERE algorithm = $1 AND audience = $2 ORDER BY seq DESC"
        ))
        .bind(algorithm.as_str())
        .bind(audience)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PrivateSigningKey::from).collect())
    }

    async fn revoke_keys(&self, algorithm: &SigningAlgorithm, audience: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE signing_keys SET is_current = FALSE, updated_at = $3 \
             WHERE algorithm = $1 AND audience = $2",
        )
        .bind(algorithm.as_str())
        .bind(audience)
        .bind(now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_key(&self, identifier: Uuid) -> Result<bool, StoreError> {
        // jwks rows follow through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM signing_keys WHERE identifier = $1")
            .bind(identifier)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_public_key(&self, kid: &str) -> Result<Option<PublicJwk>, StoreError> {
        let row: Option<JwkRow> =
            sqlx::query_as("SELECT kid, kty, use_, alg, n, e FROM jwks WHERE kid = $1")
                .bind(kid)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(PublicJwk::from))
    }

    async fn public_keys(&self) -> Result<Vec<PublicJwk>, StoreError> {
        let rows: Vec<JwkRow> = sqlx::query_as(
            "SELECT j.kid, j.kty, j.use_, j.alg, j.n, j.e FROM jwks j \
             JOIN signing_keys k ON k.identifier = j.key_identifier ORDER BY k.seq",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PublicJwk::from).collect())
    }
}

#[async_trait]
impl TokenStore for PgStore {
    async fn insert_token(&self, token: &IssuedToken) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tokens (access_token, subject, client_id, refresh_token, id_token, \
             expires_in, expires_at, scope) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&token.access_token)
        .bind(&token.subject)
        .bind(&token.client_id)
        .bind(&token.refresh_token)
        .bind(&token.id_token)
        .bind(token.expires_in)
        .bind(token.expires_at)
        .bind(&token.scope)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_token(&self, access_token: &str) -> Result<Option<IssuedToken>, StoreError> {
        let row: Option<TokenRow> = sqlx::query_as(
            "SELECT access_token, subject, client_id, refresh_token, id_token, expires_in, \
             expires_at, scope FROM tokens WHERE access_token = $1",
        )
        .bind(access_token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(IssuedToken::from))
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let params = &user.credential.params;
        sqlx::query(
            "INSERT INTO users (identifier, created_at, updated_at, accessed_at, tags, email, \
             username, phone_number, credential_key, credential_salt, hash_time, hash_memory, \
             hash_threads, hash_key_length, hash_salt_length) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(user.header.identifier)
        .bind(user.header.created_at)
        .bind(user.header.updated_at)
        .bind(user.header.accessed_at)
        .bind(Json(&user.header.tags))
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.phone_number)
        .bind(&user.credential.key)
        .bind(&user.credential.salt)
        .bind(params.time as i32)
        .bind(params.memory as i32)
        .bind(params.threads as i32)
        .bind(params.key_length as i32)
        .bind(params.salt_length as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"))
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(User::from))
    }

    async fn user_exists(&self, username: &str, email: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE username = $1 OR email = $2)",
        )
        .bind(username)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}
