// [library] Secrecy crate - provides secure handling of sensitive data in memory
// ExposeSecret trait allows controlled access to wrapped secret values
// Secret<T> wrapper prevents accidental logging of sensitive data
use secrecy::{ExposeSecret, Secret};

// [rust] Standard library networking types for IP addresses and network binding
use std::{
    net::{IpAddr, Ipv4Addr},
    str::FromStr,
    time::Duration,
};

use crate::security::{keys::KeyPolicy, password::HashParams};

// [business] Bounds applied to user passwords at registration time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialPolicy {
    pub min_password_length: usize,
    pub max_password_length: usize, // [security] Caps the input fed into Argon2
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            min_password_length: 8,
            max_password_length: 128,
        }
    }
}

// [rust] Derive macro attributes provide automatic trait implementations
// Debug: enables {:?} formatting for logging (Secret fields print as redacted)
// Clone: every server component keeps its own copy of the settings it needs
#[derive(Debug, Clone)]
pub struct Config {
    // [business] Network binding configuration - where the server listens for connections
    pub app_host: IpAddr,
    pub app_port: u16,

    // [business] Issuer identifier - written into the `iss` claim of every token
    pub issuer: String,

    // [security] Storage connection string wrapped in Secret for security
    // `memory://` selects the in-process store, anything else is handed to Postgres
    pub database_url: Secret<String>,

    // [security] CORS allowed origins
    pub allowed_origins: Vec<String>,

    // [security] Argon2id parameters used for new credentials
    pub hashing: HashParams,

    // [security] Signing key generation and retention policy
    pub keys: KeyPolicy,

    // [business] Registration password bounds
    pub credentials: CredentialPolicy,

    // [business] Upper bound on the time spent serving one HTTP request
    pub request_timeout: Duration,

    // [security] Shared key guarding the client and resource server administration routes
    // Unset disables those routes entirely
    pub admin_api_key: Option<Secret<String>>,
}

// [rust] Environment variable parsing with fallback pattern
// Missing or unparsable values fall back to the default instead of aborting startup
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    // [business] Factory method pattern - creates Config from environment variables
    pub fn from_env() -> Result<Self, anyhow::Error> {
        // [library] Load .env file if present - useful for development environments
        dotenvy::dotenv().ok();

        let hash_defaults = HashParams::default();
        let key_defaults = KeyPolicy::default();
        let credential_defaults = CredentialPolicy::default();

        let config = Config {
            app_host: env_or("APP_HOST", IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))),
            app_port: env_or("APP_PORT", 8080),

            issuer: std::env::var("ISSUER").unwrap_or_else(|_| "http://localhost:8080".to_string()),

            database_url: Secret::new(
                std::env::var("DATABASE_URL").unwrap_or_else(|_| "memory://".to_string()),
            ),

            // [security] Comma-separated list, empty entries from malformed config are dropped
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://localhost:8080".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            hashing: HashParams {
                time: env_or("HASH_TIME", hash_defaults.time),
                memory: env_or("HASH_MEMORY_KIB", hash_defaults.memory),
                threads: env_or("HASH_THREADS", hash_defaults.threads),
                key_length: env_or("HASH_KEY_LENGTH", hash_defaults.key_length),
                salt_length: env_or("HASH_SALT_LENGTH", hash_defaults.salt_length),
            },

            keys: KeyPolicy {
                rsa_bits: env_or("RSA_KEY_BITS", key_defaults.rsa_bits),
                max_retained: env_or("MAX_RETAINED_KEYS", key_defaults.max_retained),
            },

            credentials: CredentialPolicy {
                min_password_length: env_or(
                    "PASSWORD_MIN_LENGTH",
                    credential_defaults.min_password_length,
                ),
                max_password_length: env_or(
                    "PASSWORD_MAX_LENGTH",
                    credential_defaults.max_password_length,
                ),
            },

            request_timeout: Duration::from_secs(env_or("REQUEST_TIMEOUT_SECS", 10)),

            admin_api_key: std::env::var("ADMIN_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty())
                .map(Secret::new),
        };

        config.validate()?;

        // [library] Structured logging of configuration (without secrets) for debugging
        tracing::info!(
            "Config loaded - Host: {}:{}, Issuer: {}, RSA bits: {}, Retained keys: {}",
            config.app_host,
            config.app_port,
            config.issuer,
            config.keys.rsa_bits,
            config.keys.max_retained
        );

        Ok(config)
    }

    // [security] Reject settings that would silently weaken keys or credentials
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.keys.rsa_bits < 2048 {
            anyhow::bail!("RSA_KEY_BITS must be at least 2048, got {}", self.keys.rsa_bits);
        }
        if self.hashing.salt_length < 8 {
            anyhow::bail!("HASH_SALT_LENGTH must be at least 8 bytes");
        }
        // Argon2 needs at least one lane and 8 KiB of memory per lane
        if self.hashing.threads == 0 {
            anyhow::bail!("HASH_THREADS must be at least 1");
        }
        if self.hashing.memory < self.hashing.threads.saturating_mul(8) {
            anyhow::bail!(
                "HASH_MEMORY_KIB must be at least 8 x HASH_THREADS ({} KiB)",
                self.hashing.threads.saturating_mul(8)
            );
        }
        if self.hashing.time == 0 {
            anyhow::bail!("HASH_TIME must be at least 1");
        }
        if self.hashing.key_length < 16 {
            anyhow::bail!("HASH_KEY_LENGTH must be at least 16 bytes");
        }
        if self.credentials.min_password_length > self.credentials.max_password_length {
            anyhow::bail!("PASSWORD_MIN_LENGTH exceeds PASSWORD_MAX_LENGTH");
        }
        if let Some(key) = &self.admin_api_key {
            if key.expose_secret().len() < 16 {
                anyhow::bail!("ADMIN_API_KEY must be at least 16 characters");
            }
        }
        Ok(())
    }

    // [business] Helper method to create network bind address string for TCP listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.app_host, self.app_port)
    }

    // [security] Controlled access to the storage URL - exposes the secret when needed
    pub fn database_url(&self) -> &str {
        self.database_url.expose_secret()
    }

    pub fn admin_api_key(&self) -> Option<&str> {
        self.admin_api_key
            .as_ref()
            .map(|key| key.expose_secret().as_str())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_host: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            app_port: 8080,
            issuer: "http://localhost:8080".to_string(),
            database_url: Secret::new("memory://".to_string()),
            allowed_origins: vec!["http://localhost:3000".to_string()],
            hashing: HashParams::default(),
            keys: KeyPolicy::default(),
            credentials: CredentialPolicy::default(),
            request_timeout: Duration::from_secs(10),
            admin_api_key: None,
        }
    }
}
