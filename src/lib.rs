// [rust] Library root - the server binary and the integration tests both build on these modules
pub mod config; // Configuration management and environment variable handling
pub mod db; // Storage traits, models, in-memory and Postgres stores
pub mod error; // Error families for flows, keys, signing and registration
pub mod keygen; // RSA key pair generation and JWK export
pub mod oauth; // Token endpoint, discovery and JWKS
pub mod registry; // Client and resource server administration
pub mod security; // Token signing, key lifecycle and credential hashing
pub mod web; // HTTP routing, account and admin handlers
