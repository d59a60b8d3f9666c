// [rust] Security module organization - cryptographic and security utilities
pub mod jwt; // [security] Token signing and verification
pub mod keys; // [security] Signing key lifecycle
pub mod password; // [security] Argon2id credential hashing and verification

pub use jwt::*;
pub use keys::{KeyManager, KeyPolicy};
