pub mod discovery;
pub mod jwks;
pub mod token;

pub use discovery::*;
pub use jwks::*;
pub use token::*;
