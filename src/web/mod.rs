pub mod admin;
pub mod register;
pub mod routes;

pub use register::*;
pub use routes::*;
