//! Auth domain - bearer tokens identifying a tenant

pub mod jwt;

pub use jwt::{Claims, JwtService, Role};
