//! Authentication and authorization module

pub mod jwt;
pub mod middleware;
pub mod password;
pub mod signature;

pub use jwt::{Claims, IssuedToken, JwtService};
pub use middleware::{auth_middleware, extract_credentials, extract_token, AuthContext, Presented};
pub use password::PasswordHasher;
pub use signature::verify_email_signature;
