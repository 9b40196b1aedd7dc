pub mod auth;
pub mod credentials;
pub mod envelope;
pub mod error;
pub mod uri;
