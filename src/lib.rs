// Auth Gateway - bearer credential lifecycle for API clients

pub mod auth;
pub mod commands;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http_client;
pub mod navigation;

pub use auth::{AuthManager, CredentialStore, IdentityClient};
pub use error::AuthError;
pub use gateway::{RequestBody, RequestGateway, RequestOptions};
