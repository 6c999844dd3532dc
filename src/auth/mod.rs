// Authentication module
// Credential storage, identity service flows and the token refresh protocol

mod credentials;
mod identity;
mod manager;
mod normalize;
mod refresh;
mod types;

pub use credentials::{
    clear_credentials, CredentialStore, MemoryCredentialStore, SqliteCredentialStore,
    AUTH_TOKEN_KEY, REFRESH_TOKEN_KEY,
};
pub use identity::IdentityClient;
pub use manager::AuthManager;
pub use normalize::to_data_uri;
pub use refresh::refresh_stored_credentials;
pub use types::{
    CaptchaChallenge, CaptchaVerification, CodeLogin, Credential, EmailCodeRequest, EmailLogin,
    GrantType, LoginResult, PasswordLogin, SmsCodeRequest, SmsLogin, TokenData,
};
