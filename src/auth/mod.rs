/// Authentication and authorization core
///
/// Password hashing, user and client registries, token records, the
/// token issuer (authorization server) and the access validator
/// (resource server).

mod clients;
mod credentials;
mod issuer;
mod password;
mod token;
mod validator;

pub use clients::{Client, ClientRegistry, GrantType};
pub use credentials::{CredentialStore, Role, User};
pub use issuer::{GrantStage, TokenIssuer, TokenRequest, TokenResponse};
pub use password::PasswordHasher;
pub use token::{generate_token_value, join_scopes, parse_scopes, redact, Token, TokenKind};
pub use validator::{AccessValidator, Principal};
