mod health_check;
mod resources;
mod token;

pub use health_check::health_check;
pub use resources::{admin_hello, hello, user_hello, HelloResponse};
pub use token::{issue_token, revoke_token, RevokeForm, TokenForm};
