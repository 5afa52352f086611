/// Middleware module
///
/// Bearer authentication and the route table it enforces.

mod bearer_auth;
mod route_table;

pub use bearer_auth::BearerAuth;
pub use route_table::{RouteRule, RouteTable};
