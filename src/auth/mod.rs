//! Request authentication and the gateway layer.
//!
//! Access tokens are short-lived bearer JWTs bound to a server-side session;
//! refresh tokens rotate on every use. [`security_gateway`] runs the full
//! chain of checks in front of the API and hands its verdict to handlers via
//! the [`Auth`] and [`CleanJson`] extractors.

mod context;
mod cookie;
mod errors;
mod extractors;
mod ip;
mod middleware;
mod state;
mod types;

pub use context::{REQUEST_ID_HEADER, SecurityContext, fingerprint};
pub use cookie::{expired_cookie, get_cookie};
pub use errors::{ErrorCode, GatewayError};
pub use extractors::{Auth, CleanJson};
pub use ip::{ClientIpConfig, HasHeadersAndExtensions, extract_client_ip};
pub use middleware::security_gateway;
pub use state::{EstablishError, GatewayConfig, SecurityGateway};
pub use types::AuthenticatedUser;
