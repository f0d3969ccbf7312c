//! Authentication user types.

use crate::jwt::AccessClaims;
use crate::session::Session;

/// Caller that passed every gateway check, attached to the request by the
/// gateway layer.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// Claims from the verified access token
    pub claims: AccessClaims,
    /// The live session the token is bound to
    pub session: Session,
}

impl AuthenticatedUser {
    pub fn user_id(&self) -> &str {
        &self.claims.sub
    }
}
