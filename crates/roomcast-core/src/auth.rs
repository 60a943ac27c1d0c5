//! Token verification seam.

use serde::{Deserialize, Serialize};

use crate::errors::AuthError;
use crate::ids::UserId;

/// Authenticated principal bound to a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Account id from the token.
    pub user_id: UserId,
    /// Name shown as `sender` on outbound frames.
    pub display_name: String,
}

impl Identity {
    /// Build an identity.
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
        }
    }
}

/// Bearer-token verification, implemented outside the core.
pub trait TokenVerifier: Send + Sync {
    /// Resolve a token to the identity it was issued for.
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}
