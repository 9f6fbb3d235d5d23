//! The `User` entity. Authentication itself (credential hashing, JWT
//! issuance) lives outside this crate; only the shape the core needs to
//! enforce ownership and the admin allowlist is defined here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    /// Derived server-side on each request from the admin allowlist;
    /// never cached in a token.
    #[serde(skip_serializing)]
    pub is_admin: bool,
}

/// The authorization contract a caller must supply; the owning HTTP layer
/// is responsible for producing it from a verified session/JWT.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub is_admin: bool,
}

impl AuthContext {
    pub fn owner_filter(&self) -> Option<Uuid> {
        if self.is_admin { None } else { Some(self.user_id) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_admin_is_scoped_to_self() {
        let ctx = AuthContext {
            user_id: Uuid::new_v4(),
            is_admin: false,
        };
        assert_eq!(ctx.owner_filter(), Some(ctx.user_id));
    }

    #[test]
    fn test_admin_bypasses_owner_filter() {
        let ctx = AuthContext {
            user_id: Uuid::new_v4(),
            is_admin: true,
        };
        assert_eq!(ctx.owner_filter(), None);
    }
}
