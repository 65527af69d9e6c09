//! The normalized identity a request runs as.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::{TenantId, UserId};
use crate::model::User;

/// Output of identity verification, independent of which mode produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub email: String,
    pub is_active: bool,
    pub is_admin: bool,
}

impl AuthenticatedUser {
    /// Gate for administrator-only operations.
    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(Error::AdminRequired)
        }
    }

    /// Whether `owner` is this identity.
    pub fn owns(&self, owner: &UserId) -> bool {
        &self.user_id == owner
    }
}

impl From<&User> for AuthenticatedUser {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            tenant_id: user.tenant_id.clone(),
            email: user.email.clone(),
            is_active: user.is_active,
            is_admin: user.is_admin,
        }
    }
}
