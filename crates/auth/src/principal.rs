use serde::{Deserialize, Serialize};

use fundledger_core::UserId;

use crate::Permission;

/// An authenticated acting user with their resolved permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub permissions: Vec<Permission>,
}

impl Principal {
    pub fn new(user_id: UserId, permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            user_id,
            permissions: permissions.into_iter().collect(),
        }
    }

    /// A principal holding the wildcard permission (system jobs, imports).
    pub fn superuser(user_id: UserId) -> Self {
        Self::new(user_id, [Permission::WILDCARD])
    }

    pub fn has(&self, required: &Permission) -> bool {
        self.permissions
            .iter()
            .any(|p| p.is_wildcard() || p == required)
    }
}
