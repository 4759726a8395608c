//! User model and permission strings

use serde::{Deserialize, Serialize};

use super::entity::impl_versioned;
use super::{Collection, SyncAction, Syncable};
use crate::util::generate_id;

/// Permission strings checked by the domain mutation layer.
pub mod permissions {
    pub const PRODUCT_MANAGE: &str = "product:manage";
    pub const USER_MANAGE: &str = "user:manage";
    pub const SETTINGS_MANAGE: &str = "settings:manage";
    pub const VOID_APPROVE: &str = "void:approve";
    pub const STOCK_APPROVE: &str = "stock:approve";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Manager,
    #[default]
    Cashier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub pin: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Fields supplied when creating a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDraft {
    pub name: String,
    pub pin: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl User {
    #[must_use]
    pub fn from_draft(draft: UserDraft) -> Self {
        Self {
            id: generate_id(),
            name: draft.name,
            pin: draft.pin,
            role: draft.role,
            permissions: draft.permissions,
            version: None,
            updated_at: None,
        }
    }

    /// Admins hold every permission; everyone else needs the explicit string.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.role == Role::Admin || self.permissions.iter().any(|held| held == permission)
    }
}

impl_versioned!(User);

impl Syncable for User {
    const COLLECTION: Collection = Collection::Users;
    const UPSERT_ACTION: SyncAction = SyncAction::User;

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role, permissions: &[&str]) -> User {
        User {
            id: "u1".to_string(),
            name: "Ana".to_string(),
            pin: "1234".to_string(),
            role,
            permissions: permissions.iter().map(|p| (*p).to_string()).collect(),
            version: None,
            updated_at: None,
        }
    }

    #[test]
    fn admin_has_every_permission() {
        assert!(user(Role::Admin, &[]).has_permission(permissions::VOID_APPROVE));
    }

    #[test]
    fn cashier_needs_explicit_permission() {
        let cashier = user(Role::Cashier, &[permissions::STOCK_APPROVE]);
        assert!(cashier.has_permission(permissions::STOCK_APPROVE));
        assert!(!cashier.has_permission(permissions::VOID_APPROVE));
    }

    #[test]
    fn role_uses_screaming_case() {
        let json = serde_json::to_string(&Role::Manager).unwrap();
        assert_eq!(json, "\"MANAGER\"");
    }
}
