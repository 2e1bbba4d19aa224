use rocket::http::Status;
use serde::Serialize;

use super::{Permission, Role};
use crate::models::{Principal, Staff};

/// The authenticated account behind a request. Core operations receive its
/// id explicitly.
#[derive(Debug, Serialize, Clone)]
pub struct Actor {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
}

impl From<Staff> for Actor {
    fn from(staff: Staff) -> Self {
        Self {
            id: staff.id,
            username: staff.username,
            display_name: staff.name,
            role: Role::Staff,
        }
    }
}

impl From<Principal> for Actor {
    fn from(principal: Principal) -> Self {
        Self {
            id: principal.id,
            display_name: principal.username.clone(),
            username: principal.username,
            role: Role::Principal,
        }
    }
}

impl Actor {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), Status> {
        if self.role.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                username = %self.username,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(Status::Forbidden)
        }
    }
}
