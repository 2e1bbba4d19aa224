use anyhow::Error;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewDashboard,
    ViewTeams,

    RegisterStudents,

    ManageTeamLeaders,
    ReassignStudents,
    ExportRosters,
    AuditRosters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Staff,
    Principal,
}

static COMMON_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewDashboard);
    permissions.insert(Permission::ViewTeams);

    permissions
});

static STAFF_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(COMMON_PERMISSIONS.iter().copied());

    permissions.insert(Permission::RegisterStudents);

    permissions
});

static PRINCIPAL_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(COMMON_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ManageTeamLeaders);
    permissions.insert(Permission::ReassignStudents);
    permissions.insert(Permission::ExportRosters);
    permissions.insert(Permission::AuditRosters);

    permissions
});

impl Role {
    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Staff => &STAFF_PERMISSIONS,
            Role::Principal => &PRINCIPAL_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Staff => "staff",
            Role::Principal => "principal",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "staff" => Ok(Role::Staff),
            "principal" => Ok(Role::Principal),
            _ => Err(Error::msg(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
