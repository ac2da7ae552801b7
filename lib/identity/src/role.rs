//! Local role model.
//!
//! The directory stores role names as strings. The sign-in flow only needs to
//! know whether a user holds administrative capability, which decides whether
//! the admin policy is required.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A role a local user can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Ordinary signed-in user.
    Subscriber,
    /// Administrator; must sign in with the admin policy.
    Administrator,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscriber => "subscriber",
            Self::Administrator => "administrator",
        }
    }

    /// Parses a stored role name. Unrecognized names carry no capability.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "subscriber" => Some(Self::Subscriber),
            "administrator" => Some(Self::Administrator),
            _ => None,
        }
    }

    /// Returns true if this role has admin privileges.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Administrator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The roles held by one local user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSet {
    roles: Vec<Role>,
}

impl RoleSet {
    /// No roles.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// The role newly provisioned users receive.
    #[must_use]
    pub fn subscriber() -> Self {
        Self {
            roles: vec![Role::Subscriber],
        }
    }

    #[must_use]
    pub fn administrator() -> Self {
        Self {
            roles: vec![Role::Administrator],
        }
    }

    /// Builds a set from stored role names, skipping unknown and duplicate names.
    #[must_use]
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut roles = Vec::new();
        for role in names.iter().filter_map(|n| Role::from_name(n.as_ref())) {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
        Self { roles }
    }

    /// True if any held role is administrative.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(Role::is_admin)
    }

    #[must_use]
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Role names for storage.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.as_str().to_string()).collect()
    }
}
