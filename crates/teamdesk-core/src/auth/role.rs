//! Role model used for page-level authorization.
//!
//! Roles are assigned by the backend at login and never derived on the client.
//! There is no ordering between roles: every check is a set-membership test.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::session::Profile;

/// Privilege level attached to a profile.
///
/// Serialized as the uppercase wire name. Deserialization goes through
/// [`FromStr`], so it accepts the same spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Manager,
    User,
}

impl Role {
    /// Every role, in declaration order.
    pub const ALL: [Role; 3] = [Role::Admin, Role::Manager, Role::User];

    /// Wire identifier as sent by the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Manager => "MANAGER",
            Role::User => "USER",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Role::Admin => 0b001,
            Role::Manager => 0b010,
            Role::User => 0b100,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    /// Case-insensitive. Accepts the legacy `MANAGE` spelling some backend
    /// builds still emit.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "MANAGER" | "MANAGE" => Ok(Role::Manager),
            "USER" => Ok(Role::User),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// A set of roles, as configured on a protected page.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RoleSet(u8);

impl RoleSet {
    /// The set with no roles. Gates treat it as "no restriction".
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every role. This is the default for pages that don't specify one.
    pub fn all() -> Self {
        Role::ALL.into_iter().collect()
    }

    pub fn only(role: Role) -> Self {
        Self(role.bit())
    }

    pub fn insert(&mut self, role: Role) {
        self.0 |= role.bit();
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0 & role.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        Role::ALL.into_iter().filter(move |r| self.contains(*r))
    }

    /// Parse a comma separated list such as `"ADMIN,MANAGER"`.
    pub fn parse_list(s: &str) -> Result<Self, UnknownRole> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Role::from_str)
            .collect()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        let mut set = RoleSet::empty();
        for role in iter {
            set.insert(role);
        }
        set
    }
}

impl fmt::Debug for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(any)");
        }
        let names: Vec<&str> = self.iter().map(|r| r.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

impl Serialize for RoleSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for RoleSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let roles = Vec::<Role>::deserialize(deserializer)?;
        Ok(roles.into_iter().collect())
    }
}

/// Whether `profile` may see content restricted to `required`.
///
/// An empty `required` set means no restriction and always allows. Pages that
/// omit their role list get [`RoleSet::all`], which gives the same answer.
/// This is a rendering convenience only; the backend enforces access on
/// every request.
pub fn has_role(profile: &Profile, required: &RoleSet) -> bool {
    required.is_empty() || required.contains(profile.role)
}
