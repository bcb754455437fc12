//! Which roles each dashboard path requires.
//!
//! Rules are path prefixes checked in order; the first match wins. Paths
//! with no matching rule are open to any logged-in role.

use serde::{Deserialize, Serialize};

use crate::auth::{Role, RoleSet};
use crate::gate::{Gate, GuestGate, RouteGate};

/// Where the gates send people.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteTargets {
    pub login: String,
    pub unauthorized: String,
    pub home: String,
}

impl Default for RouteTargets {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            unauthorized: "/unauthorized".to_string(),
            home: "/home".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub prefix: String,
    pub roles: RoleSet,
}

impl RouteRule {
    pub fn new(prefix: &str, roles: RoleSet) -> Self {
        Self {
            prefix: normalize(prefix).to_string(),
            roles,
        }
    }

    /// Prefix match on whole path segments: `/admin` covers `/admin/users`
    /// but not `/administration`.
    fn matches(&self, path: &str) -> bool {
        let prefix = normalize(&self.prefix);
        if prefix == "/" {
            return true;
        }
        path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Missing fields fall back to [`RoutePolicy::default`], so a config that
/// only moves the targets keeps the built-in admin rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutePolicy {
    pub targets: RouteTargets,
    pub rules: Vec<RouteRule>,
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self {
            targets: RouteTargets::default(),
            rules: vec![RouteRule::new("/admin", RoleSet::only(Role::Admin))],
        }
    }
}

impl RoutePolicy {
    pub fn new(targets: RouteTargets, rules: Vec<RouteRule>) -> Self {
        Self { targets, rules }
    }

    /// Roles needed for `path`; every role when no rule matches.
    pub fn required_roles(&self, path: &str) -> RoleSet {
        let path = normalize(path);
        self.rules
            .iter()
            .find(|rule| rule.matches(path))
            .map(|rule| rule.roles)
            .unwrap_or_else(RoleSet::all)
    }

    /// The gate a page at `path` should render behind.
    pub fn gate_for(&self, path: &str) -> Gate {
        let path = normalize(path);
        if path == "/" {
            return Gate::Redirect(self.targets.login.clone());
        }
        if path == normalize(&self.targets.login) {
            return Gate::Guest(GuestGate::new(self.targets.clone()));
        }
        Gate::Protected(RouteGate::new(self.required_roles(path), self.targets.clone()))
    }
}

/// Drop query, fragment and trailing slash.
fn normalize(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let path = path[..end].trim_end_matches('/');
    if path.is_empty() {
        "/"
    } else {
        path
    }
}
