use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::role::Role;

/// Storage key the session record lives under.
pub const SESSION_KEY: &str = "teamdesk.session";

/// Cached profile is considered stale after this many minutes.
/// Roles change rarely, so an hour keeps `/users/me/` traffic low.
const PROFILE_STALE_MINUTES: i64 = 60;

/// Logged-in user as described by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(alias = "user_id", deserialize_with = "string_or_number")]
    pub user_id: String,
    #[serde(alias = "full_name", default)]
    pub full_name: String,
    pub email: String,
    pub role: Role,
    #[serde(alias = "avatar_url", alias = "avatar", default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Profile {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Managers and admins both see manager pages.
    pub fn is_manager(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Manager)
    }

    /// Name for display, falling back to the email address.
    pub fn display_name(&self) -> &str {
        if self.full_name.trim().is_empty() {
            &self.email
        } else {
            &self.full_name
        }
    }
}

/// Backends disagree on whether ids are strings or integers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Persisted session record: credential plus cached profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub token: String,
    pub profile: Profile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl SessionData {
    pub fn new(token: String, profile: Profile) -> Self {
        Self {
            token,
            profile,
            saved_at: Some(Utc::now()),
        }
    }

    /// Whether the cached profile should be refreshed from the backend.
    /// Records written without a timestamp are always stale.
    pub fn needs_refresh(&self) -> bool {
        match self.saved_at {
            Some(saved_at) => Utc::now() > saved_at + Duration::minutes(PROFILE_STALE_MINUTES),
            None => true,
        }
    }

    /// Minutes since the profile was last written (for display)
    pub fn profile_age_minutes(&self) -> Option<i64> {
        self.saved_at
            .map(|saved_at| (Utc::now() - saved_at).num_minutes().max(0))
    }

    pub(crate) fn is_well_formed(&self) -> bool {
        !self.token.trim().is_empty() && !self.profile.user_id.trim().is_empty()
    }
}

/// Whether a visitor is logged in, and as whom.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Session {
    #[default]
    Unauthenticated,
    Authenticated(SessionData),
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Session::Authenticated(_))
    }

    pub fn data(&self) -> Option<&SessionData> {
        match self {
            Session::Authenticated(data) => Some(data),
            Session::Unauthenticated => None,
        }
    }

    /// Bearer token if logged in
    pub fn token(&self) -> Option<&str> {
        self.data().map(|d| d.token.as_str())
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.data().map(|d| &d.profile)
    }
}
