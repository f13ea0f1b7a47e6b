//! Admin console records as exchanged with the backend.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric identifier of a user.
pub type UserId = u64;
/// Numeric identifier of a password formatter rule.
pub type FormatterId = u64;

/// Console role; each role lands on its own dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full access, including user management.
    Superadmin,
    /// Internal staff member.
    Member,
    /// External client account.
    Client,
}

impl Role {
    /// Lower-case name used in keys and endpoints.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Superadmin => "superadmin",
            Self::Member => "member",
            Self::Client => "client",
        }
    }

    /// True when the role may manage users and formatter rules.
    pub fn can_manage(self) -> bool {
        matches!(self, Self::Superadmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Server id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Sign-in email.
    pub email: String,
    /// Role, which picks the dashboard.
    pub role: Role,
    /// Server-assigned modification time in milliseconds.
    pub updated_at: u64,
}

/// User row of the management screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Server id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Sign-in email.
    pub email: String,
    /// Assigned role.
    pub role: Role,
    /// False once the account is disabled.
    pub is_active: bool,
}

/// Range-mapped prefix rule: characters `start_index..=end_index` of a
/// generated password are replaced by `prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordFormatter {
    /// Server id.
    pub id: FormatterId,
    /// First replaced position.
    pub start_index: u32,
    /// Last replaced position, inclusive.
    pub end_index: u32,
    /// Replacement text.
    pub prefix: String,
    /// Computed by the server; an in-use rule cannot be deleted.
    #[serde(default)]
    pub is_in_use: bool,
}

/// Authenticated session returned by login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Bearer credential for later calls.
    pub token: String,
    /// Signed-in user.
    pub user: UserProfile,
}

/// Counters shown on a role dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    /// Dashboard owner role.
    pub role: Role,
    /// All accounts.
    pub total_users: u64,
    /// Accounts not disabled.
    pub active_users: u64,
    /// All formatter rules.
    pub total_formatters: u64,
    /// Rules currently referenced by the server.
    pub formatters_in_use: u64,
}

/// Plain acknowledgement body such as `{"message": "password updated"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    /// Human-readable status.
    pub message: String,
}
