//! Shared data model for the taskdesk client.
//!
//! Plain serde types exchanged with the backend and held by the session.
//! No I/O, no async.

use serde::{Deserialize, Serialize};

/// Authenticated user identity as returned by the backend `user` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_email: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_in_app: Option<bool>,
}

impl UserProfile {
    /// Name to show in UI: full name when set, otherwise the username.
    pub fn display_name(&self) -> &str {
        match self.full_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.username,
        }
    }
}

/// A user returned by the directory search (assignee / member pickers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

/// Access token plus the optional long-lived refresh credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    /// Short-lived bearer token (JWT)
    pub access: String,
    /// Refresh credential used for silent renewal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

impl AuthTokens {
    pub fn new(access: impl Into<String>, refresh: Option<String>) -> Self {
        Self {
            access: access.into(),
            refresh,
        }
    }
}

/// Notification preferences editable from the settings page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_email: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_in_app: Option<bool>,
}

impl NotificationSettings {
    pub fn is_empty(&self) -> bool {
        self.notify_email.is_none() && self.notify_in_app.is_none()
    }
}
