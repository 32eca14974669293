//! Request and response payloads of the taskdesk REST API.

use serde::{Deserialize, Serialize};
use taskdesk_types::{AuthTokens, UserProfile, UserSummary};

/// Registration details kept until the emailed code is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRegistration {
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    /// The backend matches the identifier against username, then email.
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct VerifyOtpRequest<'a> {
    #[serde(flatten)]
    pub registration: &'a PendingRegistration,
    pub otp: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResendOtpRequest<'a> {
    pub email: &'a str,
    pub username: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct EmailRequest<'a> {
    pub email: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct TokenRequest<'a> {
    pub token: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResetPasswordRequest<'a> {
    pub token: &'a str,
    pub new_password: &'a str,
}

/// Plain acknowledgement carrying a human-readable message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub msg: Option<String>,
}

impl MessageResponse {
    pub fn message_or(&self, fallback: &str) -> String {
        self.msg.clone().unwrap_or_else(|| fallback.to_string())
    }
}

/// Successful sign-in: a token pair and the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: UserProfile,
}

impl AuthResponse {
    pub fn tokens(&self) -> AuthTokens {
        AuthTokens::new(self.access_token.clone(), self.refresh_token.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Answer to a verification attempt.
///
/// Some backends sign the user in directly; others only confirm the account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VerifyOtpResponse {
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl VerifyOtpResponse {
    /// The session to start, when the backend signed the user in.
    pub fn into_session(self) -> Option<(AuthTokens, UserProfile)> {
        match (self.access_token, self.user) {
            (Some(access), Some(user)) => Some((AuthTokens::new(access, self.refresh_token), user)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Fields the settings endpoint echoes back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SettingsEcho {
    #[serde(default)]
    pub notify_email: Option<bool>,
    #[serde(default)]
    pub notify_in_app: Option<bool>,
    #[serde(default)]
    pub profile_picture: Option<String>,
}

impl SettingsEcho {
    /// Applies the echoed fields to `user`, keeping anything not echoed.
    pub fn apply_to(&self, user: &mut UserProfile) {
        if self.notify_email.is_some() {
            user.notify_email = self.notify_email;
        }
        if self.notify_in_app.is_some() {
            user.notify_in_app = self.notify_in_app;
        }
        if self.profile_picture.is_some() {
            user.profile_picture.clone_from(&self.profile_picture);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SettingsResponse {
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub user: Option<SettingsEcho>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProfileResponse {
    pub user: UserProfile,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ClientIdResponse {
    pub client_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub users: Vec<UserSummary>,
}
