//! Auth operations against the taskdesk API.
//!
//! Sign-in flows start a session in the [`SessionStore`]; authenticated calls
//! go through the [`TokenRefresher`] first, and a rejected token ends the
//! session.

use std::time::Duration;

use serde::de::DeserializeOwned;
use taskdesk_types::{NotificationSettings, UserProfile, UserSummary};

use crate::api::{
    ApiClient, ApiResult, AuthResponse, Call, ClientIdResponse, EmailRequest, LoginRequest,
    MessageResponse, PendingRegistration, ProfileResponse, RegisterResponse, ResendOtpRequest,
    ResetPasswordRequest, SearchResponse, SettingsResponse, TokenRequest, VerifyOtpRequest,
    VerifyOtpResponse,
};
use crate::config::Config;
use crate::registry::{RequestRegistry, keys};
use crate::session::{SessionStore, TokenRefresher};

/// Auth API bound to one session.
#[derive(Debug, Clone)]
pub struct AuthService {
    api: ApiClient,
    refresher: TokenRefresher,
    search_limit: u32,
}

impl AuthService {
    pub fn new(api: ApiClient, store: SessionStore, refresh_skew: Duration, search_limit: u32) -> Self {
        let refresher = TokenRefresher::new(api.clone(), store, refresh_skew);
        Self {
            api,
            refresher,
            search_limit,
        }
    }

    pub fn from_config(api: ApiClient, store: SessionStore, config: &Config) -> Self {
        Self::new(api, store, config.refresh_skew(), config.search_limit)
    }

    pub fn store(&self) -> &SessionStore {
        self.refresher.store()
    }

    pub fn registry(&self) -> &RequestRegistry {
        self.api.registry()
    }

    pub fn refresher(&self) -> &TokenRefresher {
        &self.refresher
    }

    /// Signs in with a username or email and starts the session.
    pub async fn login(&self, identifier: &str, password: &str) -> ApiResult<UserProfile> {
        let identifier = identifier.trim();
        let body = LoginRequest {
            username: identifier,
            email: identifier,
            password,
        };
        let response: AuthResponse = self
            .api
            .send(Call::post("/auth/login").json(&body).loading(keys::LOGIN))
            .await?;
        Ok(self.start_session(response))
    }

    /// Starts a registration; the server emails a verification code.
    pub async fn register(&self, registration: &PendingRegistration) -> ApiResult<RegisterResponse> {
        self.api
            .send(
                Call::post("/auth/register")
                    .json(registration)
                    .loading(keys::REGISTER),
            )
            .await
    }

    /// Confirms a registration with the emailed code.
    ///
    /// The session is not touched here; callers decide what to do with any
    /// tokens in the response.
    pub async fn verify_otp(
        &self,
        registration: &PendingRegistration,
        otp: &str,
    ) -> ApiResult<VerifyOtpResponse> {
        let body = VerifyOtpRequest { registration, otp };
        self.api
            .send(
                Call::post("/auth/verify-otp")
                    .json(&body)
                    .loading(keys::VERIFY_OTP),
            )
            .await
    }

    pub async fn resend_otp(&self, email: &str, username: &str) -> ApiResult<String> {
        let body = ResendOtpRequest { email, username };
        let response: MessageResponse = self
            .api
            .send(
                Call::post("/auth/resend-otp")
                    .json(&body)
                    .loading(keys::RESEND_OTP),
            )
            .await?;
        Ok(response.message_or("New OTP sent to your email"))
    }

    pub async fn forgot_password(&self, email: &str) -> ApiResult<String> {
        let response: MessageResponse = self
            .api
            .send(
                Call::post("/auth/forgot-password")
                    .json(&EmailRequest { email })
                    .loading(keys::FORGOT_PASSWORD),
            )
            .await?;
        Ok(response.message_or("If the email exists, a password reset link has been sent"))
    }

    pub async fn verify_reset_token(&self, token: &str) -> ApiResult<String> {
        let response: MessageResponse = self
            .api
            .send(
                Call::post("/auth/verify-reset-token")
                    .json(&TokenRequest { token })
                    .loading(keys::VERIFY_RESET_TOKEN),
            )
            .await?;
        Ok(response.message_or("Reset token is valid"))
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> ApiResult<String> {
        let response: MessageResponse = self
            .api
            .send(
                Call::post("/auth/reset-password")
                    .json(&ResetPasswordRequest {
                        token,
                        new_password,
                    })
                    .loading(keys::RESET_PASSWORD),
            )
            .await?;
        Ok(response.message_or("Password reset successfully"))
    }

    /// Revokes the token server-side and ends the local session.
    ///
    /// The local session is cleared even when the server call fails.
    pub async fn logout(&self) {
        if let Some(tokens) = self.store().tokens() {
            let result = self
                .api
                .send::<MessageResponse>(
                    Call::new(reqwest::Method::DELETE, "/auth/logout")
                        .bearer(&tokens.access)
                        .loading(keys::LOGOUT),
                )
                .await;
            if let Err(e) = result {
                tracing::warn!(kind = %e.kind, "Server logout failed: {e}");
            }
        }
        self.store().clear();
    }

    /// Updates notification preferences and mirrors the change in the session.
    pub async fn update_settings(&self, settings: NotificationSettings) -> ApiResult<String> {
        let response: SettingsResponse = self
            .authorized(
                Call::new(reqwest::Method::PUT, "/auth/settings")
                    .json(&settings)
                    .loading(keys::UPDATE_SETTINGS),
            )
            .await?;

        if let Some(mut user) = self.store().current_user() {
            match &response.user {
                Some(echo) => echo.apply_to(&mut user),
                None => {
                    if settings.notify_email.is_some() {
                        user.notify_email = settings.notify_email;
                    }
                    if settings.notify_in_app.is_some() {
                        user.notify_in_app = settings.notify_in_app;
                    }
                }
            }
            self.store().update_user(user);
        }

        Ok(response
            .msg
            .unwrap_or_else(|| "Settings updated successfully".to_string()))
    }

    /// Fetches the signed-in user's profile and refreshes the session copy.
    pub async fn profile(&self) -> ApiResult<UserProfile> {
        let response: ProfileResponse = self
            .authorized(Call::get("/auth/profile").loading(keys::CURRENT_USER))
            .await?;
        self.store().update_user(response.user.clone());
        Ok(response.user)
    }

    pub async fn google_login(&self, google_token: &str) -> ApiResult<UserProfile> {
        self.google_sign_in("/auth/google-login", keys::GOOGLE_LOGIN, google_token)
            .await
    }

    pub async fn google_register(&self, google_token: &str) -> ApiResult<UserProfile> {
        self.google_sign_in("/auth/google-register", keys::GOOGLE_REGISTER, google_token)
            .await
    }

    async fn google_sign_in(
        &self,
        path: &str,
        key: &'static str,
        google_token: &str,
    ) -> ApiResult<UserProfile> {
        let response: AuthResponse = self
            .api
            .send(
                Call::post(path)
                    .json(&TokenRequest {
                        token: google_token,
                    })
                    .loading(key),
            )
            .await?;
        Ok(self.start_session(response))
    }

    /// Fetches the Google OAuth client id.
    ///
    /// No caching, retries, or loading flag here; see `ClientIdBootstrap`.
    pub async fn fetch_google_client_id(&self) -> ApiResult<String> {
        let response: ClientIdResponse = self.api.send(Call::get("/auth/google-client-id")).await?;
        Ok(response.client_id)
    }

    /// Searches the user directory.
    pub async fn search_users(&self, query: &str) -> ApiResult<Vec<UserSummary>> {
        let response: SearchResponse = self
            .authorized(
                Call::get("/users/search")
                    .query("q", query)
                    .query("limit", self.search_limit)
                    .loading(keys::USERS_SEARCH),
            )
            .await?;
        Ok(response.users)
    }

    fn start_session(&self, response: AuthResponse) -> UserProfile {
        let tokens = response.tokens();
        self.store().save(tokens, response.user.clone());
        response.user
    }

    /// Sends `call` with a valid bearer token.
    async fn authorized<T: DeserializeOwned>(&self, call: Call<'_>) -> ApiResult<T> {
        let token = self.refresher.ensure_valid().await?;
        let result = self.api.send(call.bearer(&token)).await;
        if let Err(e) = &result
            && e.is_unauthenticated()
        {
            tracing::info!("token rejected by server; ending session");
            self.store().clear();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use taskdesk_types::AuthTokens;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::api::ApiErrorKind;
    use crate::session::MemoryStorage;
    use crate::session::jwt::token_expiring_in;

    fn service(server: &MockServer) -> AuthService {
        let registry = RequestRegistry::new();
        let store = SessionStore::new(Arc::new(MemoryStorage::new()), registry.clone());
        let api = ApiClient::new(&server.uri(), None, registry).unwrap();
        AuthService::new(api, store, Duration::from_secs(60), 10)
    }

    fn signed_in(service: &AuthService, access: &str) {
        let user = serde_json::from_value(json!({
            "id": 1, "username": "ana", "email": "ana@example.com", "notify_email": true
        }))
        .unwrap();
        service.store().save(
            AuthTokens::new(access, Some(token_expiring_in(86_400))),
            user,
        );
    }

    #[tokio::test]
    async fn test_login_starts_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(json!({
                "username": "ana@example.com",
                "email": "ana@example.com",
                "password": "Secret123"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "refresh_token": "refresh",
                "user": {"id": 1, "username": "ana", "email": "ana@example.com"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = service(&server);
        service.registry().set_loading(keys::REGISTER, true);

        let user = service.login(" ana@example.com ", "Secret123").await.unwrap();

        assert_eq!(user.username, "ana");
        assert!(service.store().is_authenticated());
        assert_eq!(
            service.store().tokens().unwrap(),
            AuthTokens::new("access", Some("refresh".into()))
        );
        assert!(!service.registry().is_any_loading());
    }

    #[tokio::test]
    async fn test_invalid_credentials_leave_session_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"msg": "Invalid credentials"})),
            )
            .mount(&server)
            .await;

        let service = service(&server);
        let err = service.login("ana", "wrong").await.unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::Unauthenticated);
        assert_eq!(err.to_string(), "Invalid credentials");
        assert!(!service.store().is_authenticated());
        assert!(!service.registry().is_loading(keys::LOGIN));
    }

    #[tokio::test]
    async fn test_logout_clears_session_even_when_server_fails() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/auth/logout"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let service = service(&server);
        signed_in(&service, "access");

        service.logout().await;

        assert!(!service.store().is_authenticated());
    }

    #[tokio::test]
    async fn test_update_settings_mirrors_echo_into_session() {
        let server = MockServer::start().await;
        let access = token_expiring_in(3600);
        Mock::given(method("PUT"))
            .and(path("/auth/settings"))
            .and(header("authorization", format!("Bearer {access}").as_str()))
            .and(body_json(json!({"notify_email": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "msg": "Settings updated successfully",
                "user": {"notify_email": false, "notify_in_app": true, "profile_picture": null}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = service(&server);
        signed_in(&service, &access);

        let msg = service
            .update_settings(NotificationSettings {
                notify_email: Some(false),
                notify_in_app: None,
            })
            .await
            .unwrap();

        assert_eq!(msg, "Settings updated successfully");
        let user = service.store().current_user().unwrap();
        assert_eq!(user.notify_email, Some(false));
        assert_eq!(user.notify_in_app, Some(true));
    }

    #[tokio::test]
    async fn test_rejected_token_ends_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/profile"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"msg": "Token has expired"})),
            )
            .mount(&server)
            .await;

        let service = service(&server);
        signed_in(&service, &token_expiring_in(3600));

        let err = service.profile().await.unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::Unauthenticated);
        assert!(!service.store().is_authenticated());
    }

    #[tokio::test]
    async fn test_authorized_call_refreshes_stale_token_first() {
        let server = MockServer::start().await;
        let renewed = token_expiring_in(3600);
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": renewed})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/search"))
            .and(query_param("q", "ali"))
            .and(query_param("limit", "10"))
            .and(header("authorization", format!("Bearer {renewed}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "users": [{"id": 2, "username": "alice", "email": "alice@example.com"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = service(&server);
        signed_in(&service, &token_expiring_in(5));

        let users = service.search_users("ali").await.unwrap();

        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "alice");
    }

    #[tokio::test]
    async fn test_google_client_id_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/google-client-id"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"client_id": "abc.apps"})),
            )
            .mount(&server)
            .await;

        assert_eq!(
            service(&server).fetch_google_client_id().await.unwrap(),
            "abc.apps"
        );
    }
}
