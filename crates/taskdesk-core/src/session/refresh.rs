use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use taskdesk_types::AuthTokens;

use super::jwt;
use super::store::SessionStore;
use crate::api::{ApiClient, ApiError, ApiErrorKind, ApiResult, Call, RefreshResponse};
use crate::registry::lock;

type PendingRefresh = Shared<BoxFuture<'static, ApiResult<String>>>;

struct RefresherInner {
    api: ApiClient,
    store: SessionStore,
    skew: Duration,
    in_flight: Mutex<Option<PendingRefresh>>,
}

/// Silent renewal of the access token.
///
/// Concurrent callers that find the token near expiry share one refresh
/// call. A failed refresh ends the session.
#[derive(Clone)]
pub struct TokenRefresher {
    inner: Arc<RefresherInner>,
}

impl TokenRefresher {
    pub fn new(api: ApiClient, store: SessionStore, skew: Duration) -> Self {
        Self {
            inner: Arc::new(RefresherInner {
                api,
                store,
                skew,
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    /// Returns an access token that is not about to expire.
    ///
    /// # Errors
    /// Returns `Unauthenticated` when there is no session or the refresh
    /// fails; in the latter case the session has been cleared.
    pub async fn ensure_valid(&self) -> ApiResult<String> {
        let Some(tokens) = self.inner.store.tokens() else {
            return Err(ApiError::unauthenticated("Not signed in"));
        };

        if !jwt::expires_within(&tokens.access, self.inner.skew) {
            return Ok(tokens.access);
        }

        self.pending_refresh().await
    }

    /// Joins the refresh in flight, or starts one.
    fn pending_refresh(&self) -> PendingRefresh {
        let mut slot = lock(&self.inner.in_flight);
        if let Some(pending) = slot.as_ref() {
            tracing::debug!("joining token refresh in flight");
            return pending.clone();
        }

        let this = self.clone();
        let pending = async move {
            let result = this.refresh().await;
            lock(&this.inner.in_flight).take();
            result
        }
        .boxed()
        .shared();
        *slot = Some(pending.clone());
        pending
    }

    async fn refresh(&self) -> ApiResult<String> {
        let store = &self.inner.store;
        let Some(tokens) = store.tokens() else {
            return Err(ApiError::unauthenticated("Not signed in"));
        };

        let refresh_token = match tokens.refresh {
            Some(token) if !jwt::is_expired(&token) => token,
            _ => {
                tracing::info!("refresh token missing or expired; ending session");
                store.clear();
                return Err(ApiError::unauthenticated(
                    "Session expired. Please sign in again.",
                ));
            }
        };

        tracing::debug!(token = %jwt::mask_token(&refresh_token), "refreshing access token");
        let response = self
            .inner
            .api
            .send::<RefreshResponse>(Call::post("/auth/refresh").bearer(&refresh_token))
            .await;

        match response {
            Ok(renewed) => {
                let access = renewed.access_token;
                let tokens = AuthTokens::new(
                    access.clone(),
                    renewed.refresh_token.or(Some(refresh_token)),
                );
                if store.replace_tokens(tokens) {
                    tracing::info!("access token refreshed");
                    Ok(access)
                } else {
                    Err(ApiError::unauthenticated("Signed out during token refresh"))
                }
            }
            Err(e) => {
                tracing::warn!(kind = %e.kind, "Token refresh failed: {e}");
                store.clear();
                Err(ApiError {
                    kind: ApiErrorKind::Unauthenticated,
                    message: format!("Session expired: {}", e.message),
                    status: e.status,
                })
            }
        }
    }
}

impl std::fmt::Debug for TokenRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefresher")
            .field("skew", &self.inner.skew)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures_util::future::join_all;
    use serde_json::json;
    use taskdesk_types::UserProfile;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::registry::RequestRegistry;
    use crate::session::MemoryStorage;
    use crate::session::jwt::token_expiring_in;

    fn user() -> UserProfile {
        serde_json::from_value(json!({"id": 1, "username": "ana", "email": "ana@example.com"}))
            .unwrap()
    }

    fn refresher(server: &MockServer) -> TokenRefresher {
        let registry = RequestRegistry::new();
        let store = SessionStore::new(Arc::new(MemoryStorage::new()), registry.clone());
        let api = ApiClient::new(&server.uri(), None, registry).unwrap();
        TokenRefresher::new(api, store, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_fresh_token_returned_without_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let refresher = refresher(&server);
        let access = token_expiring_in(3600);
        refresher
            .store()
            .save(AuthTokens::new(access.clone(), Some(token_expiring_in(86_400))), user());

        assert_eq!(refresher.ensure_valid().await.unwrap(), access);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let server = MockServer::start().await;
        let refresh = token_expiring_in(86_400);
        let renewed = token_expiring_in(3600);
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(header("authorization", format!("Bearer {refresh}").as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": renewed, "refresh_token": "rotated"}))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let refresher = refresher(&server);
        refresher
            .store()
            .save(AuthTokens::new(token_expiring_in(10), Some(refresh)), user());

        let results = join_all((0..5).map(|_| refresher.ensure_valid())).await;

        for result in results {
            assert_eq!(result.unwrap(), renewed);
        }
        let tokens = refresher.store().tokens().unwrap();
        assert_eq!(tokens.access, renewed);
        assert_eq!(tokens.refresh.as_deref(), Some("rotated"));
        assert!(lock(&refresher.inner.in_flight).is_none());
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token_without_rotation() {
        let server = MockServer::start().await;
        let refresh = token_expiring_in(86_400);
        let renewed = token_expiring_in(3600);
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": renewed})))
            .mount(&server)
            .await;

        let refresher = refresher(&server);
        refresher
            .store()
            .save(AuthTokens::new("opaque", Some(refresh.clone())), user());

        assert_eq!(refresher.ensure_valid().await.unwrap(), renewed);
        assert_eq!(refresher.store().tokens().unwrap().refresh, Some(refresh));
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_session_for_all_waiters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"msg": "Token has been revoked"}))
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let refresher = refresher(&server);
        refresher.store().save(
            AuthTokens::new(token_expiring_in(0), Some(token_expiring_in(86_400))),
            user(),
        );

        let results = join_all((0..3).map(|_| refresher.ensure_valid())).await;

        for result in results {
            let err = result.unwrap_err();
            assert_eq!(err.kind, ApiErrorKind::Unauthenticated);
            assert!(err.message.contains("Token has been revoked"));
        }
        assert!(!refresher.store().is_authenticated());
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let refresher = refresher(&server);
        refresher.store().save(
            AuthTokens::new(token_expiring_in(0), Some(token_expiring_in(86_400))),
            user(),
        );

        let err = refresher.ensure_valid().await.unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Unauthenticated);
        assert!(!refresher.store().is_authenticated());
    }

    #[tokio::test]
    async fn test_missing_or_expired_refresh_token_clears_without_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let refresher = refresher(&server);
        for refresh in [None, Some("not-a-jwt".to_string())] {
            refresher
                .store()
                .save(AuthTokens::new(token_expiring_in(5), refresh), user());

            let err = refresher.ensure_valid().await.unwrap_err();
            assert_eq!(err.kind, ApiErrorKind::Unauthenticated);
            assert!(!refresher.store().is_authenticated());
        }
    }

    #[tokio::test]
    async fn test_no_session_is_unauthenticated() {
        let server = MockServer::start().await;
        let err = refresher(&server).ensure_valid().await.unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn test_later_expiry_starts_new_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": token_expiring_in(30)})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let refresher = refresher(&server);
        refresher.store().save(
            AuthTokens::new(token_expiring_in(0), Some(token_expiring_in(86_400))),
            user(),
        );

        // The renewed token is itself inside the skew window.
        refresher.ensure_valid().await.unwrap();
        refresher.ensure_valid().await.unwrap();
    }
}
