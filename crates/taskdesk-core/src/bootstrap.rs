//! Third-party sign-in bootstrap: fetching the Google OAuth client id.
//!
//! A fetched id is cached for `cache_ttl`. After a failed run, new fetches
//! are refused until `error_cooldown` has passed.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::api::ApiResult;
use crate::auth::AuthService;
use crate::config::BootstrapConfig;
use crate::registry::{RequestRegistry, keys};
use crate::retry::{Retrier, RetryError, RetryPolicy};

/// Where the client id comes from.
pub trait ClientIdSource: Send + Sync {
    fn fetch_client_id(&self) -> impl Future<Output = ApiResult<String>> + Send;
}

impl ClientIdSource for AuthService {
    fn fetch_client_id(&self) -> impl Future<Output = ApiResult<String>> + Send {
        self.fetch_google_client_id()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    /// A recent failure blocks new fetches for `retry_in`
    CoolingDown { retry_in: Duration },
    Failed(RetryError),
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapError::CoolingDown { retry_in } => write!(
                f,
                "Google client ID unavailable. Retry in {} seconds.",
                ceil_secs(*retry_in)
            ),
            BootstrapError::Failed(e) => write!(f, "Google sign-in unavailable: {e}"),
        }
    }
}

impl std::error::Error for BootstrapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BootstrapError::Failed(e) => Some(e),
            BootstrapError::CoolingDown { .. } => None,
        }
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

#[derive(Debug, Default)]
struct CacheState {
    client_id: Option<(String, Instant)>,
    last_error: Option<Instant>,
}

/// Cached, retried access to the Google OAuth client id.
#[derive(Debug)]
pub struct ClientIdBootstrap<S = AuthService> {
    source: S,
    retrier: Retrier,
    cache_ttl: Duration,
    error_cooldown: Duration,
    // Held across the fetch so concurrent callers share one run.
    state: Mutex<CacheState>,
}

impl<S: ClientIdSource> ClientIdBootstrap<S> {
    pub fn new(source: S, config: &BootstrapConfig, registry: RequestRegistry) -> Self {
        let retrier = Retrier::new(RetryPolicy::from_config(config))
            .with_flag(registry, keys::GOOGLE_CLIENT_ID);
        Self {
            source,
            retrier,
            cache_ttl: config.cache_ttl(),
            error_cooldown: config.error_cooldown(),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn retrier(&self) -> &Retrier {
        &self.retrier
    }

    /// Returns the client id, fetching it when the cache is empty or stale.
    ///
    /// # Errors
    /// Returns `CoolingDown` during the cooldown after a failure, or the
    /// retry outcome when the fetch fails.
    pub async fn client_id(&self) -> Result<String, BootstrapError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if let Some((client_id, fetched_at)) = &state.client_id
            && now.duration_since(*fetched_at) <= self.cache_ttl
        {
            return Ok(client_id.clone());
        }

        if let Some(failed_at) = state.last_error {
            let elapsed = now.duration_since(failed_at);
            if elapsed < self.error_cooldown {
                let retry_in = self.error_cooldown - elapsed;
                tracing::debug!(retry_in_secs = ceil_secs(retry_in), "client id fetch cooling down");
                return Err(BootstrapError::CoolingDown { retry_in });
            }
        }

        match self.retrier.run(|_| self.source.fetch_client_id()).await {
            Ok(client_id) => {
                tracing::info!("Google client id fetched");
                state.client_id = Some((client_id.clone(), Instant::now()));
                state.last_error = None;
                Ok(client_id)
            }
            Err(e) => {
                tracing::warn!("Google client id unavailable: {e}");
                state.client_id = None;
                state.last_error = Some(Instant::now());
                Err(BootstrapError::Failed(e))
            }
        }
    }

    /// Forgets the cached id and any cooldown, so the next call fetches.
    pub async fn invalidate(&self) {
        *self.state.lock().await = CacheState::default();
    }
}
