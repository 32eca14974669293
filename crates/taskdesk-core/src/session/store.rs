use std::sync::{Arc, Mutex, Weak};

use taskdesk_types::{AuthTokens, UserProfile};

use super::storage::{SessionStorage, keys as storage_keys};
use crate::registry::{Listeners, RequestRegistry, Subscription, keys, lock};

/// An authenticated session. Tokens and user only exist together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub tokens: AuthTokens,
    pub user: UserProfile,
}

struct StoreInner {
    session: Mutex<Option<Session>>,
    listeners: Mutex<Listeners<bool>>,
    storage: Arc<dyn SessionStorage>,
    registry: RequestRegistry,
}

/// Owner of the current session and its auth-state channel.
///
/// Every mutation is written through to the storage backend. Storage
/// failures are logged; the in-memory session stays authoritative.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    /// Creates an unauthenticated store.
    pub fn new(storage: Arc<dyn SessionStorage>, registry: RequestRegistry) -> Self {
        Self::with_session(None, storage, registry)
    }

    /// Rebuilds the session persisted in `storage`.
    ///
    /// A missing or unreadable token or user means unauthenticated; any stale
    /// partial keys are removed.
    pub fn restore(storage: Arc<dyn SessionStorage>, registry: RequestRegistry) -> Self {
        let session = read_session(storage.as_ref());
        if session.is_none() {
            remove_persisted(storage.as_ref());
        }
        tracing::debug!(authenticated = session.is_some(), "session restored");
        Self::with_session(session, storage, registry)
    }

    fn with_session(
        session: Option<Session>,
        storage: Arc<dyn SessionStorage>,
        registry: RequestRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                session: Mutex::new(session),
                listeners: Mutex::new(Listeners::default()),
                storage,
                registry,
            }),
        }
    }

    pub fn registry(&self) -> &RequestRegistry {
        &self.inner.registry
    }

    /// Starts a session, replacing any previous one.
    pub fn save(&self, tokens: AuthTokens, user: UserProfile) {
        {
            let mut session = lock(&self.inner.session);
            persist_session(self.inner.storage.as_ref(), &tokens, &user);
            tracing::info!(user_id = user.id, username = %user.username, "session started");
            *session = Some(Session { tokens, user });
        }

        self.reset_auth_flags();
        self.notify(true);
    }

    /// Ends the session and forgets every request flag.
    pub fn clear(&self) {
        {
            let mut session = lock(&self.inner.session);
            remove_persisted(self.inner.storage.as_ref());
            if session.take().is_some() {
                tracing::info!("session cleared");
            }
        }

        self.inner.registry.reset();
        self.reset_auth_flags();
        self.notify(false);
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        lock(&self.inner.session).as_ref().map(|s| s.user.clone())
    }

    pub fn tokens(&self) -> Option<AuthTokens> {
        lock(&self.inner.session).as_ref().map(|s| s.tokens.clone())
    }

    pub fn snapshot(&self) -> Option<Session> {
        lock(&self.inner.session).clone()
    }

    pub fn is_authenticated(&self) -> bool {
        lock(&self.inner.session).is_some()
    }

    /// Replaces the user after a profile edit. Returns false when there is no
    /// session to update.
    pub fn update_user(&self, user: UserProfile) -> bool {
        let mut session = lock(&self.inner.session);
        let Some(current) = session.as_mut() else {
            return false;
        };
        persist_user(self.inner.storage.as_ref(), &user);
        current.user = user;
        tracing::debug!("session user updated");
        true
    }

    /// Swaps in renewed tokens. Returns false when there is no session.
    pub fn replace_tokens(&self, tokens: AuthTokens) -> bool {
        let mut session = lock(&self.inner.session);
        let Some(current) = session.as_mut() else {
            return false;
        };
        persist_tokens(self.inner.storage.as_ref(), &tokens);
        current.tokens = tokens;
        tracing::debug!("session tokens replaced");
        true
    }

    /// Registers `callback` for every `save` (`true`) and `clear` (`false`).
    pub fn subscribe_auth<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = lock(&self.inner.listeners).add(Arc::new(callback));
        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner.listeners).remove(id);
            }
        })
    }

    fn reset_auth_flags(&self) {
        for key in keys::AUTH_PHASE {
            self.inner.registry.set_loading(key, false);
        }
    }

    fn notify(&self, authenticated: bool) {
        let callbacks = lock(&self.inner.listeners).snapshot();
        for callback in callbacks {
            callback(authenticated);
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

fn read_session(storage: &dyn SessionStorage) -> Option<Session> {
    let read = |key: &str| match storage.get(key) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(key, "Failed to read session storage: {e:#}");
            None
        }
    };

    let access = read(storage_keys::TOKEN)?;
    let raw_user = read(storage_keys::USER)?;
    let user = match serde_json::from_str::<UserProfile>(&raw_user) {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!("Discarding unreadable stored user: {e}");
            return None;
        }
    };
    let refresh = read(storage_keys::REFRESH_TOKEN);

    Some(Session {
        tokens: AuthTokens::new(access, refresh),
        user,
    })
}

fn persist_session(storage: &dyn SessionStorage, tokens: &AuthTokens, user: &UserProfile) {
    let user_json = match serde_json::to_string(user) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("Failed to serialize session user: {e}");
            return;
        }
    };
    write_keys(
        storage,
        &[
            (storage_keys::TOKEN, Some(&tokens.access)),
            (storage_keys::REFRESH_TOKEN, tokens.refresh.as_deref()),
            (storage_keys::USER, Some(&user_json)),
        ],
    );
}

fn persist_tokens(storage: &dyn SessionStorage, tokens: &AuthTokens) {
    write_keys(
        storage,
        &[
            (storage_keys::TOKEN, Some(&tokens.access)),
            (storage_keys::REFRESH_TOKEN, tokens.refresh.as_deref()),
        ],
    );
}

fn persist_user(storage: &dyn SessionStorage, user: &UserProfile) {
    match serde_json::to_string(user) {
        Ok(json) => write_keys(storage, &[(storage_keys::USER, Some(&json))]),
        Err(e) => tracing::warn!("Failed to serialize session user: {e}"),
    }
}

fn remove_persisted(storage: &dyn SessionStorage) {
    write_keys(
        storage,
        &[
            (storage_keys::TOKEN, None),
            (storage_keys::REFRESH_TOKEN, None),
            (storage_keys::USER, None),
        ],
    );
}

/// Commits `changes` as one batch; failures are logged, never surfaced.
fn write_keys(storage: &dyn SessionStorage, changes: &[(&str, Option<&str>)]) {
    if let Err(e) = storage.apply(changes) {
        tracing::warn!("Failed to write session storage: {e:#}");
    }
}
