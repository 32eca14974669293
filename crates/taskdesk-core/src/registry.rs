//! Request-state registry.
//!
//! Tracks which named operations are in flight and pushes every change to the
//! observers subscribed to that operation key. A key that was never set reads
//! as `false`.
//!
//! Callbacks run synchronously, in subscription order, after the registry lock
//! has been released, so a callback may read or update the registry itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Canonical operation keys used by the auth and search flows.
pub mod keys {
    pub const LOGIN: &str = "auth-login";
    pub const REGISTER: &str = "auth-register";
    pub const VERIFY_OTP: &str = "auth-verify-otp";
    pub const RESEND_OTP: &str = "auth-resend-otp";
    pub const FORGOT_PASSWORD: &str = "auth-forgot-password";
    pub const VERIFY_RESET_TOKEN: &str = "auth-verify-reset-token";
    pub const RESET_PASSWORD: &str = "auth-reset-password";
    pub const LOGOUT: &str = "auth-logout";
    pub const UPDATE_SETTINGS: &str = "auth-update-settings";
    pub const GOOGLE_LOGIN: &str = "auth-google-login";
    pub const GOOGLE_REGISTER: &str = "auth-google-register";
    pub const GOOGLE_CLIENT_ID: &str = "auth-google-client-id";
    pub const CURRENT_USER: &str = "auth-get-current-user";
    pub const USERS_SEARCH: &str = "users-search";

    /// Flags reset to `false` whenever a session starts or ends.
    pub const AUTH_PHASE: [&str; 8] = [
        LOGIN,
        REGISTER,
        VERIFY_OTP,
        RESEND_OTP,
        FORGOT_PASSWORD,
        RESET_PASSWORD,
        LOGOUT,
        UPDATE_SETTINGS,
    ];
}

pub(crate) type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered callback list with stable ids for removal.
pub(crate) struct Listeners<T> {
    entries: Vec<(u64, Callback<T>)>,
    next_id: u64,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }
}

impl<T> Listeners<T> {
    pub(crate) fn add(&mut self, callback: Callback<T>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, callback));
        id
    }

    pub(crate) fn remove(&mut self, id: u64) {
        self.entries.retain(|(entry_id, _)| *entry_id != id);
    }

    /// Clones the current callbacks so they can be invoked without holding a lock.
    pub(crate) fn snapshot(&self) -> Vec<Callback<T>> {
        self.entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Handle returned by `subscribe`; removes exactly one callback.
///
/// Dropping the handle keeps the callback registered.
#[must_use = "keep the Subscription to be able to unsubscribe"]
pub struct Subscription {
    remove: Box<dyn Fn() + Send + Sync>,
}

impl Subscription {
    pub(crate) fn new(remove: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            remove: Box::new(remove),
        }
    }

    /// Removes the callback. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        (self.remove)();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryInner {
    flags: HashMap<String, bool>,
    listeners: HashMap<String, Listeners<bool>>,
}

/// Shared registry of in-flight operation flags.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct RequestRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag for `key` and notifies its subscribers with the new value.
    pub fn set_loading(&self, key: &str, is_loading: bool) {
        let callbacks = {
            let mut inner = lock(&self.inner);
            inner.flags.insert(key.to_string(), is_loading);
            inner
                .listeners
                .get(key)
                .map(Listeners::snapshot)
                .unwrap_or_default()
        };

        tracing::trace!(key, is_loading, listeners = callbacks.len(), "request flag");
        for callback in callbacks {
            callback(is_loading);
        }
    }

    /// Returns the last value set for `key`, or `false` if never set.
    pub fn is_loading(&self, key: &str) -> bool {
        lock(&self.inner).flags.get(key).copied().unwrap_or(false)
    }

    pub fn is_any_loading(&self) -> bool {
        lock(&self.inner).flags.values().any(|loading| *loading)
    }

    /// Registers `callback` for changes to `key`.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = lock(&self.inner)
            .listeners
            .entry(key.to_string())
            .or_default()
            .add(Arc::new(callback));

        let weak: Weak<Mutex<RegistryInner>> = Arc::downgrade(&self.inner);
        let key = key.to_string();
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade()
                && let Some(listeners) = lock(&inner).listeners.get_mut(&key)
            {
                listeners.remove(id);
            }
        })
    }

    /// Forgets every flag. Subscriptions survive and are not notified.
    pub fn reset(&self) {
        lock(&self.inner).flags.clear();
        tracing::debug!("request flags reset");
    }

    /// Marks `key` as loading until the returned guard is dropped.
    pub fn begin(&self, key: &str) -> LoadingGuard {
        self.set_loading(key, true);
        LoadingGuard {
            registry: self.clone(),
            key: key.to_string(),
        }
    }

    #[cfg(test)]
    fn listener_count(&self, key: &str) -> usize {
        lock(&self.inner)
            .listeners
            .get(key)
            .map_or(0, Listeners::len)
    }
}

impl std::fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("RequestRegistry")
            .field("flags", &inner.flags)
            .finish_non_exhaustive()
    }
}

/// Resets its flag to `false` when dropped.
///
/// Covers the success path, the error path, and a future dropped mid-request.
#[must_use = "the flag is cleared as soon as the guard is dropped"]
pub struct LoadingGuard {
    registry: RequestRegistry,
    key: String,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.registry.set_loading(&self.key, false);
    }
}
