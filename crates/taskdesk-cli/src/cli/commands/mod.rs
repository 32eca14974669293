//! CLI command handlers.

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod otp;
pub mod search;

use std::sync::Arc;

use anyhow::{Context, Result};
use taskdesk_core::api::ApiClient;
use taskdesk_core::auth::AuthService;
use taskdesk_core::config::Config;
use taskdesk_core::registry::RequestRegistry;
use taskdesk_core::session::{FileStorage, SessionStore};

/// Everything a session command needs, wired from the loaded config.
pub struct App {
    pub config: Config,
    pub auth: AuthService,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let registry = RequestRegistry::new();
        let storage = FileStorage::default_location();
        tracing::debug!(path = %storage.path().display(), "restoring session");
        let store = SessionStore::restore(Arc::new(storage), registry.clone());
        let api = ApiClient::from_config(&config, registry).context("create API client")?;
        let auth = AuthService::from_config(api, store, &config);
        Ok(Self { config, auth })
    }

    pub fn store(&self) -> &SessionStore {
        self.auth.store()
    }
}
