//! HTTP client for the taskdesk REST API.
//!
//! Every call can be tied to a request-registry key; the flag is raised for
//! the lifetime of the call and lowered on success, failure, or cancellation.

mod error;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
pub use error::{ApiError, ApiErrorKind, ApiResult};
use reqwest::Method;
use reqwest::header::ACCEPT;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
pub(crate) use types::{
    ClientIdResponse, EmailRequest, LoginRequest, ProfileResponse, RefreshResponse,
    ResendOtpRequest, ResetPasswordRequest, SearchResponse, TokenRequest, VerifyOtpRequest,
};
pub use types::{
    AuthResponse, MessageResponse, PendingRegistration, RegisterResponse, SettingsEcho,
    SettingsResponse, VerifyOtpResponse,
};

use crate::config::Config;
use crate::registry::RequestRegistry;

/// One outgoing API call.
#[derive(Debug)]
pub(crate) struct Call<'a> {
    method: Method,
    path: &'a str,
    loading_key: Option<&'static str>,
    bearer: Option<&'a str>,
    query: Vec<(&'static str, String)>,
    body: Option<Result<Value, String>>,
}

impl<'a> Call<'a> {
    pub(crate) fn new(method: Method, path: &'a str) -> Self {
        Self {
            method,
            path,
            loading_key: None,
            bearer: None,
            query: Vec::new(),
            body: None,
        }
    }

    pub(crate) fn get(path: &'a str) -> Self {
        Self::new(Method::GET, path)
    }

    pub(crate) fn post(path: &'a str) -> Self {
        Self::new(Method::POST, path)
    }

    pub(crate) fn loading(mut self, key: &'static str) -> Self {
        self.loading_key = Some(key);
        self
    }

    pub(crate) fn bearer(mut self, token: &'a str) -> Self {
        self.bearer = Some(token);
        self
    }

    pub(crate) fn query(mut self, name: &'static str, value: impl ToString) -> Self {
        self.query.push((name, value.to_string()));
        self
    }

    pub(crate) fn json(mut self, body: &impl Serialize) -> Self {
        self.body = Some(serde_json::to_value(body).map_err(|e| e.to_string()));
        self
    }
}

/// Cheap-to-clone handle to the API.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Arc<str>,
    registry: RequestRegistry,
}

impl ApiClient {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        timeout: Option<Duration>,
        registry: RequestRegistry,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            registry,
        })
    }

    /// Creates a client from the effective configuration.
    ///
    /// # Errors
    /// Returns an error if the configured URL is invalid.
    pub fn from_config(config: &Config, registry: RequestRegistry) -> Result<Self> {
        let base_url = config.effective_api_url()?;
        Self::new(&base_url, config.request_timeout(), registry)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn registry(&self) -> &RequestRegistry {
        &self.registry
    }

    /// Sends `call` and decodes the JSON response.
    ///
    /// An empty success body decodes as `{}`.
    pub(crate) async fn send<T: DeserializeOwned>(&self, call: Call<'_>) -> ApiResult<T> {
        let _guard = call.loading_key.map(|key| self.registry.begin(key));

        let url = format!("{}{}", self.base_url, call.path);
        let mut request = self
            .http
            .request(call.method.clone(), &url)
            .header(ACCEPT, "application/json");
        if !call.query.is_empty() {
            request = request.query(&call.query);
        }
        if let Some(token) = call.bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = call.body {
            let body = body
                .map_err(|e| ApiError::validation(format!("Failed to encode request: {e}")))?;
            request = request.json(&body);
        }

        tracing::debug!(method = %call.method, path = call.path, "api request");
        let response = request.send().await.map_err(|e| {
            let err = ApiError::from_reqwest(&e);
            tracing::debug!(path = call.path, kind = %err.kind, "api transport error: {e}");
            err
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::from_reqwest(&e))?;

        if !status.is_success() {
            let err = ApiError::http_status(status, &text);
            tracing::debug!(
                path = call.path,
                status = status.as_u16(),
                kind = %err.kind,
                "api error response"
            );
            return Err(err);
        }

        let text = if text.trim().is_empty() { "{}" } else { &text };
        serde_json::from_str(text).map_err(|e| {
            ApiError::validation(format!("Failed to parse response from {}: {e}", call.path))
        })
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
