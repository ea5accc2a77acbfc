//! HTTP adapter for the formflow backend.
//!
//! This crate provides a thin JSON client over `reqwest` and implements the engine's remote
//! collaborator traits on top of it:
//!
//! - [`FormflowClient`]: validated base URL, bearer authentication, and typed request helpers
//! - [`HttpRegistryService`]: [`RegistryService`], [`RequestStatusSource`], and [`DraftSink`]
//!   backed by the client
//! - [`SettingsTokenRefresher`]: reloads the access token from settings after a 401
//!
//! A `401 Unauthorized` response triggers one token refresh through the configured
//! [`TokenRefresher`] and a single retry. When the refresh fails, or the retry is rejected
//! again, the 401 is returned so the engine can surface it as an expired session.
//! There is no other retry or backoff policy.
//!
//! # Example
//!
//! ```ignore
//! use formflow_api::{FormflowClient, HttpRegistryService};
//! use std::time::Duration;
//!
//! let client = FormflowClient::new("https://api.example.com/v1", Some(token), Duration::from_secs(30))?;
//! let service = HttpRegistryService::new(client);
//! ```
//!
//! [`RegistryService`]: formflow_engine::strategies::RegistryService
//! [`RequestStatusSource`]: formflow_engine::RequestStatusSource
//! [`DraftSink`]: formflow_engine::DraftSink

mod auth;
mod registry;

pub use auth::SettingsTokenRefresher;
pub use registry::HttpRegistryService;

use std::sync::{Arc, PoisonError, RwLock};
use std::{env, time::Duration};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use formflow_engine::ApiFailure;
use reqwest::{Client, Method, RequestBuilder, StatusCode, header};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// Hostnames allowed for local development regardless of scheme.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

/// Status code used for failures that never produced an HTTP response.
pub const NO_RESPONSE_STATUS: u16 = 0;

/// Produces a fresh access token after the backend rejected the current one.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<String>;
}

#[derive(Clone)]
/// Thin wrapper around a configured `reqwest::Client` for the formflow backend.
///
/// The base URL is validated once at construction. The bearer token is shared between
/// clones so a refresh performed by one request is seen by all of them.
pub struct FormflowClient {
    base_url: Url,
    http: Client,
    user_agent: String,
    access_token: Arc<RwLock<Option<String>>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl std::fmt::Debug for FormflowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormflowClient")
            .field("base_url", &self.base_url.as_str())
            .field("user_agent", &self.user_agent)
            .field("has_refresher", &self.refresher.is_some())
            .finish_non_exhaustive()
    }
}

impl FormflowClient {
    /// Construct a client for `base_url`.
    ///
    /// Non-localhost hosts must use HTTPS. `timeout` applies to every request.
    pub fn new(base_url: &str, access_token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = validate_base_url(base_url)?;

        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .context("build http client")?;

        Ok(Self {
            base_url,
            http,
            user_agent: format!("formflow/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS),
            access_token: Arc::new(RwLock::new(access_token.filter(|token| !token.trim().is_empty()))),
            refresher: None,
        })
    }

    /// Install the hook used to renew the token after a 401.
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve path segments against the base URL. Each segment is percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Build a request carrying the User-Agent and, when present, the bearer token.
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, url = %url, "building request");
        let builder = self.http.request(method, url).header(header::USER_AGENT, &self.user_agent);
        match self.current_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// GET `segments` and decode the JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiFailure> {
        let text = self.send(Method::GET, segments, None).await?;
        decode(&text)
    }

    /// POST `body` to `segments` and decode the JSON response.
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, segments: &[&str], body: &B) -> Result<T, ApiFailure> {
        let payload = serde_json::to_value(body).map_err(|error| ApiFailure::new(NO_RESPONSE_STATUS, format!("encode request: {}", error)))?;
        let text = self.send(Method::POST, segments, Some(&payload)).await?;
        decode(&text)
    }

    /// Send a request and return the body of a successful response.
    ///
    /// A 401 is retried once after a successful token refresh.
    async fn send(&self, method: Method, segments: &[&str], body: Option<&Value>) -> Result<String, ApiFailure> {
        let url = self.endpoint(segments);
        match self.send_once(method.clone(), url.clone(), body).await {
            Err(failure) if failure.is_unauthorized() && self.refresher.is_some() => {
                if !self.refresh_token().await {
                    return Err(failure);
                }
                debug!(url = %url, "retrying request after token refresh");
                self.send_once(method, url, body).await
            }
            other => other,
        }
    }

    async fn send_once(&self, method: Method, url: Url, body: Option<&Value>) -> Result<String, ApiFailure> {
        let mut builder = self.request(method, url.clone());
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|error| {
            warn!(url = %url, error = %error, "request failed before a response");
            ApiFailure::new(
                NO_RESPONSE_STATUS,
                format!("Network error: {}. Hint: check the connection and the configured API base URL", error),
            )
        })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status.is_success() {
            return Ok(text);
        }
        let failure = failure_from_response(status, &text);
        debug!(url = %url, status = status.as_u16(), message = %formflow_util::redact_sensitive(&formflow_util::truncate_for_display(&failure.message, 200)), "request rejected");
        Err(failure)
    }

    async fn refresh_token(&self) -> bool {
        let Some(refresher) = self.refresher.clone() else {
            return false;
        };
        match refresher.refresh().await {
            Ok(token) => {
                *self.access_token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
                true
            }
            Err(error) => {
                warn!(error = %error, "token refresh failed");
                false
            }
        }
    }

    fn current_token(&self) -> Option<String> {
        self.access_token.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
pub fn validate_base_url(base: &str) -> Result<Url> {
    let parsed_base_url = Url::parse(base.trim()).map_err(|e| anyhow!("Invalid API base URL '{}': {}", base, e))?;

    let host_name = parsed_base_url
        .host_str()
        .ok_or_else(|| anyhow!("API base URL must include a host"))?;

    if LOCALHOST_DOMAINS
        .iter()
        .any(|&allowed| host_name.eq_ignore_ascii_case(allowed))
    {
        return Ok(parsed_base_url);
    }

    if parsed_base_url.scheme() != "https" {
        return Err(anyhow!(
            "API base URL must use https for non-localhost hosts; got '{}://'",
            parsed_base_url.scheme()
        ));
    }

    Ok(parsed_base_url)
}

/// Builds the failure for a non-success response. Backend messages are used verbatim when
/// the body carries one.
fn failure_from_response(status: StatusCode, text: &str) -> ApiFailure {
    let message = serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|body| {
            ["message", "error", "detail"]
                .iter()
                .find_map(|key| body.get(key).and_then(Value::as_str).map(str::to_string))
        })
        .or_else(|| {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    ApiFailure::new(status.as_u16(), message)
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ApiFailure> {
    let body = if text.trim().is_empty() { "null" } else { text };
    serde_json::from_str(body).map_err(|error| ApiFailure::new(NO_RESPONSE_STATUS, format!("Invalid JSON: {}", error)))
}
