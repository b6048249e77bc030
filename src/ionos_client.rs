//! IONOS Cloud HTTP client.
//!
//! Unique responsibility: talk to the Cloud API, the Cloud DNS API and the
//! Container Registry API over REST.
//!
//! Endpoints used:
//! - GET    `{base}/{collection}` (paginated through `_links.next`)
//! - GET    `{base}/{collection}/{id}`
//! - POST   `{base}/{collection}`
//! - PATCH / PUT `{base}/{collection}/{id}`
//! - DELETE `{base}/{collection}/{id}`
//! - GET    `{compute base}/requests/{id}/status`
//! - Header: `Authorization: Bearer <token>` or HTTP basic auth
//!
//! Mutations return a [`Mutation`] carrying the request id extracted from the
//! `Location` header, which the reconciler hands to the waiter.
//!
//! All configuration is loaded from environment variables.

use std::{env, time::Duration};

use reqwest::{Method, StatusCode, header::LOCATION};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ionos_resource::{ApiFamily, Resource, UpdateMethod};
use crate::ionos_waiter::extract_request_id;

const DEFAULT_API_URL: &str = "https://api.ionos.com/cloudapi/v6";
const DEFAULT_DNS_API_URL: &str = "https://dns.de-fra.ionos.com";
const DEFAULT_CONTAINER_REGISTRY_API_URL: &str = "https://api.ionos.com/containerregistries";

/// Configuration for the IONOS HTTP client.
#[derive(Clone)]
pub struct IonosClientConfig {
    /// Bearer token; takes precedence over username/password.
    /// Env: `IONOS_TOKEN`
    pub token: Option<String>,

    /// Account username.
    /// Env: `IONOS_USERNAME`
    pub username: Option<String>,

    /// Account password.
    /// Env: `IONOS_PASSWORD`
    pub password: Option<String>,

    /// Cloud API base URL.
    /// Env: `IONOS_API_URL` (default: "<https://api.ionos.com/cloudapi/v6>")
    pub api_url: String,

    /// Cloud DNS API base URL.
    /// Env: `IONOS_DNS_API_URL` (default: "<https://dns.de-fra.ionos.com>")
    pub dns_api_url: String,

    /// Container Registry API base URL.
    /// Env: `IONOS_CONTAINER_REGISTRY_API_URL` (default: "<https://api.ionos.com/containerregistries>")
    pub container_registry_api_url: String,

    /// Expected API certificate fingerprint.
    /// Env: `IONOS_CERTIFICATE_FINGERPRINT`
    pub certificate_fingerprint: Option<String>,

    /// HTTP request timeout in milliseconds.
    /// Env: `IONOS_HTTP_TIMEOUT_MS` (default: 30000)
    pub timeout_ms: u64,

    /// Maximum number of retry attempts for transient failures.
    /// Env: `IONOS_HTTP_RETRY_MAX` (default: 3)
    pub retry_max: u32,

    /// Initial backoff between retries in milliseconds.
    /// Env: `IONOS_HTTP_RETRY_BACKOFF_MS` (default: 500)
    pub retry_backoff_ms: u64,

    /// User agent for HTTP requests.
    /// Env: `IONOS_USER_AGENT` (default: "ionos-reconcile/<version>")
    pub user_agent: String,
}

impl std::fmt::Debug for IonosClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IonosClientConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .field("dns_api_url", &self.dns_api_url)
            .field("container_registry_api_url", &self.container_registry_api_url)
            .field("certificate_fingerprint", &self.certificate_fingerprint)
            .field("timeout_ms", &self.timeout_ms)
            .field("retry_max", &self.retry_max)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl IonosClientConfig {
    /// Load configuration from environment variables.
    ///
    /// In local dev, this will also attempt to load `.env` from the current directory.
    /// If `.env` is missing, it does not fail.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric environment variable is invalid.
    pub fn from_env() -> Result<Self, ApiError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ApiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            token: non_empty("IONOS_TOKEN"),
            username: non_empty("IONOS_USERNAME"),
            password: non_empty("IONOS_PASSWORD"),
            api_url: non_empty("IONOS_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            dns_api_url: non_empty("IONOS_DNS_API_URL")
                .unwrap_or_else(|| DEFAULT_DNS_API_URL.to_string()),
            container_registry_api_url: non_empty("IONOS_CONTAINER_REGISTRY_API_URL")
                .unwrap_or_else(|| DEFAULT_CONTAINER_REGISTRY_API_URL.to_string()),
            certificate_fingerprint: non_empty("IONOS_CERTIFICATE_FINGERPRINT"),
            timeout_ms: parse_env(&lookup, "IONOS_HTTP_TIMEOUT_MS", 30_000)?,
            retry_max: parse_env(&lookup, "IONOS_HTTP_RETRY_MAX", 3)?,
            retry_backoff_ms: parse_env(&lookup, "IONOS_HTTP_RETRY_BACKOFF_MS", 500)?,
            user_agent: non_empty("IONOS_USER_AGENT")
                .unwrap_or_else(|| format!("ionos-reconcile/{}", env!("CARGO_PKG_VERSION"))),
        })
    }

    /// Resolve which credentials to send. A token wins over username/password.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::MissingCredentials`] if neither a token nor a
    /// username and password pair is configured.
    pub fn credentials(&self) -> Result<Credentials, ApiError> {
        if let Some(token) = &self.token {
            return Ok(Credentials::Token(token.clone()));
        }
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Ok(Credentials::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => Err(ApiError::MissingCredentials),
        }
    }

    fn base_url(&self, api: ApiFamily) -> &str {
        match api {
            ApiFamily::Compute => self.api_url.trim_end_matches('/'),
            ApiFamily::Dns => self.dns_api_url.trim_end_matches('/'),
            ApiFamily::ContainerRegistry => self.container_registry_api_url.trim_end_matches('/'),
        }
    }
}

/// Credentials sent with every request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// `Authorization: Bearer <token>`.
    Token(String),
    /// HTTP basic authentication.
    Basic {
        /// Account username.
        username: String,
        /// Account password.
        password: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(<redacted>)"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Outcome of a create, update or delete call.
#[derive(Debug, Clone)]
pub struct Mutation {
    /// Resource returned in the response body, if any.
    pub resource: Option<Resource>,
    /// Request id from the `Location` header, if any.
    pub request_id: Option<String>,
}

/// Status of an asynchronous Cloud API request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestStatus {
    /// Status metadata.
    pub metadata: RequestStatusMetadata,
}

/// Metadata part of a request status.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestStatusMetadata {
    /// `QUEUED`, `RUNNING`, `DONE` or `FAILED`.
    pub status: String,
    /// Human readable message.
    #[serde(default)]
    pub message: Option<String>,
}

impl RequestStatus {
    /// Request finished successfully.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.metadata.status.eq_ignore_ascii_case("DONE")
    }

    /// Request failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.metadata.status.eq_ignore_ascii_case("FAILED")
    }
}

/// HTTP client for the IONOS Cloud and DNS APIs.
pub struct IonosClient {
    cfg: IonosClientConfig,
    credentials: Credentials,
    http: reqwest::Client,
}

impl IonosClient {
    /// Create a new client from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no credentials are configured or the HTTP client
    /// cannot be built.
    pub fn new(cfg: IonosClientConfig) -> Result<Self, ApiError> {
        let credentials = cfg.credentials()?;

        if cfg.certificate_fingerprint.is_some() {
            warn!("certificate fingerprint pinning is not supported, using system trust roots");
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .user_agent(cfg.user_agent.clone())
            .build()?;

        Ok(Self {
            cfg,
            credentials,
            http,
        })
    }

    /// Get a reference to the current configuration.
    #[must_use]
    pub const fn config(&self) -> &IonosClientConfig {
        &self.cfg
    }

    /// List every resource of a collection, following pagination links.
    ///
    /// # Errors
    ///
    /// Returns an error if a request fails or a page cannot be decoded.
    pub async fn list(&self, api: ApiFamily, collection: &str) -> Result<Vec<Resource>, ApiError> {
        let mut url = with_depth(api, format!("{}{collection}", self.cfg.base_url(api)));
        let mut items = Vec::new();

        loop {
            let response = self.send(Method::GET, &url, None).await?;
            let page: Page = decode(response.body)?;
            debug!(url = %url, count = page.items.len(), "listed page");
            items.extend(page.items);

            match page.links.and_then(|l| l.next) {
                Some(next) => url = self.absolute(api, &next),
                None => break,
            }
        }

        Ok(items)
    }

    /// Fetch one resource; `Ok(None)` when the API answers 404.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be decoded.
    pub async fn get(&self, api: ApiFamily, path: &str) -> Result<Option<Resource>, ApiError> {
        let url = with_depth(api, format!("{}{path}", self.cfg.base_url(api)));
        match self.send(Method::GET, &url, None).await {
            Ok(response) => decode(response.body).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create a resource in a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the API rejects it.
    pub async fn create(
        &self,
        api: ApiFamily,
        collection: &str,
        body: &Value,
    ) -> Result<Mutation, ApiError> {
        let url = format!("{}{collection}", self.cfg.base_url(api));
        info!(url = %url, "creating resource");
        let response = self.send(Method::POST, &url, Some(body)).await?;
        response.into_mutation()
    }

    /// Update a resource in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the API rejects it.
    pub async fn update(
        &self,
        api: ApiFamily,
        method: UpdateMethod,
        path: &str,
        body: &Value,
    ) -> Result<Mutation, ApiError> {
        let url = format!("{}{path}", self.cfg.base_url(api));
        let method = match method {
            UpdateMethod::Patch => Method::PATCH,
            UpdateMethod::Put => Method::PUT,
        };
        info!(url = %url, %method, "updating resource");
        let response = self.send(method, &url, Some(body)).await?;
        response.into_mutation()
    }

    /// Delete a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the API rejects it.
    pub async fn delete(&self, api: ApiFamily, path: &str) -> Result<Mutation, ApiError> {
        let url = format!("{}{path}", self.cfg.base_url(api));
        info!(url = %url, "deleting resource");
        let response = self.send(Method::DELETE, &url, None).await?;
        Ok(Mutation {
            resource: None,
            request_id: response.request_id,
        })
    }

    /// Fetch the status of an asynchronous Cloud API request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be decoded.
    pub async fn request_status(&self, request_id: &str) -> Result<RequestStatus, ApiError> {
        let url = format!(
            "{}/requests/{request_id}/status",
            self.cfg.base_url(ApiFamily::Compute)
        );
        let response = self.send(Method::GET, &url, None).await?;
        decode(response.body)
    }

    fn absolute(&self, api: ApiFamily, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            return link.to_string();
        }
        reqwest::Url::parse(self.cfg.base_url(api))
            .and_then(|base| base.join(link))
            .map_or_else(|_| format!("{}{link}", self.cfg.base_url(api)), String::from)
    }

    /// Send a request, retrying transient failures with exponential backoff.
    ///
    /// POST is only retried when the server cannot have accepted it
    /// (429 or a connection failure).
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<RawResponse, ApiError> {
        let mut attempt: u32 = 0;
        let mut backoff = Duration::from_millis(self.cfg.retry_backoff_ms);
        let idempotent = method != Method::POST;

        loop {
            attempt = attempt.saturating_add(1);

            let mut req = self.http.request(method.clone(), url);
            req = match &self.credentials {
                Credentials::Token(token) => req.bearer_auth(token),
                Credentials::Basic { username, password } => {
                    req.basic_auth(username, Some(password))
                }
            };
            if let Some(body) = body {
                req = req.json(body);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let request_id = resp
                        .headers()
                        .get(LOCATION)
                        .and_then(|v| v.to_str().ok())
                        .and_then(extract_request_id)
                        .map(str::to_string);
                    if status.is_success() {
                        return Ok(RawResponse {
                            body: resp.text().await?,
                            request_id,
                        });
                    }

                    let text = resp.text().await.unwrap_or_default();

                    let retryable = if idempotent {
                        is_retryable_status(status)
                    } else {
                        status == StatusCode::TOO_MANY_REQUESTS
                    };
                    if attempt <= self.cfg.retry_max && retryable {
                        warn!(%method, url, %status, attempt, "transient api error, retrying");
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff);
                        continue;
                    }

                    return Err(ApiError::Api { status, body: text });
                }
                Err(e) => {
                    let retryable = if idempotent {
                        is_retryable_reqwest(&e)
                    } else {
                        e.is_connect()
                    };
                    if attempt <= self.cfg.retry_max && retryable {
                        warn!(%method, url, error = %e, attempt, "http error, retrying");
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff);
                        continue;
                    }

                    return Err(ApiError::Http(e));
                }
            }
        }
    }
}

struct RawResponse {
    body: String,
    request_id: Option<String>,
}

impl RawResponse {
    /// An empty body carries no resource; anything else must decode as one.
    fn into_mutation(self) -> Result<Mutation, ApiError> {
        let resource = if self.body.trim().is_empty() {
            None
        } else {
            match serde_json::from_str(&self.body) {
                Ok(resource) => Some(resource),
                Err(source) => {
                    return Err(ApiError::Json {
                        source,
                        body: self.body,
                    });
                }
            }
        };
        Ok(Mutation {
            resource,
            request_id: self.request_id,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    items: Vec<Resource>,
    #[serde(default, rename = "_links")]
    links: Option<PageLinks>,
}

#[derive(Debug, Deserialize)]
struct PageLinks {
    #[serde(default)]
    next: Option<String>,
}

// ============================================================================
// Error type
// ============================================================================

/// Error type for IONOS API operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid environment variable value.
    #[error("invalid env var {key}={value:?}: {reason}")]
    InvalidEnv {
        /// The environment variable key.
        key: &'static str,
        /// The environment variable value.
        value: String,
        /// The reason for invalidity.
        reason: &'static str,
    },
    /// Neither a token nor username and password were supplied.
    #[error("token or username & password are required")]
    MissingCredentials,
    /// HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// API error response.
    #[error("api error: status={status}, body={body}")]
    Api {
        /// HTTP status code.
        status: StatusCode,
        /// Response body.
        body: String,
    },
    /// JSON decoding error.
    #[error("json decode error: {source}")]
    Json {
        /// The JSON parsing error.
        source: serde_json::Error,
        /// The response body.
        body: String,
    },
    /// A mutation response carried no request id to wait on.
    #[error("failed to extract request id from response header 'location'")]
    MissingRequestId,
}

impl ApiError {
    /// Returns true if the API answered 404.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    /// Returns true if the failure is worth retrying later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => is_retryable_status(*status),
            Self::Http(e) => is_retryable_reqwest(e),
            _ => false,
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

fn decode<T: for<'de> Deserialize<'de>>(body: String) -> Result<T, ApiError> {
    serde_json::from_str(&body).map_err(|source| ApiError::Json { source, body })
}

fn with_depth(api: ApiFamily, url: String) -> String {
    match api {
        ApiFamily::Compute if !url.contains("depth=") => {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{url}{sep}depth=1")
        }
        _ => url,
    }
}

fn parse_env<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ApiError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key).filter(|v| !v.trim().is_empty()).map_or_else(
        || Ok(default),
        |v| {
            v.trim().parse::<T>().map_err(|_| ApiError::InvalidEnv {
                key,
                value: v,
                reason: "expected an unsigned integer",
            })
        },
    )
}

#[inline]
const fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 425 | 429 | 500 | 502 | 503 | 504)
}

#[inline]
fn is_retryable_reqwest(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request()
}

#[inline]
fn next_backoff(current: Duration) -> Duration {
    // Exponential backoff capped at 10 seconds.
    let next = current.saturating_mul(2);
    next.min(Duration::from_secs(10))
}
