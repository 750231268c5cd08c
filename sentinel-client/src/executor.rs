//! HTTP request execution against the security backend
//!
//! Every call goes through [`RequestExecutor`], which attaches the bearer
//! token from the injected [`TokenStore`] and turns any non-2xx response or
//! transport failure into an [`ApiError`].

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::{Method, StatusCode};
use sentinel_core::{ApiConfig, ApiError, ErrorContext, SentinelError, SentinelResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::token_store::TokenStore;

/// Sends requests for a single backend, reading credentials from a shared store
#[derive(Clone)]
pub struct RequestExecutor {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenStore>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.base_url)
            .field("has_token", &self.tokens.access_token().is_some())
            .finish()
    }
}

impl RequestExecutor {
    pub fn new(config: &ApiConfig, tokens: Arc<dyn TokenStore>) -> SentinelResult<Self> {
        let client = create_http_client(config)?;

        info!("Created API client for {}", config.base_url);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    /// Send a JSON request, attaching the bearer token when one is stored.
    pub async fn request(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&Value>,
        extra_headers: Option<&HeaderMap>,
    ) -> Result<Value, ApiError> {
        let mut headers = extra_headers.cloned().unwrap_or_default();

        if let Some(token) = self.tokens.access_token() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                ApiError::contract_violation(0, format!("Stored access token is not a valid header: {}", e))
            })?;
            // insert() replaces any caller-supplied value, so only one is sent
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = self
            .client
            .request(method.clone(), self.url(endpoint))
            .headers(headers);

        if let Some(body) = body {
            builder = builder.json(body);
        }

        debug!(%method, endpoint, "Sending API request");
        self.execute(endpoint, builder).await
    }

    /// Send a form-url-encoded request without credentials.
    ///
    /// Only the token-issuing endpoint speaks this encoding.
    pub async fn request_form(
        &self,
        endpoint: &str,
        fields: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        let builder = self.client.post(self.url(endpoint)).form(fields);

        debug!(endpoint, "Sending form request");
        self.execute(endpoint, builder).await
    }

    pub async fn get(&self, endpoint: &str) -> Result<Value, ApiError> {
        self.request(endpoint, Method::GET, None, None).await
    }

    pub async fn post(&self, endpoint: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        self.request(endpoint, Method::POST, body, None).await
    }

    async fn execute(
        &self,
        endpoint: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<Value, ApiError> {
        let response = builder.send().await.map_err(|e| {
            warn!(endpoint, error = %e, "Backend unreachable");
            ApiError::network(format!(
                "Failed to connect to {}: {}",
                self.base_url, e
            ))
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            ApiError::network(format!("Connection dropped while reading {}: {}", endpoint, e))
        })?;

        if status.is_success() {
            return parse_success_body(status, &text);
        }

        let error = ApiError::from_response(status.as_u16(), &text);
        debug!(
            endpoint,
            status = status.as_u16(),
            kind = ?error.kind,
            "API request failed"
        );
        Err(error)
    }
}

fn parse_success_body(status: StatusCode, text: &str) -> Result<Value, ApiError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(text).map_err(|e| {
        ApiError::contract_violation(
            status.as_u16(),
            format!("Response body is not valid JSON: {}", e),
        )
    })
}

/// Build the shared HTTP client with timeout and user agent
pub(crate) fn create_http_client(config: &ApiConfig) -> SentinelResult<reqwest::Client> {
    let mut headers = HeaderMap::new();

    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&config.user_agent).map_err(|e| SentinelError::Config {
            message: format!("Invalid user agent: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })?,
    );

    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .default_headers(headers)
        .build()
        .map_err(|e| SentinelError::Config {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })
}
