//! HTTP clients for the authentication service and the service under test.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Basic-auth credentials accepted by the authentication endpoint.
const BASIC_AUTH_USER: &str = "admin";
const BASIC_AUTH_PASSWORD: &str = "admin";

/// Header carrying the per-call trace id.
const PROCESS_ID_HEADER: &str = "processID";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// The token returned by a successful authentication.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationToken {
    /// The bearer token for subsequent calls.
    pub jwt: String,
}

/// The remote calculation endpoint, abstracted so the job factory does not
/// care whether it talks to a real service.
#[async_trait]
pub trait CalculationTarget: Send + Sync {
    /// Invokes one long calculation, tagged with `process_id` for tracing.
    async fn long_calculation(
        &self,
        token: &AuthorizationToken,
        process_id: &str,
    ) -> Result<i64>;
}

/// Client for the authentication service.
#[derive(Debug, Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base_url: reqwest::Url,
}

impl AuthClient {
    /// Creates a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL does not parse or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: build_http_client()?,
            base_url: parse_base_url(base_url)?,
        })
    }

    /// Fetches a fresh token via basic auth.
    ///
    /// # Errors
    ///
    /// Returns an error for connection failures, non-2xx responses and
    /// unparseable bodies.
    pub async fn authenticate(&self) -> Result<AuthorizationToken> {
        let url = self
            .base_url
            .join("authenticate")
            .context("cannot build authenticate URL")?;
        let token = self
            .http
            .get(url)
            .basic_auth(BASIC_AUTH_USER, Some(BASIC_AUTH_PASSWORD))
            .send()
            .await
            .context("authenticate request failed")?
            .error_for_status()
            .context("authenticate returned an error status")?
            .json::<AuthorizationToken>()
            .await
            .context("cannot parse authorization token")?;
        Ok(token)
    }
}

/// Client for the scalable service under test.
#[derive(Debug, Clone)]
pub struct ScalableServiceClient {
    http: reqwest::Client,
    base_url: reqwest::Url,
}

impl ScalableServiceClient {
    /// Creates a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL does not parse or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: build_http_client()?,
            base_url: parse_base_url(base_url)?,
        })
    }
}

#[async_trait]
impl CalculationTarget for ScalableServiceClient {
    async fn long_calculation(
        &self,
        token: &AuthorizationToken,
        process_id: &str,
    ) -> Result<i64> {
        let url = self
            .base_url
            .join("api/service")
            .context("cannot build service URL")?;
        let value = self
            .http
            .get(url)
            .bearer_auth(&token.jwt)
            .header(PROCESS_ID_HEADER, process_id)
            .send()
            .await
            .context("service request failed")?
            .error_for_status()
            .context("service returned an error status")?
            .json::<i64>()
            .await
            .context("cannot parse service response")?;
        Ok(value)
    }
}

fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("cannot build HTTP client")
}

/// Parses a base URL, normalizing it to end with a slash so joins append
/// instead of replacing the last path segment.
fn parse_base_url(raw: &str) -> Result<reqwest::Url> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    reqwest::Url::parse(&normalized).with_context(|| format!("invalid base URL '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_base_url_normalizes_trailing_slash() {
        let url = parse_base_url("http://localhost:8080").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/");

        let joined = url.join("authenticate").unwrap();
        assert_eq!(joined.as_str(), "http://localhost:8080/authenticate");
    }

    #[test]
    fn test_parse_base_url_keeps_path_prefix() {
        let url = parse_base_url("http://localhost:8080/gateway").unwrap();
        let joined = url.join("api/service").unwrap();
        assert_eq!(joined.as_str(), "http://localhost:8080/gateway/api/service");
    }

    #[test]
    fn test_parse_base_url_rejects_garbage() {
        assert!(parse_base_url("not a url").is_err());
    }

    #[test]
    fn test_token_deserialization() {
        let token: AuthorizationToken =
            serde_json::from_str(r#"{"jwt": "header.payload.signature"}"#).unwrap();
        assert_eq!(token.jwt, "header.payload.signature");
    }
}
