//! Single-shot HTTP transport.
//!
//! The loader and the operation invoker only ever need one primitive: issue
//! one request, get back status and body. [`HttpTransport`] is that seam;
//! [`ReqwestTransport`] is the production implementation. No retries, no
//! caching, no pooling beyond what `reqwest` does internally.

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::{AriError, AriResult};

/// One HTTP exchange: status plus raw body.
///
/// The body is kept as text because error responses are not guaranteed to be
/// JSON; callers decide whether and how to parse it.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    /// `true` for any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Pluggable single-shot HTTP primitive. Called once per request.
///
/// Implementations handle connection management and authentication.
/// Timeouts surface as ordinary `Err` values.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue one request. `body`, when present, is a JSON document and is
    /// sent with `Content-Type: application/json`.
    async fn issue(
        &self,
        method: &str,
        url: &Url,
        body: Option<String>,
    ) -> AriResult<HttpResponse>;
}

/// Production transport backed by `reqwest` with HTTP basic auth.
pub struct ReqwestTransport {
    http: reqwest::Client,
    credentials: Option<(String, String)>,
}

impl ReqwestTransport {
    /// Transport without authentication.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials: None,
        }
    }

    /// Transport that attaches basic auth to every request.
    pub fn with_basic_auth(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials: Some((username.into(), password.into())),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn issue(
        &self,
        method: &str,
        url: &Url,
        body: Option<String>,
    ) -> AriResult<HttpResponse> {
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| AriError::connection(format!("invalid HTTP method '{}'", method)))?;

        debug!("{} {}", method, url);

        let mut builder = self.http.request(method, url.clone());
        if let Some((ref user, ref pass)) = self.credentials {
            builder = builder.basic_auth(user, Some(pass));
        }
        if let Some(body) = body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        debug!("HTTP {} ({} byte body)", status, body.len());
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range() {
        assert!(HttpResponse { status: 200, body: String::new() }.is_success());
        assert!(HttpResponse { status: 204, body: String::new() }.is_success());
        assert!(!HttpResponse { status: 199, body: String::new() }.is_success());
        assert!(!HttpResponse { status: 300, body: String::new() }.is_success());
        assert!(!HttpResponse { status: 404, body: String::new() }.is_success());
    }
}
