//! Outbound transport used by the balancer to execute a request against one endpoint

use crate::endpoint::Endpoint;
use crate::error::{ProxyError, Result};
use crate::http::{Request, Response};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Executes a request against a specific endpoint.
///
/// Every failure (refused connection, timeout, unreadable response) must be
/// reported as an `Err`; the balancer treats any error the same way.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &Request, endpoint: &Endpoint) -> Result<Response>;
}

/// Headers that are not forwarded upstream
const SKIPPED_HEADERS: &[&str] = &["content-length", "connection", "transfer-encoding"];

/// Plain HTTP/1.1 transport backed by reqwest
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    fn url(request: &Request, endpoint: &Endpoint) -> String {
        if request.path.starts_with('/') {
            format!("http://{}{}", endpoint.address(), request.path)
        } else {
            format!("http://{}/{}", endpoint.address(), request.path)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &Request, endpoint: &Endpoint) -> Result<Response> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| ProxyError::Transport(format!("invalid method '{}': {}", request.method, e)))?;
        let url = Self::url(request, endpoint);
        debug!(method = %request.method, url = %url, "Forwarding request");

        // Forward headers and body
        let mut builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            if SKIPPED_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.json(&request.body);
        }

        let upstream = builder
            .send()
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))?;

        let status = upstream.status().as_u16();
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in upstream.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push(',');
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let body = upstream
            .text()
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))?;

        debug!(endpoint = %endpoint, status, "Upstream responded");
        Ok(Response { status, headers, body })
    }
}
