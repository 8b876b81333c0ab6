//! Inbound HTTP listener: adapts Pingora sessions to the router

use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::request::Parts;
use http::{StatusCode, Version};
use pingora::apps::http_app::ServeHttp;
use pingora::protocols::http::ServerSession;
use proxy::{ProxyError, Request, Response, Router};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Response headers recomputed by the listener rather than copied from upstream
const HOP_HEADERS: &[&str] = &["content-length", "connection", "transfer-encoding"];

pub struct HostgateApp {
    router: Arc<Router>,
}

impl HostgateApp {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl ServeHttp for HostgateApp {
    async fn response(&self, http_session: &mut ServerSession) -> http::Response<Vec<u8>> {
        let mut body = Vec::new();
        loop {
            match http_session.read_request_body().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) => {
                    return error_response(&ProxyError::BadRequest(format!(
                        "cannot read request body: {}",
                        e
                    )))
                }
            }
        }

        let request = match to_request(http_session.req_header(), &body) {
            Ok(request) => request,
            Err(e) => return error_response(&e),
        };

        match self.router.handle(&request).await {
            Ok(response) => to_http_response(&response),
            Err(e) => {
                warn!(
                    method = %request.method,
                    path = %request.path,
                    host = request.host().unwrap_or_default(),
                    error = %e,
                    "Request failed"
                );
                error_response(&e)
            }
        }
    }
}

/// Build a `Request` from inbound head and body.
///
/// Header names are lower-cased and repeated headers joined with `,`. A
/// non-empty body must be a JSON object; non-string values keep their JSON text.
pub fn to_request(head: &Parts, body: &[u8]) -> proxy::Result<Request> {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in &head.headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        headers
            .entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    // Fall back to the URI authority, port included, like a Host header
    if !headers.contains_key("host") {
        if let Some(authority) = head.uri.authority() {
            let host = match authority.port_u16() {
                Some(port) => format!("{}:{}", authority.host(), port),
                None => authority.host().to_string(),
            };
            headers.insert("host".to_string(), host);
        }
    }

    let body = if body.iter().all(u8::is_ascii_whitespace) {
        BTreeMap::new()
    } else {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(body)
            .map_err(|e| ProxyError::BadRequest(format!("body must be a JSON object: {}", e)))?;
        object
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect()
    };

    let path = head
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let version = match head.version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    };

    debug!(method = %head.method, path = %path, "Inbound request");
    Ok(Request {
        method: head.method.as_str().to_string(),
        path,
        version: version.to_string(),
        headers,
        body,
    })
}

pub fn to_http_response(response: &Response) -> http::Response<Vec<u8>> {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut out = build_response(status, response.body.clone().into_bytes());

    for (name, value) in &response.headers {
        if HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                out.headers_mut().append(name, value);
            }
            _ => debug!(header = %name, "Dropping invalid response header"),
        }
    }
    out
}

pub fn error_response(err: &ProxyError) -> http::Response<Vec<u8>> {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut out = build_response(status, format!("{}\n", err).into_bytes());
    out.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    out
}

fn build_response(status: StatusCode, body: Vec<u8>) -> http::Response<Vec<u8>> {
    let len = body.len();
    let mut out = http::Response::new(body);
    *out.status_mut() = status;
    out.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(len));
    out
}
