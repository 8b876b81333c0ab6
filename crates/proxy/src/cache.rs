//! HTTP cache-control evaluation and response caching

use crate::error::{ProxyError, Result};
use crate::http::{Request, Response};
use crate::store::CacheStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn, Span};

/// Directives that disable caching for a transaction
const BYPASS_DIRECTIVES: &[&str] = &["no-cache", "no-store", "private"];

/// Parsed `Cache-Control` header value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    directives: Vec<String>,
}

impl CacheControl {
    /// Split a header value into trimmed, lower-cased tokens
    pub fn parse(value: &str) -> Self {
        let directives = value
            .split(',')
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self { directives }
    }

    pub fn of_request(request: &Request) -> Self {
        request.header("cache-control").map(Self::parse).unwrap_or_default()
    }

    pub fn of_response(response: &Response) -> Self {
        response.header("cache-control").map(Self::parse).unwrap_or_default()
    }

    /// Whether any of `no-cache`, `no-store` or `private` is present
    pub fn bypasses(&self) -> bool {
        self.directives
            .iter()
            .any(|d| BYPASS_DIRECTIVES.contains(&d.as_str()))
    }

    /// Every numeric `max-age=N` value, in header order; non-numeric values are skipped
    pub fn max_ages(&self) -> Vec<i64> {
        self.directives
            .iter()
            .filter_map(|d| d.strip_prefix("max-age="))
            .filter_map(|secs| secs.trim().parse::<i64>().ok())
            .collect()
    }
}

/// A stored response and the time it was stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheItem {
    pub response: Response,
    pub created: DateTime<Utc>,
}

impl CacheItem {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            created: Utc::now(),
        }
    }

    /// Whole seconds elapsed between creation and `now`
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created).num_seconds()
    }
}

/// Derive the store key for a request.
///
/// Only method, path, body and the Host header take part, so incidental
/// headers never fragment the cache.
pub fn cache_key(request: &Request) -> String {
    let material = json!({
        "method": request.method,
        "path": request.path,
        "body": request.body,
        "headers": { "host": request.host().unwrap_or_default() },
    });
    format!("{:x}", Sha256::digest(material.to_string().as_bytes()))
}

/// Applies cache-control semantics on top of a `CacheStore`
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    span: Span,
}

impl CacheManager {
    pub fn new(store: Arc<dyn CacheStore>, span: Span) -> Self {
        Self { store, span }
    }

    /// Request gate: a bypassing request skips both cache read and write
    pub fn can_get_from_cache(&self, request: &Request) -> bool {
        !CacheControl::of_request(request).bypasses()
    }

    /// Response gate
    pub fn can_cache(&self, response: &Response) -> bool {
        !CacheControl::of_response(response).bypasses()
    }

    /// Whether an item satisfies every `max-age` in the request.
    ///
    /// Any single `max-age=N` with `age >= N` makes the item stale; a
    /// negative N therefore always does.
    pub fn is_fresh(&self, item: &CacheItem, request: &Request, now: DateTime<Utc>) -> bool {
        let age = item.age_seconds(now);
        !CacheControl::of_request(request)
            .max_ages()
            .into_iter()
            .any(|max_age| age >= max_age)
    }

    /// Look up a fresh cached response for the request
    pub async fn get_cached(&self, request: &Request) -> Result<Option<Response>> {
        let key = cache_key(request);
        let Some(raw) = self.store.get(&key).await? else {
            debug!(parent: &self.span, key = %key, "Cache miss");
            return Ok(None);
        };

        let item: CacheItem = match serde_json::from_str(&raw) {
            Ok(item) => item,
            Err(e) => {
                warn!(parent: &self.span, key = %key, error = %e, "Discarding undecodable cache item");
                return Ok(None);
            }
        };

        // Check freshness against the request's max-age
        if !self.is_fresh(&item, request, Utc::now()) {
            debug!(parent: &self.span, key = %key, created = %item.created, "Cache miss (stale)");
            return Ok(None);
        }

        debug!(parent: &self.span, key = %key, status = item.response.status, "Cache hit");
        Ok(Some(item.response))
    }

    /// Store a response under the request's key, replacing any previous entry
    pub async fn store(&self, request: &Request, response: &Response) -> Result<()> {
        let key = cache_key(request);
        let item = CacheItem::new(response.clone());
        let raw = serde_json::to_string(&item)
            .map_err(|e| ProxyError::CacheUnavailable(format!("cannot encode cache item: {}", e)))?;

        self.store.put(&key, raw).await?;
        debug!(parent: &self.span, key = %key, status = response.status, "Cached response");
        Ok(())
    }
}
