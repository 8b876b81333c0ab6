//! Request entry point: cache lookup, routing, balancing, cache fill

use crate::cache::CacheManager;
use crate::error::Result;
use crate::http::{Request, Response};
use crate::registry::ServiceRegistry;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct Router {
    registry: Arc<ServiceRegistry>,
    cache: Option<CacheManager>,
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
}

impl Router {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        cache: Option<CacheManager>,
        transport: Arc<dyn Transport>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            transport,
            request_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Handle one request.
    ///
    /// Cache store failures are logged and the request is proxied directly;
    /// only routing and balancing errors reach the caller.
    pub async fn handle(&self, request: &Request) -> Result<Response> {
        let cache = self
            .cache
            .as_ref()
            .filter(|cache| cache.can_get_from_cache(request));

        // Try cache first
        if let Some(cache) = cache {
            match cache.get_cached(request).await {
                Ok(Some(response)) => return Ok(response),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Cache read failed, proxying directly"),
            }
        } else {
            debug!(method = %request.method, path = %request.path, "Cache bypassed");
        }

        // Route to an endpoint
        let response = self
            .registry
            .process_request(request, self.transport.as_ref(), self.request_timeout)
            .await?;

        // Fill cache
        if let Some(cache) = cache {
            if cache.can_cache(&response) {
                if let Err(e) = cache.store(request, &response).await {
                    warn!(error = %e, "Cache write failed");
                }
            }
        }

        Ok(response)
    }
}
