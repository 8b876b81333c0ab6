//! Endpoint selection and retrying for a service

use crate::endpoint::{Endpoint, EndpointStatus};
use crate::error::{ProxyError, Result};
use crate::http::{Request, Response};
use crate::transport::Transport;
use config::LoadBalancingStrategy;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Strategy-specific selection state
#[derive(Debug)]
enum Selection {
    /// Cursor over the full endpoint list, always below its length after
    /// the first pick; ineligible endpoints are skipped
    RoundRobin { cursor: AtomicUsize },
    /// Uniform pick among current candidates
    Random,
}

/// Load balancer for a single service.
///
/// Shares the service's endpoint list rather than copying it, so status
/// changes made by the health monitor are visible on the next selection.
#[derive(Debug)]
pub struct LoadBalancer {
    service: String,
    endpoints: Arc<Vec<Endpoint>>,
    selection: Selection,
}

impl LoadBalancer {
    pub fn new(service: &str, endpoints: Arc<Vec<Endpoint>>, strategy: LoadBalancingStrategy) -> Self {
        let selection = match strategy {
            LoadBalancingStrategy::RoundRobin => Selection::RoundRobin {
                cursor: AtomicUsize::new(0),
            },
            LoadBalancingStrategy::Random => Selection::Random,
        };

        Self {
            service: service.to_string(),
            endpoints,
            selection,
        }
    }

    pub fn strategy(&self) -> LoadBalancingStrategy {
        match self.selection {
            Selection::RoundRobin { .. } => LoadBalancingStrategy::RoundRobin,
            Selection::Random => LoadBalancingStrategy::Random,
        }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Endpoints currently eligible for selection (Active or Pending)
    pub fn candidates(&self) -> Vec<&Endpoint> {
        self.endpoints.iter().filter(|e| e.is_candidate()).collect()
    }

    pub fn has_candidate(&self) -> bool {
        self.endpoints.iter().any(|e| e.is_candidate())
    }

    /// Pick the next endpoint according to the strategy, or `None` if no candidate exists
    pub fn next_endpoint(&self) -> Option<&Endpoint> {
        match &self.selection {
            Selection::RoundRobin { cursor } => {
                let len = self.endpoints.len();
                if len == 0 {
                    return None;
                }

                // Scan the whole list from one cursor snapshot, then move the
                // cursor just past the pick. Retry if another caller moved it.
                let mut current = cursor.load(Ordering::Relaxed);
                loop {
                    let start = current % len;
                    let idx = (0..len)
                        .map(|offset| (start + offset) % len)
                        .find(|&i| self.endpoints[i].is_candidate())?;

                    match cursor.compare_exchange_weak(
                        current,
                        (idx + 1) % len,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => return Some(&self.endpoints[idx]),
                        Err(actual) => current = actual,
                    }
                }
            }
            Selection::Random => self.candidates().choose(&mut rand::thread_rng()).copied(),
        }
    }

    /// Execute the request against successive endpoints until one succeeds.
    ///
    /// A success marks the endpoint Active; any failure, including an attempt
    /// exceeding `attempt_timeout`, marks it Suspended and moves on. Fails
    /// with `NoAvailableEndpoints` once no candidate remains.
    pub async fn balance(
        &self,
        request: &Request,
        transport: &dyn Transport,
        attempt_timeout: Duration,
    ) -> Result<Response> {
        while let Some(endpoint) = self.next_endpoint() {
            debug!(endpoint = %endpoint, strategy = ?self.strategy(), "Trying endpoint");

            let outcome = match timeout(attempt_timeout, transport.execute(request, endpoint)).await {
                Ok(result) => result,
                Err(_) => Err(ProxyError::Transport(format!(
                    "no response within {:?}",
                    attempt_timeout
                ))),
            };

            match outcome {
                Ok(response) => {
                    endpoint.set_status(EndpointStatus::Active);
                    debug!(endpoint = %endpoint, status = response.status, "Endpoint succeeded, marked active");
                    return Ok(response);
                }
                Err(e) => {
                    endpoint.set_status(EndpointStatus::Suspended);
                    warn!(endpoint = %endpoint, error = %e, "Endpoint failed, marked suspended");
                }
            }
        }

        Err(ProxyError::NoAvailableEndpoints(self.service.clone()))
    }
}
