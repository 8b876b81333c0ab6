//! Services and the host-based service registry

use crate::balancer::LoadBalancer;
use crate::endpoint::Endpoint;
use crate::error::{ProxyError, Result};
use crate::http::{Request, Response};
use crate::transport::Transport;
use config::{LoadBalancingStrategy, ServiceDefinition};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, Instrument, Span};

/// A named cluster of endpoints routed by domain
#[derive(Debug)]
pub struct Service {
    pub name: String,
    pub domain: String,
    endpoints: Arc<Vec<Endpoint>>,
    balancer: LoadBalancer,
    span: Span,
}

impl Service {
    pub fn new(name: &str, domain: &str, strategy: LoadBalancingStrategy, endpoints: Vec<Endpoint>) -> Self {
        let endpoints = Arc::new(endpoints);
        let balancer = LoadBalancer::new(name, endpoints.clone(), strategy);
        let span = info_span!("service", name = %name, domain = %domain);

        Self {
            name: name.to_string(),
            domain: domain.to_string(),
            endpoints,
            balancer,
            span,
        }
    }

    pub fn from_definition(def: &ServiceDefinition) -> Self {
        let endpoints = def.endpoints.iter().map(Endpoint::from).collect();
        Self::new(&def.name, &def.domain, def.strategy, endpoints)
    }

    /// Parse a single `name,domain,strategy,host:port,...` record
    pub fn parse(record: &str) -> Result<Self> {
        let def = ServiceDefinition::parse(record)?;
        Ok(Self::from_definition(&def))
    }

    pub fn strategy(&self) -> LoadBalancingStrategy {
        self.balancer.strategy()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    /// Whether this service serves the given (already trimmed) host
    pub fn matches(&self, host: &str) -> bool {
        self.domain.trim().eq_ignore_ascii_case(host)
    }

    /// Forward a request through this service's balancer
    pub async fn process(
        &self,
        request: &Request,
        transport: &dyn Transport,
        attempt_timeout: Duration,
    ) -> Result<Response> {
        self.balancer
            .balance(request, transport, attempt_timeout)
            .instrument(self.span.clone())
            .await
    }
}

/// In-memory list of services, searched in registration order
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: RwLock<Vec<Arc<Service>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(defs: &[ServiceDefinition]) -> Self {
        let registry = Self::new();
        for def in defs {
            registry.register_service(Service::from_definition(def));
        }
        registry
    }

    /// Append a service; duplicate domains are not rejected and the first registered wins
    pub fn register_service(&self, service: Service) -> Arc<Service> {
        info!(
            service = %service.name,
            domain = %service.domain,
            strategy = %service.strategy(),
            endpoints = service.endpoints().len(),
            "Registered service"
        );
        let service = Arc::new(service);
        self.services.write().push(service.clone());
        service
    }

    /// Snapshot of the registered services
    pub fn services(&self) -> Vec<Arc<Service>> {
        self.services.read().clone()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Find the first service whose domain matches the request's Host header
    pub fn discover_service(&self, request: &Request) -> Result<Arc<Service>> {
        let host = request.host().unwrap_or_default();
        let found = self
            .services
            .read()
            .iter()
            .find(|s| s.matches(host))
            .cloned();

        match found {
            Some(service) => {
                debug!(host = %host, service = %service.name, "Matched service");
                Ok(service)
            }
            None => Err(ProxyError::ServiceNotFound(host.to_string())),
        }
    }

    /// Resolve the service for a request and forward it through its balancer
    pub async fn process_request(
        &self,
        request: &Request,
        transport: &dyn Transport,
        attempt_timeout: Duration,
    ) -> Result<Response> {
        let service = self.discover_service(request)?;
        service.process(request, transport, attempt_timeout).await
    }
}
