//! hostgate-proxy: host-based routing, load balancing, health tracking and
//! response caching for hostgate.

pub mod balancer;
pub mod cache;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod http;
pub mod registry;
pub mod router;
pub mod store;
pub mod transport;

pub use balancer::LoadBalancer;
pub use cache::{cache_key, CacheControl, CacheItem, CacheManager};
pub use endpoint::{Endpoint, EndpointStatus};
pub use error::*;
pub use health::{shutdown_channel, HealthCheckConfig, HealthMonitor};
pub use http::{Request, Response};
pub use registry::{Service, ServiceRegistry};
pub use router::Router;
pub use store::{CacheStore, MemoryStore, RedisStore};
pub use transport::{HttpTransport, Transport};
