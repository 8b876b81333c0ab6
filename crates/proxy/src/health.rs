//! Background health monitor for service endpoints

use crate::endpoint::{Endpoint, EndpointStatus};
use crate::registry::ServiceRegistry;
use config::{parse_duration, HealthCheckOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Span};

/// Health check configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(1),
        }
    }
}

impl HealthCheckConfig {
    /// Unparseable or zero durations fall back to the defaults
    pub fn from_options(options: &HealthCheckOptions) -> Self {
        let defaults = Self::default();
        let positive = |s: &str| parse_duration(s).filter(|d| !d.is_zero());
        Self {
            interval: positive(&options.interval).unwrap_or(defaults.interval),
            timeout: positive(&options.timeout).unwrap_or(defaults.timeout),
        }
    }
}

/// Periodically probes every endpoint of every registered service
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    config: HealthCheckConfig,
    span: Span,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ServiceRegistry>, config: HealthCheckConfig) -> Self {
        Self {
            registry,
            config,
            span: info_span!("health_monitor"),
        }
    }

    /// Bounded TCP connect to the endpoint's address
    pub async fn probe(&self, endpoint: &Endpoint) -> bool {
        match timeout(self.config.timeout, TcpStream::connect(endpoint.address())).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(parent: &self.span, endpoint = %endpoint, error = %e, "TCP connect failed");
                false
            }
            Err(_) => {
                debug!(parent: &self.span, endpoint = %endpoint, "Health check timed out");
                false
            }
        }
    }

    /// Probe all endpoints once, in registration order, overwriting their status
    pub async fn tick(&self) {
        for service in self.registry.services() {
            for endpoint in service.endpoints() {
                let status = if self.probe(endpoint).await {
                    EndpointStatus::Active
                } else {
                    EndpointStatus::Suspended
                };

                let previous = endpoint.set_status(status);
                if previous != status {
                    match status {
                        EndpointStatus::Active => info!(
                            parent: &self.span,
                            service = %service.name,
                            endpoint = %endpoint,
                            previous = %previous,
                            "Endpoint marked active"
                        ),
                        _ => warn!(
                            parent: &self.span,
                            service = %service.name,
                            endpoint = %endpoint,
                            previous = %previous,
                            "Endpoint marked suspended"
                        ),
                    }
                }
            }
        }
    }

    /// Run ticks on the configured interval until shutdown is signalled
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        // tokio::time::interval panics on a zero period
        let period = if self.config.interval.is_zero() {
            HealthCheckConfig::default().interval
        } else {
            self.config.interval
        };
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            parent: &self.span,
            interval = ?period,
            timeout = ?self.config.timeout,
            services = self.registry.len(),
            "Health monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(parent: &self.span, "Health monitor shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Create a shutdown channel pair
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Service;
    use tokio::net::TcpListener;

    fn fast_config() -> HealthCheckConfig {
        HealthCheckConfig {
            interval: Duration::from_millis(50),
            timeout: Duration::from_secs(1),
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_config_from_options() {
        let options = HealthCheckOptions {
            enabled: true,
            interval: "10s".to_string(),
            timeout: "250ms".to_string(),
        };
        let config = HealthCheckConfig::from_options(&options);
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_config_falls_back_to_defaults() {
        let options = HealthCheckOptions {
            enabled: true,
            interval: "often".to_string(),
            timeout: "".to_string(),
        };
        assert_eq!(HealthCheckConfig::from_options(&options), HealthCheckConfig::default());
    }

    #[test]
    fn test_config_zero_durations_fall_back() {
        let options = HealthCheckOptions {
            enabled: true,
            interval: "0s".to_string(),
            timeout: "0ms".to_string(),
        };
        assert_eq!(HealthCheckConfig::from_options(&options), HealthCheckConfig::default());
    }

    #[tokio::test]
    async fn test_run_with_zero_interval_does_not_panic() {
        let registry = Arc::new(ServiceRegistry::new());
        let monitor = HealthMonitor::new(
            registry,
            HealthCheckConfig {
                interval: Duration::ZERO,
                timeout: Duration::from_millis(100),
            },
        );

        let (tx, rx) = shutdown_channel();
        let handle = tokio::spawn(async move { monitor.run(rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        // A panic inside run would surface as a JoinError here
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_shutdown_channel() {
        let (tx, rx) = shutdown_channel();
        assert!(!*rx.borrow());
        tx.send(true).unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_tick_updates_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = closed_port().await;

        let registry = Arc::new(ServiceRegistry::new());
        registry.register_service(Service::new(
            "A",
            "a.com",
            config::LoadBalancingStrategy::RoundRobin,
            vec![Endpoint::new("127.0.0.1", open), Endpoint::new("127.0.0.1", closed)],
        ));

        let monitor = HealthMonitor::new(registry.clone(), fast_config());
        monitor.tick().await;

        let services = registry.services();
        let service = &services[0];
        assert_eq!(service.endpoints()[0].status(), EndpointStatus::Active);
        assert_eq!(service.endpoints()[1].status(), EndpointStatus::Suspended);
    }

    #[tokio::test]
    async fn test_tick_restores_suspended_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let registry = Arc::new(ServiceRegistry::new());
        let service = registry.register_service(Service::new(
            "A",
            "a.com",
            config::LoadBalancingStrategy::Random,
            vec![Endpoint::new("127.0.0.1", port)],
        ));
        service.endpoints()[0].set_status(EndpointStatus::Suspended);
        assert!(!service.balancer().has_candidate());

        HealthMonitor::new(registry, fast_config()).tick().await;
        assert_eq!(service.endpoints()[0].status(), EndpointStatus::Active);
        assert!(service.balancer().has_candidate());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let closed = closed_port().await;
        let registry = Arc::new(ServiceRegistry::new());
        let service = registry.register_service(Service::new(
            "A",
            "a.com",
            config::LoadBalancingStrategy::RoundRobin,
            vec![Endpoint::new("127.0.0.1", closed)],
        ));

        let (tx, rx) = shutdown_channel();
        let monitor = HealthMonitor::new(registry, fast_config());
        let handle = tokio::spawn(async move { monitor.run(rx).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(service.endpoints()[0].status(), EndpointStatus::Suspended);
    }
}
