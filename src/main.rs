//! hostgate: a host-routed reverse proxy
//!
//! Routes requests to backend services by Host header, balances them across
//! health-checked endpoints and caches responses per HTTP cache-control.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{CacheBackend, Config};
use pingora::apps::http_app::HttpServer;
use pingora::server::Server;
use pingora::services::listening::Service as ListeningService;
use proxy::{
    shutdown_channel, CacheManager, CacheStore, HealthCheckConfig, HealthMonitor, HttpTransport,
    MemoryStore, RedisStore, Router, ServiceRegistry,
};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod server;

use server::HostgateApp;

#[derive(Parser)]
#[command(name = "hostgate")]
#[command(author, version, about = "Host-routed reverse proxy with load balancing and caching")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "hostgate.toml")]
    config: PathBuf,

    /// Log level (overrides global.log_level)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Test configuration and exit
    #[arg(short, long)]
    test: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy
    Run {
        #[arg(short, long, default_value = "hostgate.toml")]
        config: PathBuf,
    },
    /// Validate configuration
    Validate {
        #[arg(short, long, default_value = "hostgate.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config_path, validate_only) = match cli.command {
        Some(Commands::Run { config }) => (config, false),
        Some(Commands::Validate { config }) => (config, true),
        None => (cli.config, cli.test),
    };

    // Load configuration
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Setup logging
    let level = cli
        .log_level
        .unwrap_or_else(|| config.global.log_level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    if validate_only {
        validate_config(&config)
    } else {
        run_server(config, config_path)
    }
}

#[allow(unreachable_code)]
fn run_server(config: Config, config_path: PathBuf) -> Result<()> {
    info!(config = ?config_path, "Starting hostgate");

    // Build service registry
    let definitions = config
        .service_definitions()
        .context("Invalid service definitions")?;
    let registry = Arc::new(ServiceRegistry::from_definitions(&definitions));
    if registry.is_empty() {
        warn!("No services configured; every request will be answered with 404");
    }

    // Setup response cache
    let cache = if config.cache.enabled {
        let store: Arc<dyn CacheStore> = match config.cache.backend {
            CacheBackend::Memory => {
                info!(
                    max_entry_size = config.cache.max_entry_size,
                    max_size = config.cache.max_size,
                    "Response cache enabled (memory)"
                );
                Arc::new(MemoryStore::new(
                    config.cache.max_entry_size,
                    config.cache.max_size,
                ))
            }
            CacheBackend::Redis => {
                info!(
                    url = %config.cache.url,
                    timeout = ?config.cache.timeout(),
                    "Response cache enabled (redis)"
                );
                Arc::new(
                    RedisStore::new(&config.cache.url, config.cache.timeout())
                        .context("Invalid cache.url")?,
                )
            }
        };
        Some(CacheManager::new(store, info_span!("cache")))
    } else {
        None
    };

    // Create outbound transport and router
    let request_timeout = config.global.request_timeout();
    let transport =
        HttpTransport::new(request_timeout).context("Failed to create outbound HTTP client")?;
    let router = Arc::new(Router::new(
        registry.clone(),
        cache,
        Arc::new(transport),
        request_timeout,
    ));

    // Create Pingora server
    let mut server = Server::new(None).context("Failed to create Pingora server")?;
    server.bootstrap();

    let mut listener =
        ListeningService::new("hostgate".to_string(), HttpServer::new_app(HostgateApp::new(router)));
    listener.add_tcp(&config.global.listen);
    server.add_service(listener);
    info!(address = %config.global.listen, services = registry.len(), "Listening (HTTP)");

    // Start health monitor
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let (stopped_tx, stopped_rx) = mpsc::channel::<()>();

    if config.health_check.enabled {
        let monitor = HealthMonitor::new(
            registry.clone(),
            HealthCheckConfig::from_options(&config.health_check),
        );
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = %e, "Failed to create tokio runtime for health monitor");
                    return;
                }
            };
            rt.block_on(monitor.run(shutdown_rx));
            let _ = stopped_tx.send(());
        });
    } else {
        info!("Health checks disabled");
        drop(stopped_tx);
    }

    // Setup graceful shutdown
    let grace_period = Duration::from_secs(config.global.grace_period);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, initiating graceful shutdown...");
        let _ = shutdown_tx.send(true);

        match stopped_rx.recv_timeout(grace_period) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                info!("Background tasks stopped");
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(grace_period_secs = grace_period.as_secs(), "Grace period expired");
            }
        }

        info!("Shutdown complete");
        std::process::exit(0);
    })
    .ok();

    info!("hostgate started successfully");
    server.run_forever();

    Ok(())
}

fn validate_config(config: &Config) -> Result<()> {
    let definitions = config.service_definitions()?;

    println!("Configuration is valid!");
    println!("  Listen: {}", config.global.listen);
    println!("  Services: {}", definitions.len());
    for def in &definitions {
        println!(
            "  - {} ({}, {}): {} endpoints",
            def.name,
            def.domain,
            def.strategy,
            def.endpoints.len()
        );
        for endpoint in &def.endpoints {
            println!("    Endpoint: {}", endpoint);
        }
    }
    println!(
        "  Health checks: {}",
        if config.health_check.enabled {
            format!(
                "every {} (timeout {})",
                config.health_check.interval, config.health_check.timeout
            )
        } else {
            "disabled".to_string()
        }
    );
    println!(
        "  Cache: {}",
        if config.cache.enabled {
            match config.cache.backend {
                CacheBackend::Memory => "enabled (memory)".to_string(),
                CacheBackend::Redis => format!("enabled (redis at {})", config.cache.url),
            }
        } else {
            "disabled".to_string()
        }
    );

    Ok(())
}
