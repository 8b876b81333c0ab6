//! Service definition strings
//!
//! Services are declared as `;`-separated records of the form
//! `name,domain,strategy,host1:port1,host2:port2,...`.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Load balancing strategy
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    Random,
}

impl FromStr for LoadBalancingStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round_robin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            other => Err(ConfigError::InvalidServiceDefinition(format!(
                "Unknown load balancing strategy: '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoundRobin => f.write_str("round_robin"),
            Self::Random => f.write_str("random"),
        }
    }
}

/// A backend address as written in a service definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointAddress {
    pub host: String,
    pub port: u16,
}

impl FromStr for EndpointAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            ConfigError::InvalidServiceDefinition(format!("Invalid address (missing port): {}", s))
        })?;

        let host = host.trim();
        if host.is_empty() {
            return Err(ConfigError::InvalidServiceDefinition(format!(
                "Invalid address (missing host): {}",
                s
            )));
        }

        // IPv6 literals must be bracketed; any other ':' means a stray port
        let bracketed = host.starts_with('[') && host.ends_with(']') && host.len() > 2;
        if host.contains(':') && !bracketed {
            return Err(ConfigError::InvalidServiceDefinition(format!(
                "Invalid address (unexpected ':' in host): {}",
                s
            )));
        }

        let port = port.trim().parse::<u16>().map_err(|_| {
            ConfigError::InvalidServiceDefinition(format!("Invalid port in address: {}", s))
        })?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One parsed service record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub domain: String,
    pub strategy: LoadBalancingStrategy,
    pub endpoints: Vec<EndpointAddress>,
}

impl ServiceDefinition {
    /// Parse a single `name,domain,strategy,host:port,...` record
    pub fn parse(record: &str) -> Result<Self, ConfigError> {
        let fields: Vec<&str> = record.split(',').map(str::trim).collect();
        if fields.len() < 4 {
            return Err(ConfigError::InvalidServiceDefinition(format!(
                "Invalid service record: {}",
                record.trim()
            )));
        }

        let strategy = fields[2].parse::<LoadBalancingStrategy>()?;
        let endpoints = fields[3..]
            .iter()
            .filter(|field| !field.is_empty())
            .map(|field| field.parse::<EndpointAddress>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: fields[0].to_string(),
            domain: fields[1].to_string(),
            strategy,
            endpoints,
        })
    }
}

/// Parse a `;`-separated list of service records, skipping blank records
pub fn parse_services(s: &str) -> Result<Vec<ServiceDefinition>, ConfigError> {
    s.split(';')
        .filter(|record| !record.trim().is_empty())
        .map(ServiceDefinition::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_service() {
        let def = ServiceDefinition::parse("A,a.com,random,1.1.1.1:80,2.2.2.2:80").unwrap();
        assert_eq!(def.name, "A");
        assert_eq!(def.domain, "a.com");
        assert_eq!(def.strategy, LoadBalancingStrategy::Random);
        assert_eq!(
            def.endpoints,
            vec![
                EndpointAddress { host: "1.1.1.1".to_string(), port: 80 },
                EndpointAddress { host: "2.2.2.2".to_string(), port: 80 },
            ]
        );
    }

    #[test]
    fn test_parse_trims_fields() {
        let def = ServiceDefinition::parse(" Service A , servicea.com , ROUND_ROBIN , 10.0.0.1:8001 ").unwrap();
        assert_eq!(def.name, "Service A");
        assert_eq!(def.domain, "servicea.com");
        assert_eq!(def.strategy, LoadBalancingStrategy::RoundRobin);
        assert_eq!(def.endpoints[0].to_string(), "10.0.0.1:8001");
    }

    #[test]
    fn test_parse_skips_blank_endpoints() {
        let def = ServiceDefinition::parse("A,a.com,random,1.1.1.1:80,,").unwrap();
        assert_eq!(def.endpoints.len(), 1);
    }

    #[test]
    fn test_parse_too_few_fields() {
        assert!(matches!(
            ServiceDefinition::parse("A,a.com,random"),
            Err(ConfigError::InvalidServiceDefinition(_))
        ));
    }

    #[test]
    fn test_parse_unknown_strategy() {
        assert!(ServiceDefinition::parse("A,a.com,least_conn,1.1.1.1:80").is_err());
    }

    #[test]
    fn test_parse_malformed_address() {
        assert!(ServiceDefinition::parse("A,a.com,random,1.1.1.1").is_err());
        assert!(ServiceDefinition::parse("A,a.com,random,1.1.1.1:http").is_err());
        assert!(ServiceDefinition::parse("A,a.com,random,:80").is_err());
        assert!(ServiceDefinition::parse("A,a.com,random,1.1.1.1:70000").is_err());
    }

    #[test]
    fn test_address_rejects_extra_colon() {
        assert!("1.1.1.1:80:90".parse::<EndpointAddress>().is_err());
        assert!("::1:80".parse::<EndpointAddress>().is_err());
        assert!(ServiceDefinition::parse("A,a.com,random,1.1.1.1:80:90").is_err());
    }

    #[test]
    fn test_address_bracketed_ipv6() {
        let addr: EndpointAddress = "[::1]:8080".parse().unwrap();
        assert_eq!(addr.host, "[::1]");
        assert_eq!(addr.port, 8080);
        assert_eq!(addr.to_string(), "[::1]:8080");
    }

    #[test]
    fn test_parse_services_list() {
        let defs = parse_services(
            "A,a.com,random,1.1.1.1:80;B,b.com,round_robin,2.2.2.2:81,3.3.3.3:82;",
        )
        .unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[1].name, "B");
        assert_eq!(defs[1].endpoints.len(), 2);
    }

    #[test]
    fn test_parse_services_empty() {
        assert!(parse_services("").unwrap().is_empty());
        assert!(parse_services(" ; ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_services_propagates_error() {
        assert!(parse_services("A,a.com,random,1.1.1.1:80;broken").is_err());
    }

    #[test]
    fn test_strategy_display_round_trip() {
        for strategy in [LoadBalancingStrategy::RoundRobin, LoadBalancingStrategy::Random] {
            assert_eq!(strategy.to_string().parse::<LoadBalancingStrategy>().unwrap(), strategy);
        }
    }
}
