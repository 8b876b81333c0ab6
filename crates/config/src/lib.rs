//! hostgate-config: Configuration for hostgate
//!
//! This crate provides configuration file parsing and validation, and the
//! parser for the `;`-separated service definition format.

pub mod config;
pub mod services;

pub use config::*;
pub use services::{parse_services, EndpointAddress, LoadBalancingStrategy, ServiceDefinition};
