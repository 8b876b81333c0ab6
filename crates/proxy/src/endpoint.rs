//! Backend endpoints and their health state
//!
//! An endpoint starts out `Pending`, becomes `Active` after a successful probe
//! or request, and `Suspended` after a failed one. Both the balancer and the
//! health monitor overwrite the status directly; the last writer wins.
//! `Blocked` is reserved and never assigned by hostgate itself.

use config::EndpointAddress;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Endpoint health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EndpointStatus {
    /// Not probed or attempted yet
    Pending = 0,
    /// Last probe or request succeeded
    Active = 1,
    /// Last probe or request failed
    Suspended = 2,
    /// Administratively excluded from selection
    Blocked = 3,
}

impl EndpointStatus {
    /// Whether an endpoint in this status may be selected by a balancer
    pub fn is_candidate(self) -> bool {
        matches!(self, EndpointStatus::Active | EndpointStatus::Pending)
    }
}

impl From<u8> for EndpointStatus {
    fn from(v: u8) -> Self {
        match v {
            0 => EndpointStatus::Pending,
            1 => EndpointStatus::Active,
            2 => EndpointStatus::Suspended,
            3 => EndpointStatus::Blocked,
            _ => EndpointStatus::Pending,
        }
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndpointStatus::Pending => "PENDING",
            EndpointStatus::Active => "ACTIVE",
            EndpointStatus::Suspended => "SUSPENDED",
            EndpointStatus::Blocked => "BLOCKED",
        };
        f.write_str(s)
    }
}

/// A single backend instance of a service
#[derive(Debug)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    status: AtomicU8,
}

impl Endpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            status: AtomicU8::new(EndpointStatus::Pending as u8),
        }
    }

    pub fn status(&self) -> EndpointStatus {
        EndpointStatus::from(self.status.load(Ordering::Acquire))
    }

    /// Overwrite the status, returning the previous one
    pub fn set_status(&self, status: EndpointStatus) -> EndpointStatus {
        EndpointStatus::from(self.status.swap(status as u8, Ordering::AcqRel))
    }

    pub fn is_candidate(&self) -> bool {
        self.status().is_candidate()
    }

    /// `host:port` form, suitable for connecting
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&EndpointAddress> for Endpoint {
    fn from(addr: &EndpointAddress) -> Self {
        Endpoint::new(&addr.host, addr.port)
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host.eq_ignore_ascii_case(&other.host)
            && self.port == other.port
            && self.status() == other.status()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
