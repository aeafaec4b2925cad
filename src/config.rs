//! Session configuration. Both configs are fixed once a session starts.

use crate::error::ProbeError;
use crate::messages::IpFamily;
use std::net::IpAddr;
use std::time::Duration;

pub const DEFAULT_PACKET_SIZE: i32 = 64;
pub const DEFAULT_MAX_TTL: u8 = 30;
pub const MAX_QUERIES: u8 = 10;
/// Largest IP datagram; `|size|` may not exceed it.
pub const MAX_PACKET_SIZE: u32 = 65_535;

fn validate_size(size: i32) -> Result<(), ProbeError> {
    if size.unsigned_abs() > MAX_PACKET_SIZE {
        return Err(ProbeError::InvalidConfig(format!(
            "packet size {} exceeds {} bytes",
            size, MAX_PACKET_SIZE
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PingConfig {
    /// ICMP identifier of the session; target `n` uses `id + n`.
    pub id: u16,
    /// Bytes on the wire including IP and ICMP headers; negative asks for a random size below it.
    pub size: i32,
    /// Probes per target, 0 to run until cancelled.
    pub count: u32,
    pub interval: Duration,
    pub timeout: Duration,
    /// Replies slower than this count as lost.
    pub max_rtt: Option<Duration>,
    pub ttl: u8,
    pub tos: Option<u8>,
    pub family: Option<IpFamily>,
    pub source: Option<IpAddr>,
}

impl Default for PingConfig {
    fn default() -> Self {
        PingConfig {
            id: std::process::id() as u16,
            size: DEFAULT_PACKET_SIZE,
            count: 4,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(2),
            max_rtt: None,
            ttl: 64,
            tos: None,
            family: None,
            source: None,
        }
    }
}

impl PingConfig {
    pub fn validate(&self) -> Result<(), ProbeError> {
        validate_size(self.size)?;
        if self.timeout.is_zero() {
            return Err(ProbeError::InvalidConfig("timeout must be greater than zero".to_string()));
        }
        if self.ttl == 0 {
            return Err(ProbeError::InvalidConfig("ttl must be at least 1".to_string()));
        }
        if let Some(max_rtt) = self.max_rtt {
            if max_rtt.is_zero() {
                return Err(ProbeError::InvalidConfig("max RTT must be greater than zero".to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub id: u16,
    pub size: i32,
    pub first_ttl: u8,
    pub max_ttl: u8,
    /// Probes sent per TTL before the hop is declared a timeout.
    pub queries: u8,
    /// How long to wait for each probe's reply.
    pub wait: Duration,
    pub tos: Option<u8>,
    pub family: Option<IpFamily>,
    pub source: Option<IpAddr>,
    /// Reverse resolve hop addresses.
    pub resolve: bool,
    /// Attach RIPE whois holder and ASN to each hop.
    pub ripe: bool,
    /// Hand each hop to the reporter as soon as it completes.
    pub real_time: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig {
            id: std::process::id() as u16,
            size: DEFAULT_PACKET_SIZE,
            first_ttl: 1,
            max_ttl: DEFAULT_MAX_TTL,
            queries: 1,
            wait: Duration::from_secs(2),
            tos: None,
            family: None,
            source: None,
            resolve: true,
            ripe: false,
            real_time: false,
        }
    }
}

impl TraceConfig {
    pub fn validate(&self) -> Result<(), ProbeError> {
        validate_size(self.size)?;
        if self.first_ttl == 0 || self.first_ttl > self.max_ttl {
            return Err(ProbeError::InvalidConfig(format!(
                "invalid TTL range {}..={}",
                self.first_ttl, self.max_ttl
            )));
        }
        if self.queries == 0 || self.queries > MAX_QUERIES {
            return Err(ProbeError::InvalidConfig(format!(
                "queries per hop must be between 1 and {}",
                MAX_QUERIES
            )));
        }
        if self.wait.is_zero() {
            return Err(ProbeError::InvalidConfig("wait must be greater than zero".to_string()));
        }
        Ok(())
    }
}
