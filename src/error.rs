//! Error types for the probing engine.

use std::io;
use std::net::IpAddr;
use thiserror::Error;

/// Why a received datagram was dropped by the decoder.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty datagram")]
    Empty,

    #[error("{kind} needs at least {need} bytes, got {len}")]
    Truncated { kind: &'static str, len: usize, need: usize },
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to encode echo request: {0}")]
    Encode(String),

    #[error("ignored datagram: {0}")]
    Decode(#[from] DecodeError),

    #[error("timed out waiting for a reply")]
    Timeout,

    #[error("socket error: {0}")]
    Socket(#[source] io::Error),

    #[error("permission denied opening a raw ICMP socket (run as root or grant CAP_NET_RAW): {0}")]
    Permission(#[source] io::Error),

    #[error("could not determine a local address towards {0}")]
    NoLocalAddress(IpAddr),

    #[error("unable to resolve {host}: {reason}")]
    Unresolvable { host: String, reason: String },

    #[error("ICMP identifier {0} is already in use on this socket")]
    IdInUse(u16),

    #[error("address family mismatch: socket is {socket}, destination is {destination}")]
    FamilyMismatch { socket: crate::IpFamily, destination: IpAddr },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ProbeError {
    /// Setup failures that abort a session before any probe is sent.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Permission(_)
                | Self::NoLocalAddress(_)
                | Self::Unresolvable { .. }
                | Self::InvalidConfig(_)
                | Self::IdInUse(_)
        )
    }

    /// Errors that are absorbed into loss or hop records.
    pub fn is_per_probe(&self) -> bool {
        matches!(self, Self::Timeout | Self::Decode(_) | Self::Encode(_) | Self::Socket(_))
    }
}

impl From<io::Error> for ProbeError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ProbeError::Timeout,
            io::ErrorKind::PermissionDenied => ProbeError::Permission(err),
            _ => ProbeError::Socket(err),
        }
    }
}

pub type ProbeResult<T> = Result<T, ProbeError>;
