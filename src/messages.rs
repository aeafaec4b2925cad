use crate::parser::{
    ICMPV4_DESTINATION_UNREACHABLE, ICMPV4_ECHO_REPLY, ICMPV4_TIME_EXCEEDED,
    ICMPV6_DESTINATION_UNREACHABLE, ICMPV6_ECHO_REPLY, ICMPV6_TIME_EXCEEDED,
};
use serde::{Serialize, Serializer};
use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn of(addr: &IpAddr) -> IpFamily {
        match addr {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }

    /// Bytes the IP and ICMP headers take out of a requested packet size.
    pub fn header_overhead(self) -> usize {
        match self {
            IpFamily::V4 => 20 + 8,
            IpFamily::V6 => 40 + 8,
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => f.write_str("IPv4"),
            IpFamily::V6 => f.write_str("IPv6"),
        }
    }
}

/// A resolved probe destination together with the string the user typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub ip: IpAddr,
}

impl Target {
    pub fn new(host: impl Into<String>, ip: IpAddr) -> Target {
        Target { host: host.into(), ip }
    }

    pub fn family(&self) -> IpFamily {
        IpFamily::of(&self.ip)
    }
}

/// Fields lifted from the IP header quoted inside an ICMP error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotedHeader {
    pub dst: IpAddr,
    pub ip_id: u16,
    /// The quoted echo header was present and its id/seq were copied into the response.
    pub echo: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    EchoReply,
    TimeExceeded,
    Unreachable,
    Other,
}

/// One decoded inbound ICMP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpResp {
    pub family: IpFamily,
    pub typ: u8,
    pub code: u8,
    pub id: u16,
    pub seq: u16,
    pub src: Option<IpAddr>,
    pub quoted: Option<QuotedHeader>,
}

impl IcmpResp {
    pub fn new(family: IpFamily, typ: u8, code: u8) -> IcmpResp {
        IcmpResp { family, typ, code, id: 0, seq: 0, src: None, quoted: None }
    }

    pub fn kind(&self) -> ResponseKind {
        match (self.family, self.typ) {
            (IpFamily::V4, ICMPV4_ECHO_REPLY) | (IpFamily::V6, ICMPV6_ECHO_REPLY) => ResponseKind::EchoReply,
            (IpFamily::V4, ICMPV4_TIME_EXCEEDED) | (IpFamily::V6, ICMPV6_TIME_EXCEEDED) => ResponseKind::TimeExceeded,
            (IpFamily::V4, ICMPV4_DESTINATION_UNREACHABLE) | (IpFamily::V6, ICMPV6_DESTINATION_UNREACHABLE) => {
                ResponseKind::Unreachable
            }
            _ => ResponseKind::Other,
        }
    }
}

/// A decoded response stamped with the instant the dispatcher read it.
#[derive(Debug, Clone)]
pub struct Reply {
    pub resp: IcmpResp,
    pub received: Instant,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Whois {
    pub holder: String,
    pub asn: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HopError {
    #[error("request timeout")]
    Timeout,
    #[error("destination unreachable (code {code})")]
    Unreachable { code: u8 },
}

/// The outcome for a single TTL value of a traceroute run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HopResp {
    pub num: u8,
    pub hop: String,
    pub ip: Option<IpAddr>,
    /// Round-trip time in milliseconds.
    pub elapsed: f64,
    pub last: bool,
    #[serde(serialize_with = "serialize_hop_error")]
    pub err: Option<HopError>,
    pub whois: Option<Whois>,
}

impl HopResp {
    pub fn timeout(num: u8) -> HopResp {
        HopResp {
            num,
            hop: "*".to_string(),
            ip: None,
            elapsed: 0.0,
            last: false,
            err: Some(HopError::Timeout),
            whois: None,
        }
    }
}

fn serialize_hop_error<S: Serializer>(err: &Option<HopError>, serializer: S) -> Result<S::Ok, S::Error> {
    match err {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Outcome of one echo exchange in a ping session.
#[derive(Debug, Clone, PartialEq)]
pub enum PingOutcome {
    Reply { from: IpAddr, rtt: Duration },
    /// A reply did arrive but only after the configured MaxRTT.
    TooSlow { from: IpAddr, rtt: Duration },
    Timeout,
    SendFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PingResult {
    pub target: Target,
    pub seq: u16,
    pub size: usize,
    pub outcome: PingOutcome,
}

pub fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
