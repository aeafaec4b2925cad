//! ICMP probing engine: echo based ping and traceroute over raw sockets, for IPv4 and IPv6.

pub mod cancel;
pub mod config;
pub mod dns_resolver;
pub mod error;
pub mod listener;
pub mod messages;
pub mod packet;
pub mod parser;
pub mod pinger;
pub mod report;
pub mod socket;
pub mod stats;
pub mod tracer;
pub mod whois_resolver;

pub use cancel::CancelToken;
pub use config::{PingConfig, TraceConfig};
pub use error::{DecodeError, ProbeError, ProbeResult};
pub use listener::{Listeners, PacketListener, Subscription};
pub use messages::{HopError, HopResp, IcmpResp, IpFamily, PingOutcome, PingResult, Target, Whois};
pub use pinger::Pinger;
pub use report::{NullReporter, Reporter};
pub use socket::{RawSocket, Transport};
pub use stats::Stats;
pub use tracer::Tracer;
