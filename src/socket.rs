use crate::error::{ProbeError, ProbeResult};
use crate::messages::IpFamily;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, trace};

const RECV_BUFFER: usize = 1500;

/// The socket seam between the probers and the OS.
///
/// TTL is a parameter of every send rather than sticky socket state, so a trace
/// and a ping sharing one socket cannot leak hop limits into each other's probes.
pub trait Transport: Send + Sync {
    fn family(&self) -> IpFamily;

    /// Applies `ttl` (hop limit on IPv6) and sends `packet` to `dst` as one step.
    fn send_to(&self, packet: &[u8], dst: IpAddr, ttl: u8) -> ProbeResult<()>;

    /// Marks outgoing IPv4 packets with a type-of-service byte.
    fn set_tos(&self, tos: u8) -> ProbeResult<()>;

    /// Blocks for at most `wait`; [`ProbeError::Timeout`] if nothing arrived.
    fn recv_with_deadline(&self, wait: Duration) -> ProbeResult<(Vec<u8>, IpAddr)>;
}

/// A raw ICMP or ICMPv6 socket.
pub struct RawSocket {
    socket: Socket,
    family: IpFamily,
    // last TTL applied; the lock also serializes sends
    ttl: Mutex<Option<u8>>,
}

impl RawSocket {
    pub fn open(family: IpFamily, source: Option<IpAddr>) -> ProbeResult<RawSocket> {
        let (domain, protocol) = match family {
            IpFamily::V4 => (Domain::IPV4, Protocol::ICMPV4),
            IpFamily::V6 => (Domain::IPV6, Protocol::ICMPV6),
        };
        // EPERM/EACCES surface as ProbeError::Permission
        let socket = Socket::new(domain, Type::RAW, Some(protocol))?;
        socket.set_nonblocking(false).map_err(ProbeError::Socket)?;

        if let Some(source) = source {
            if IpFamily::of(&source) != family {
                return Err(ProbeError::FamilyMismatch { socket: family, destination: source });
            }
            socket.bind(&SockAddr::from(SocketAddr::new(source, 0))).map_err(ProbeError::Socket)?;
        }

        debug!(%family, ?source, "opened raw ICMP socket");
        Ok(RawSocket { socket, family, ttl: Mutex::new(None) })
    }

    /// Sets the unicast TTL (IPv4) or hop limit (IPv6) for following sends.
    pub fn set_ttl_or_hop_limit(&self, ttl: u8) -> ProbeResult<()> {
        match self.family {
            IpFamily::V4 => self.socket.set_ttl(ttl as u32),
            IpFamily::V6 => self.socket.set_unicast_hops_v6(ttl as u32),
        }
        .map_err(ProbeError::Socket)
    }
}

impl Transport for RawSocket {
    fn family(&self) -> IpFamily {
        self.family
    }

    fn send_to(&self, packet: &[u8], dst: IpAddr, ttl: u8) -> ProbeResult<()> {
        if IpFamily::of(&dst) != self.family {
            return Err(ProbeError::FamilyMismatch { socket: self.family, destination: dst });
        }
        let mut current = self
            .ttl
            .lock()
            .map_err(|_| ProbeError::Socket(std::io::Error::other("send lock poisoned")))?;
        if *current != Some(ttl) {
            self.set_ttl_or_hop_limit(ttl)?;
            *current = Some(ttl);
        }
        let sent = self
            .socket
            .send_to(packet, &SockAddr::from(SocketAddr::new(dst, 0)))
            .map_err(ProbeError::Socket)?;
        trace!(%dst, ttl, bytes = sent, "sent probe");
        Ok(())
    }

    fn set_tos(&self, tos: u8) -> ProbeResult<()> {
        match self.family {
            IpFamily::V4 => self.socket.set_tos(tos as u32).map_err(ProbeError::Socket),
            IpFamily::V6 => {
                debug!(tos, "TOS marking is not applied to IPv6 sockets");
                Ok(())
            }
        }
    }

    fn recv_with_deadline(&self, wait: Duration) -> ProbeResult<(Vec<u8>, IpAddr)> {
        // a zero timeout would mean "block forever"
        let wait = wait.max(Duration::from_millis(1));
        self.socket.set_read_timeout(Some(wait)).map_err(ProbeError::Socket)?;

        let mut buf = vec![0u8; RECV_BUFFER];
        // SAFETY: MaybeUninit<u8> has the layout of u8 and the buffer is already initialised.
        let uninit = unsafe { &mut *(buf.as_mut_slice() as *mut [u8] as *mut [MaybeUninit<u8>]) };
        let (len, addr) = self.socket.recv_from(uninit)?;
        let from = addr
            .as_socket()
            .map(|a| a.ip())
            .ok_or_else(|| ProbeError::Socket(std::io::Error::other("datagram from a non-IP address")))?;
        buf.truncate(len);
        Ok((buf, from))
    }
}

/// Finds the local address the OS would route `dst` from.
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick a route.
pub fn local_addr(dst: IpAddr) -> ProbeResult<IpAddr> {
    let bind: SocketAddr = match dst {
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };
    let socket = UdpSocket::bind(bind).map_err(|e| {
        debug!(error = %e, "bind for local address discovery failed");
        ProbeError::NoLocalAddress(dst)
    })?;
    socket.connect(SocketAddr::new(dst, 80)).map_err(|e| {
        debug!(error = %e, %dst, "connect for local address discovery failed");
        ProbeError::NoLocalAddress(dst)
    })?;
    let local = socket.local_addr().map_err(|_| ProbeError::NoLocalAddress(dst))?.ip();
    if local.is_unspecified() {
        return Err(ProbeError::NoLocalAddress(dst));
    }
    Ok(local)
}

/// Picks the source address for a session: the configured one, or the discovered one.
pub fn source_addr(configured: Option<IpAddr>, dst: IpAddr) -> ProbeResult<IpAddr> {
    match configured {
        Some(src) => Ok(src),
        None => local_addr(dst),
    }
}
