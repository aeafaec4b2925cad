use crate::cancel::CancelToken;
use crate::error::{ProbeError, ProbeResult};
use crate::messages::{IcmpResp, IpFamily, Reply, ResponseKind};
use crate::parser::decode_response;
use crate::socket::{RawSocket, Transport};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Upper bound on how long the reader blocks before looking at the stop flag.
const POLL: Duration = Duration::from_millis(100);

struct Route {
    destination: IpAddr,
    tx: Sender<Reply>,
}

type Routes = Arc<Mutex<HashMap<u16, Route>>>;

fn lock(routes: &Routes) -> MutexGuard<'_, HashMap<u16, Route>> {
    // a panicked prober must not take the dispatcher down with it
    routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the only read handle of a raw socket and fans decoded replies out by ICMP id.
///
/// Probers never read the socket themselves: they [`subscribe`](PacketListener::subscribe)
/// with their identifier and wait on the returned [`Subscription`].
pub struct PacketListener {
    transport: Arc<dyn Transport>,
    routes: Routes,
    stop: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl PacketListener {
    pub fn start(transport: Arc<dyn Transport>) -> PacketListener {
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let stop = CancelToken::new();

        let reader = Reader { transport: Arc::clone(&transport), routes: Arc::clone(&routes), stop: stop.clone() };
        let handle = thread::spawn(move || reader.run());

        PacketListener { transport, routes, stop, handle: Some(handle) }
    }

    /// Opens a raw socket for `family` and starts listening on it.
    pub fn open(family: IpFamily, source: Option<IpAddr>) -> ProbeResult<PacketListener> {
        let socket = RawSocket::open(family, source)?;
        Ok(PacketListener::start(Arc::new(socket)))
    }

    pub fn family(&self) -> IpFamily {
        self.transport.family()
    }

    /// Registers a stream: replies carrying `id`, and unreachables quoting
    /// `destination`, are delivered to the returned subscription.
    pub fn subscribe(&self, id: u16, destination: IpAddr) -> ProbeResult<Subscription> {
        let (tx, rx) = mpsc::channel();
        let mut routes = lock(&self.routes);
        if routes.contains_key(&id) {
            return Err(ProbeError::IdInUse(id));
        }
        routes.insert(id, Route { destination, tx });
        debug!(id, %destination, "subscribed");
        Ok(Subscription { id, rx, routes: Arc::clone(&self.routes) })
    }

    pub fn send(&self, packet: &[u8], dst: IpAddr, ttl: u8) -> ProbeResult<()> {
        self.transport.send_to(packet, dst, ttl)
    }

    pub fn set_tos(&self, tos: u8) -> ProbeResult<()> {
        self.transport.set_tos(tos)
    }
}

impl Drop for PacketListener {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Reader {
    transport: Arc<dyn Transport>,
    routes: Routes,
    stop: CancelToken,
}

impl Reader {
    fn run(self) {
        let family = self.transport.family();
        while !self.stop.is_cancelled() {
            match self.transport.recv_with_deadline(POLL) {
                Ok((bytes, from)) => self.handle_datagram(family, &bytes, from),
                Err(ProbeError::Timeout) => {}
                Err(e) => {
                    warn!(error = %e, %family, "receive failed");
                    thread::sleep(POLL);
                }
            }
        }
        debug!(%family, "listener stopped");
    }

    fn handle_datagram(&self, family: IpFamily, bytes: &[u8], from: IpAddr) {
        let received = Instant::now();
        let mut resp = match decode_response(family, bytes) {
            Ok(resp) => resp,
            Err(e) => {
                trace!(error = %e, %from, "dropping datagram");
                return;
            }
        };
        resp.src.get_or_insert(from);
        route(&self.routes, resp, received);
    }
}

fn route(routes: &Routes, resp: IcmpResp, received: Instant) {
    let routes = lock(routes);
    let target = match resp.kind() {
        ResponseKind::EchoReply | ResponseKind::TimeExceeded => routes.get(&resp.id),
        ResponseKind::Unreachable => match resp.quoted {
            Some(quoted) if quoted.echo => routes.get(&resp.id),
            // no echo header was quoted, the destination names the stream
            Some(quoted) => routes.values().find(|r| r.destination == quoted.dst),
            None => None,
        },
        ResponseKind::Other => None,
    };

    match target {
        Some(route) => {
            trace!(id = resp.id, seq = resp.seq, typ = resp.typ, "routing reply");
            // the stream may have finished; its reply is simply late
            let _ = route.tx.send(Reply { resp, received });
        }
        None => trace!(id = resp.id, typ = resp.typ, "no stream for reply"),
    }
}

/// A stream's view of the dispatcher. Dropping it releases the id.
pub struct Subscription {
    id: u16,
    rx: Receiver<Reply>,
    routes: Routes,
}

impl Subscription {
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Next reply for this stream, or `None` once `deadline` has passed.
    pub fn recv_until(&self, deadline: Instant) -> Option<Reply> {
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        self.rx.recv_timeout(deadline - now).ok()
    }

    /// Discards replies that are already queued.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        lock(&self.routes).remove(&self.id);
    }
}

/// One listener per address family in use.
#[derive(Default)]
pub struct Listeners {
    v4: Option<PacketListener>,
    v6: Option<PacketListener>,
}

impl Listeners {
    pub fn new() -> Listeners {
        Listeners::default()
    }

    /// Opens a raw socket for each family in `families`.
    pub fn open<I>(families: I, source: Option<IpAddr>) -> ProbeResult<Listeners>
    where
        I: IntoIterator<Item = IpFamily>,
    {
        let mut listeners = Listeners::new();
        for family in families {
            if listeners.get(family).is_ok() {
                continue;
            }
            let source = source.filter(|s| IpFamily::of(s) == family);
            listeners.insert(PacketListener::open(family, source)?);
        }
        Ok(listeners)
    }

    pub fn insert(&mut self, listener: PacketListener) {
        match listener.family() {
            IpFamily::V4 => self.v4 = Some(listener),
            IpFamily::V6 => self.v6 = Some(listener),
        }
    }

    pub fn get(&self, family: IpFamily) -> ProbeResult<&PacketListener> {
        match family {
            IpFamily::V4 => self.v4.as_ref(),
            IpFamily::V6 => self.v6.as_ref(),
        }
        .ok_or_else(|| ProbeError::InvalidConfig(format!("no {} socket is open", family)))
    }
}
