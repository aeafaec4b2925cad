//! End-to-end probing scenarios against a scripted in-memory network.
//!
//! The network answers each probe from a closure, so ping and traceroute run
//! their real send / dispatch / correlate paths without touching a raw socket.

use hopscan::dns_resolver::ReverseResolver;
use hopscan::whois_resolver::{NoWhois, WhoisLookup};
use hopscan::{
    CancelToken, HopError, HopResp, IpFamily, Listeners, NullReporter, PacketListener, PingConfig, PingOutcome,
    PingResult, Pinger, ProbeError, ProbeResult, Reporter, Stats, Target, TraceConfig, Tracer, Transport, Whois,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

const LOCAL: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

#[derive(Debug, Clone, Copy)]
struct Probe {
    dst: IpAddr,
    ttl: u8,
    typ: u8,
    id: u16,
    seq: u16,
}

/// A datagram the network delivers in answer to a probe.
struct Answer {
    bytes: Vec<u8>,
    from: IpAddr,
    delay: Duration,
}

impl Answer {
    fn new(bytes: Vec<u8>, from: impl Into<IpAddr>) -> Answer {
        Answer { bytes, from: from.into(), delay: Duration::ZERO }
    }

    fn after(mut self, millis: u64) -> Answer {
        self.delay = Duration::from_millis(millis);
        self
    }
}

struct Datagram {
    at: Instant,
    bytes: Vec<u8>,
    from: IpAddr,
}

type Responder = Box<dyn Fn(&Probe) -> Vec<Answer> + Send + Sync>;

struct Network {
    family: IpFamily,
    queue: Mutex<VecDeque<Datagram>>,
    ready: Condvar,
    sent: Mutex<Vec<Probe>>,
    responder: Responder,
}

impl Network {
    fn new(family: IpFamily, responder: impl Fn(&Probe) -> Vec<Answer> + Send + Sync + 'static) -> Arc<Network> {
        Arc::new(Network {
            family,
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            sent: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        })
    }

    fn v4(responder: impl Fn(&Probe) -> Vec<Answer> + Send + Sync + 'static) -> Arc<Network> {
        Network::new(IpFamily::V4, responder)
    }

    fn sent(&self) -> Vec<Probe> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for Network {
    fn family(&self) -> IpFamily {
        self.family
    }

    fn send_to(&self, packet: &[u8], dst: IpAddr, ttl: u8) -> ProbeResult<()> {
        assert_eq!(IpFamily::of(&dst), self.family);
        let probe = Probe {
            dst,
            ttl,
            typ: packet[0],
            id: u16::from_be_bytes([packet[4], packet[5]]),
            seq: u16::from_be_bytes([packet[6], packet[7]]),
        };
        self.sent.lock().unwrap().push(probe);

        let now = Instant::now();
        let mut queue = self.queue.lock().unwrap();
        for answer in (self.responder)(&probe) {
            queue.push_back(Datagram { at: now + answer.delay, bytes: answer.bytes, from: answer.from });
        }
        self.ready.notify_all();
        Ok(())
    }

    fn set_tos(&self, _tos: u8) -> ProbeResult<()> {
        Ok(())
    }

    fn recv_with_deadline(&self, wait: Duration) -> ProbeResult<(Vec<u8>, IpAddr)> {
        let deadline = Instant::now() + wait;
        let mut queue = self.queue.lock().unwrap();
        loop {
            let now = Instant::now();
            if let Some(pos) = queue.iter().position(|d| d.at <= now) {
                let d = queue.remove(pos).unwrap();
                return Ok((d.bytes, d.from));
            }
            if now >= deadline {
                return Err(ProbeError::Timeout);
            }
            let wake = queue.iter().map(|d| d.at).min().map_or(deadline, |at| at.min(deadline));
            queue = self.ready.wait_timeout(queue, wake - now).unwrap().0;
        }
    }
}

fn ipv4_header(src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
    let mut h = vec![0u8; 20];
    h[0] = 0x45;
    h[8] = 64;
    h[9] = 1;
    h[12..16].copy_from_slice(&src.octets());
    h[16..20].copy_from_slice(&dst.octets());
    h
}

fn ipv6_header(dst: Ipv6Addr) -> Vec<u8> {
    let mut h = vec![0u8; 40];
    h[0] = 0x60;
    h[6] = 58;
    h[7] = 64;
    h[24..40].copy_from_slice(&dst.octets());
    h
}

fn icmp_header(typ: u8, code: u8, id: u16, seq: u16) -> Vec<u8> {
    let mut h = vec![typ, code, 0, 0];
    h.extend_from_slice(&id.to_be_bytes());
    h.extend_from_slice(&seq.to_be_bytes());
    h
}

fn echo_reply(from: Ipv4Addr, id: u16, seq: u16) -> Answer {
    let mut b = ipv4_header(from, LOCAL);
    b.extend(icmp_header(0, 0, id, seq));
    b.extend([0u8; 36]);
    Answer::new(b, from)
}

fn time_exceeded(router: Ipv4Addr, dst: Ipv4Addr, id: u16, seq: u16) -> Answer {
    let mut b = ipv4_header(router, LOCAL);
    b.extend(icmp_header(11, 0, 0, 0));
    b.extend(ipv4_header(LOCAL, dst));
    b.extend(icmp_header(8, 0, id, seq));
    Answer::new(b, router)
}

fn unreachable(router: Ipv4Addr, dst: Ipv4Addr, code: u8, id: u16, seq: u16) -> Answer {
    let mut b = ipv4_header(router, LOCAL);
    b.extend(icmp_header(3, code, 0, 0));
    b.extend(ipv4_header(LOCAL, dst));
    b.extend(icmp_header(8, 0, id, seq));
    Answer::new(b, router)
}

// ICMPv6 arrives without the IP header; the source only comes from the socket.

fn echo_reply_v6(from: Ipv6Addr, id: u16, seq: u16) -> Answer {
    let mut b = icmp_header(129, 0, id, seq);
    b.extend([0u8; 16]);
    Answer::new(b, from)
}

fn time_exceeded_v6(router: Ipv6Addr, dst: Ipv6Addr, id: u16, seq: u16) -> Answer {
    let mut b = icmp_header(3, 0, 0, 0);
    b.extend(ipv6_header(dst));
    b.extend(icmp_header(128, 0, id, seq));
    Answer::new(b, router)
}

fn unreachable_v6(router: Ipv6Addr, dst: Ipv6Addr, code: u8, id: u16, seq: u16) -> Answer {
    let mut b = icmp_header(1, code, 0, 0);
    b.extend(ipv6_header(dst));
    b.extend(icmp_header(128, 0, id, seq));
    Answer::new(b, router)
}

fn v4(probe: &Probe) -> Ipv4Addr {
    match probe.dst {
        IpAddr::V4(ip) => ip,
        IpAddr::V6(_) => unreachable!(),
    }
}

fn v6(probe: &Probe) -> Ipv6Addr {
    match probe.dst {
        IpAddr::V6(ip) => ip,
        IpAddr::V4(_) => unreachable!(),
    }
}

fn router(n: u8) -> Ipv4Addr {
    Ipv4Addr::new(192, 168, n, 1)
}

fn router_v6(n: u8) -> Ipv6Addr {
    Ipv6Addr::new(0x2001, 0xdb8, n as u16, 0, 0, 0, 0, 1)
}

fn target(ip: impl Into<IpAddr>) -> Target {
    let ip = ip.into();
    Target::new(ip.to_string(), ip)
}

#[derive(Default)]
struct Collector {
    pings: Mutex<Vec<PingResult>>,
    summaries: Mutex<Vec<(Target, Stats)>>,
    hops: Mutex<Vec<HopResp>>,
}

impl Reporter for Collector {
    fn ping_result(&self, result: &PingResult) {
        self.pings.lock().unwrap().push(result.clone());
    }

    fn ping_summary(&self, target: &Target, stats: &Stats) {
        self.summaries.lock().unwrap().push((target.clone(), stats.clone()));
    }

    fn hop(&self, hop: &HopResp) {
        self.hops.lock().unwrap().push(hop.clone());
    }
}

struct Names(HashMap<IpAddr, String>);

impl ReverseResolver for Names {
    fn reverse(&self, addr: IpAddr) -> Option<String> {
        self.0.get(&addr).cloned()
    }
}

#[derive(Default)]
struct CountingWhois {
    calls: AtomicUsize,
}

impl WhoisLookup for CountingWhois {
    fn lookup(&self, addr: IpAddr) -> Option<Whois> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match addr {
            IpAddr::V4(ip) if ip.octets()[0] == 192 => Some(Whois { holder: "TRANSIT".to_string(), asn: 64500 }),
            _ => None,
        }
    }
}

fn trace_config() -> TraceConfig {
    TraceConfig {
        id: 0x5150,
        wait: Duration::from_millis(200),
        resolve: false,
        ..TraceConfig::default()
    }
}

fn run_trace(net: &Arc<Network>, config: TraceConfig, dst: impl Into<IpAddr>) -> Vec<HopResp> {
    let listener = PacketListener::start(net.clone());
    let resolver = Names(HashMap::new());
    let mut tracer = Tracer::new(config, StdRng::seed_from_u64(1), &resolver, &NoWhois);
    tracer.run(&listener, &target(dst), &CancelToken::new(), &NullReporter).unwrap()
}

#[test]
fn test_trace_three_hops() {
    let dst = Ipv4Addr::new(203, 0, 113, 50);
    let net = Network::v4(move |p| {
        if p.ttl < 3 {
            vec![time_exceeded(router(p.ttl), v4(p), p.id, p.seq)]
        } else {
            vec![echo_reply(v4(p), p.id, p.seq)]
        }
    });

    let hops = run_trace(&net, trace_config(), dst);

    assert_eq!(hops.len(), 3);
    for (i, hop) in hops.iter().enumerate() {
        assert_eq!(hop.num as usize, i + 1);
        assert_eq!(hop.err, None);
    }
    assert_eq!(hops[0].ip, Some(IpAddr::V4(router(1))));
    assert_eq!(hops[1].ip, Some(IpAddr::V4(router(2))));
    assert!(!hops[0].last && !hops[1].last);
    assert!(hops[2].last);
    assert_eq!(hops[2].ip, Some(IpAddr::V4(dst)));
    assert_eq!(hops[2].hop, dst.to_string());

    let ttls: Vec<u8> = net.sent().iter().map(|p| p.ttl).collect();
    assert_eq!(ttls, vec![1, 2, 3]);
}

#[test]
fn test_trace_stops_at_unreachable() {
    let dst = Ipv4Addr::new(203, 0, 113, 60);
    let net = Network::v4(move |p| {
        if p.ttl < 5 {
            vec![time_exceeded(router(p.ttl), v4(p), p.id, p.seq)]
        } else {
            vec![unreachable(router(p.ttl), v4(p), 1, p.id, p.seq)]
        }
    });

    let hops = run_trace(&net, trace_config(), dst);

    assert_eq!(hops.len(), 5);
    let last = &hops[4];
    assert_eq!(last.num, 5);
    assert_eq!(last.err, Some(HopError::Unreachable { code: 1 }));
    assert!(!last.last);
    assert_eq!(last.ip, Some(IpAddr::V4(router(5))));
    assert!(hops[..4].iter().all(|h| h.err.is_none()));
    assert_eq!(net.sent().iter().map(|p| p.ttl).max(), Some(5));
}

#[test]
fn test_trace_continues_past_silent_hop() {
    let dst = Ipv4Addr::new(203, 0, 113, 70);
    let net = Network::v4(move |p| match p.ttl {
        2 => vec![],
        1 => vec![time_exceeded(router(1), v4(p), p.id, p.seq)],
        _ => vec![echo_reply(v4(p), p.id, p.seq)],
    });

    let config = TraceConfig { wait: Duration::from_millis(50), ..trace_config() };
    let hops = run_trace(&net, config, dst);

    assert_eq!(hops.len(), 3);
    assert_eq!(hops[1].err, Some(HopError::Timeout));
    assert_eq!(hops[1].ip, None);
    assert!(!hops[1].last);
    assert!(hops[2].last);
}

#[test]
fn test_trace_ignores_late_reply_from_previous_ttl() {
    let dst = Ipv4Addr::new(203, 0, 113, 80);
    // hop 1 answers only after hop 2 has been probed
    let net = Network::v4(move |p| match p.ttl {
        1 => vec![time_exceeded(router(1), v4(p), p.id, p.seq).after(80)],
        2 => vec![time_exceeded(router(2), v4(p), p.id, p.seq).after(20)],
        _ => vec![echo_reply(v4(p), p.id, p.seq)],
    });

    let config = TraceConfig { wait: Duration::from_millis(40), ..trace_config() };
    let hops = run_trace(&net, config, dst);

    assert_eq!(hops.len(), 3);
    assert_eq!(hops[0].err, Some(HopError::Timeout));
    assert_eq!(hops[1].ip, Some(IpAddr::V4(router(2))));
    assert!(hops[2].last);
}

#[test]
fn test_trace_ignores_late_unreachable_from_previous_ttl() {
    let dst = Ipv4Addr::new(203, 0, 113, 81);
    // hop 1 rejects the probe, but only once hop 2 is waiting
    let net = Network::v4(move |p| match p.ttl {
        1 => vec![unreachable(router(1), v4(p), 13, p.id, p.seq).after(60)],
        _ => vec![],
    });

    let config = TraceConfig { max_ttl: 3, wait: Duration::from_millis(40), ..trace_config() };
    let hops = run_trace(&net, config, dst);

    assert_eq!(hops.len(), 3);
    assert!(hops.iter().all(|h| h.err == Some(HopError::Timeout) && h.ip.is_none()));
    assert_eq!(net.sent().iter().map(|p| p.ttl).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[test]
fn test_trace_max_ttl_exhausted() {
    let net = Network::v4(|_| vec![]);
    let config = TraceConfig { max_ttl: 3, wait: Duration::from_millis(30), ..trace_config() };

    let hops = run_trace(&net, config, Ipv4Addr::new(203, 0, 113, 90));

    assert_eq!(hops.len(), 3);
    assert!(hops.iter().all(|h| h.err == Some(HopError::Timeout) && !h.last));
}

#[test]
fn test_trace_first_ttl_and_queries() {
    let dst = Ipv4Addr::new(203, 0, 113, 91);
    // the first probe of every hop is lost
    let net = Network::v4(move |p| {
        if p.seq % 2 == 0 {
            vec![]
        } else if p.ttl < 4 {
            vec![time_exceeded(router(p.ttl), v4(p), p.id, p.seq)]
        } else {
            vec![echo_reply(v4(p), p.id, p.seq)]
        }
    });

    let config = TraceConfig { first_ttl: 3, queries: 2, wait: Duration::from_millis(30), ..trace_config() };
    let hops = run_trace(&net, config, dst);

    assert_eq!(hops.iter().map(|h| h.num).collect::<Vec<_>>(), vec![3, 4]);
    assert_eq!(hops[0].ip, Some(IpAddr::V4(router(3))));
    assert!(hops[1].last);
    assert_eq!(net.sent().len(), 4);
}

#[test]
fn test_trace_resolves_and_looks_up_each_address_once() {
    let dst = Ipv4Addr::new(203, 0, 113, 100);
    // hops 2 and 3 answer from the same router
    let net = Network::v4(move |p| match p.ttl {
        1 => vec![time_exceeded(router(1), v4(p), p.id, p.seq)],
        2 | 3 => vec![time_exceeded(router(2), v4(p), p.id, p.seq)],
        _ => vec![echo_reply(v4(p), p.id, p.seq)],
    });

    let listener = PacketListener::start(net.clone());
    let names = Names(HashMap::from([(IpAddr::V4(router(1)), "gw.example.net".to_string())]));
    let whois = CountingWhois::default();
    let reporter = Collector::default();
    let config = TraceConfig { resolve: true, ripe: true, real_time: true, ..trace_config() };

    let mut tracer = Tracer::new(config, StdRng::seed_from_u64(2), &names, &whois);
    let hops = tracer.run(&listener, &target(dst), &CancelToken::new(), &reporter).unwrap();

    assert_eq!(hops.len(), 4);
    assert_eq!(hops[0].hop, "gw.example.net");
    assert_eq!(hops[1].hop, router(2).to_string());
    assert_eq!(hops[1].whois, Some(Whois { holder: "TRANSIT".to_string(), asn: 64500 }));
    assert_eq!(hops[3].whois, None);
    // router 1, router 2 and the destination
    assert_eq!(whois.calls.load(Ordering::SeqCst), 3);
    assert_eq!(*reporter.hops.lock().unwrap(), hops);
}

#[test]
fn test_trace_v6_hop_addresses_come_from_the_socket() {
    let dst: Ipv6Addr = "2001:db8:ff::50".parse().unwrap();
    let net = Network::new(IpFamily::V6, move |p| {
        if p.ttl < 3 {
            vec![time_exceeded_v6(router_v6(p.ttl), v6(p), p.id, p.seq)]
        } else {
            vec![echo_reply_v6(v6(p), p.id, p.seq)]
        }
    });

    let hops = run_trace(&net, trace_config(), dst);

    assert_eq!(hops.len(), 3);
    assert_eq!(hops[0].ip, Some(IpAddr::V6(router_v6(1))));
    assert_eq!(hops[1].ip, Some(IpAddr::V6(router_v6(2))));
    assert_eq!(hops[1].hop, router_v6(2).to_string());
    assert!(!hops[1].last);
    assert_eq!(hops[2].ip, Some(IpAddr::V6(dst)));
    assert!(hops[2].last);

    let sent = net.sent();
    assert!(sent.iter().all(|p| p.typ == 128 && p.id == 0x5150));
    assert_eq!(sent.iter().map(|p| p.ttl).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[test]
fn test_trace_v6_unreachable() {
    let dst: Ipv6Addr = "2001:db8:ff::60".parse().unwrap();
    let net = Network::new(IpFamily::V6, move |p| match p.ttl {
        1 => vec![time_exceeded_v6(router_v6(1), v6(p), p.id, p.seq)],
        // noise for an earlier probe arrives first
        _ => vec![
            unreachable_v6(router_v6(9), v6(p), 3, p.id, p.seq.wrapping_sub(1)),
            unreachable_v6(router_v6(2), v6(p), 4, p.id, p.seq).after(5),
        ],
    });

    let hops = run_trace(&net, trace_config(), dst);

    assert_eq!(hops.len(), 2);
    assert_eq!(hops[1].ip, Some(IpAddr::V6(router_v6(2))));
    assert_eq!(hops[1].err, Some(HopError::Unreachable { code: 4 }));
    assert!(!hops[1].last);
}

#[test]
fn test_trace_rejects_other_family() {
    let net = Network::new(IpFamily::V6, |_| vec![]);
    let listener = PacketListener::start(net.clone());
    let resolver = Names(HashMap::new());
    let mut tracer = Tracer::new(trace_config(), StdRng::seed_from_u64(5), &resolver, &NoWhois);

    let err = tracer
        .run(&listener, &target(Ipv4Addr::new(203, 0, 113, 1)), &CancelToken::new(), &NullReporter)
        .unwrap_err();
    assert!(matches!(err, ProbeError::FamilyMismatch { socket: IpFamily::V6, .. }));
    assert!(net.sent().is_empty());
}

fn ping_config() -> PingConfig {
    PingConfig {
        id: 500,
        count: 4,
        interval: Duration::from_millis(10),
        timeout: Duration::from_millis(100),
        ..PingConfig::default()
    }
}

fn run_ping(net: &Arc<Network>, config: PingConfig, targets: &[Target], reporter: &dyn Reporter) -> Vec<(Target, Stats)> {
    let mut listeners = Listeners::new();
    listeners.insert(PacketListener::start(net.clone()));
    let mut pinger = Pinger::new(config, StdRng::seed_from_u64(3));
    pinger.run(&listeners, targets, &CancelToken::new(), reporter).unwrap()
}

#[test]
fn test_ping_silent_target() {
    let net = Network::v4(|_| vec![]);
    let reporter = Collector::default();
    let dst = target(Ipv4Addr::new(198, 51, 100, 1));

    let results = run_ping(&net, ping_config(), &[dst.clone()], &reporter);

    let (_, stats) = &results[0];
    assert_eq!(stats.sent, 4);
    assert_eq!(stats.lost, 4);
    assert_eq!(stats.packet_loss(), 100.0);

    let pings = reporter.pings.lock().unwrap();
    assert_eq!(pings.len(), 4);
    assert!(pings.iter().all(|p| p.outcome == PingOutcome::Timeout));
    assert_eq!(pings.iter().map(|p| p.seq).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    assert_eq!(reporter.summaries.lock().unwrap()[0], (dst, stats.clone()));
}

#[test]
fn test_ping_replies() {
    let net = Network::v4(|p| vec![echo_reply(v4(p), p.id, p.seq).after(5)]);
    let reporter = Collector::default();

    let results = run_ping(&net, ping_config(), &[target(Ipv4Addr::new(198, 51, 100, 2))], &reporter);

    let (_, stats) = &results[0];
    assert_eq!(stats.sent, 4);
    assert_eq!(stats.lost, 0);
    assert!(stats.min >= 5.0 && stats.min <= stats.avg && stats.avg <= stats.max);
    assert!(net.sent().iter().all(|p| p.ttl == 64 && p.id == 500 && p.typ == 8));
}

#[test]
fn test_ping_v6_replies() {
    let dst: Ipv6Addr = "2001:db8:ff::1".parse().unwrap();
    // our own request echoed back on the socket comes first and must not count
    let net = Network::new(IpFamily::V6, |p| {
        let mut request = icmp_header(128, 0, p.id, p.seq);
        request.extend([0u8; 16]);
        vec![Answer::new(request, v6(p)), echo_reply_v6(v6(p), p.id, p.seq).after(5)]
    });
    let reporter = Collector::default();

    let results = run_ping(&net, PingConfig { count: 3, ..ping_config() }, &[target(dst)], &reporter);

    assert_eq!((results[0].1.sent, results[0].1.lost), (3, 0));
    assert!(results[0].1.min >= 5.0);
    let pings = reporter.pings.lock().unwrap();
    for ping in pings.iter() {
        match ping.outcome {
            PingOutcome::Reply { from, .. } => assert_eq!(from, IpAddr::V6(dst)),
            ref other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert!(net.sent().iter().all(|p| p.typ == 128));
}

#[test]
fn test_ping_max_rtt_counts_as_loss() {
    let net = Network::v4(|p| vec![echo_reply(v4(p), p.id, p.seq).after(60)]);
    let reporter = Collector::default();
    let config = PingConfig {
        count: 2,
        timeout: Duration::from_millis(300),
        max_rtt: Some(Duration::from_millis(20)),
        ..ping_config()
    };

    let results = run_ping(&net, config, &[target(Ipv4Addr::new(198, 51, 100, 3))], &reporter);

    assert_eq!(results[0].1.lost, 2);
    let pings = reporter.pings.lock().unwrap();
    assert!(pings.iter().all(|p| matches!(p.outcome, PingOutcome::TooSlow { .. })));
}

#[test]
fn test_ping_streams_are_isolated() {
    let a = Ipv4Addr::new(198, 51, 100, 10);
    let b = Ipv4Addr::new(198, 51, 100, 11);
    // only `a` answers; every answer is preceded by noise from another process
    let net = Network::v4(move |p| {
        if v4(p) != a {
            return vec![];
        }
        vec![echo_reply(a, p.id, p.seq).after(2), echo_reply(a, 0x7777, p.seq).after(1)]
    });
    let reporter = Collector::default();

    let results = run_ping(&net, ping_config(), &[target(a), target(b)], &reporter);

    assert_eq!(results[0].0.ip, IpAddr::V4(a));
    assert_eq!((results[0].1.sent, results[0].1.lost), (4, 0));
    assert_eq!(results[1].0.ip, IpAddr::V4(b));
    assert_eq!((results[1].1.sent, results[1].1.lost), (4, 4));

    let sent = net.sent();
    assert!(sent.iter().filter(|p| p.dst == IpAddr::V4(a)).all(|p| p.id == 500));
    assert!(sent.iter().filter(|p| p.dst == IpAddr::V4(b)).all(|p| p.id == 501));
}

/// Fails while reporting results for one target.
struct FailingReporter {
    fail_for: IpAddr,
}

impl Reporter for FailingReporter {
    fn ping_result(&self, result: &PingResult) {
        if result.target.ip == self.fail_for {
            panic!("reporter failed for {}", result.target.ip);
        }
    }
}

#[test]
fn test_ping_survives_a_panicking_stream() {
    let a = Ipv4Addr::new(198, 51, 100, 20);
    let b = Ipv4Addr::new(198, 51, 100, 21);
    let net = Network::v4(|p| vec![echo_reply(v4(p), p.id, p.seq)]);
    let reporter = FailingReporter { fail_for: IpAddr::V4(a) };

    let results = run_ping(&net, PingConfig { count: 2, ..ping_config() }, &[target(a), target(b)], &reporter);

    assert_eq!(results[0].1, Stats::default());
    assert_eq!((results[1].1.sent, results[1].1.lost), (2, 0));
}

#[test]
fn test_ping_cancelled_before_start() {
    let net = Network::v4(|_| vec![]);
    let mut listeners = Listeners::new();
    listeners.insert(PacketListener::start(net.clone()));
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut pinger = Pinger::new(ping_config(), StdRng::seed_from_u64(4));
    let results = pinger.run(&listeners, &[target(Ipv4Addr::new(198, 51, 100, 4))], &cancel, &NullReporter).unwrap();

    assert_eq!(results[0].1.sent, 0);
    assert!(net.sent().is_empty());
}

#[test]
fn test_duplicate_id_is_rejected() {
    let net = Network::v4(|_| vec![]);
    let listener = PacketListener::start(net.clone());
    let dst = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 5));

    let _held = listener.subscribe(42, dst).unwrap();
    let err = listener.subscribe(42, dst).err().unwrap();
    assert!(matches!(err, ProbeError::IdInUse(42)));
    assert!(err.is_session_fatal());
}
