use crate::cancel::CancelToken;
use crate::config::TraceConfig;
use crate::dns_resolver::ReverseResolver;
use crate::error::{ProbeError, ProbeResult};
use crate::listener::{PacketListener, Subscription};
use crate::messages::{HopError, HopResp, IcmpResp, ResponseKind, Target, Whois, duration_ms};
use crate::packet::encode_echo_request;
use crate::report::Reporter;
use crate::whois_resolver::WhoisLookup;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// How a correlated reply ends a hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HopKind {
    Router,
    Destination,
    Unreachable(u8),
}

pub struct Tracer<'a> {
    config: TraceConfig,
    rng: StdRng,
    resolver: &'a dyn ReverseResolver,
    whois: &'a dyn WhoisLookup,
    whois_cache: HashMap<IpAddr, Option<Whois>>,
    seq: u16,
}

impl<'a> Tracer<'a> {
    pub fn new(
        config: TraceConfig,
        rng: StdRng,
        resolver: &'a dyn ReverseResolver,
        whois: &'a dyn WhoisLookup,
    ) -> Tracer<'a> {
        Tracer { config, rng, resolver, whois, whois_cache: HashMap::new(), seq: 0 }
    }

    /// Walks TTL from `first_ttl` to `max_ttl` and returns one hop per TTL, in order.
    ///
    /// The run stops early at the destination's echo reply or at a destination
    /// unreachable; silent hops are recorded as timeouts and the walk goes on.
    /// The listener's socket must not be shared with another trace while this runs.
    pub fn run(
        &mut self,
        listener: &PacketListener,
        target: &Target,
        cancel: &CancelToken,
        reporter: &dyn Reporter,
    ) -> ProbeResult<Vec<HopResp>> {
        self.config.validate()?;
        if listener.family() != target.family() {
            return Err(ProbeError::FamilyMismatch { socket: listener.family(), destination: target.ip });
        }
        if let Some(tos) = self.config.tos {
            listener.set_tos(tos)?;
        }
        let sub = listener.subscribe(self.config.id, target.ip)?;

        let mut hops = Vec::new();
        debug!(target = %target.ip, first = self.config.first_ttl, max = self.config.max_ttl, "trace started");
        for ttl in self.config.first_ttl..=self.config.max_ttl {
            if cancel.is_cancelled() {
                break;
            }
            let (hop, done) = self.probe_hop(listener, &sub, target, ttl, cancel);
            if self.config.real_time {
                reporter.hop(&hop);
            }
            hops.push(hop);
            if done {
                break;
            }
        }
        Ok(hops)
    }

    /// Sends up to `queries` probes with the given TTL; the first correlated reply decides the hop.
    fn probe_hop(
        &mut self,
        listener: &PacketListener,
        sub: &Subscription,
        target: &Target,
        ttl: u8,
        cancel: &CancelToken,
    ) -> (HopResp, bool) {
        for _ in 0..self.config.queries {
            if cancel.is_cancelled() {
                break;
            }
            let seq = self.seq;
            self.seq = self.seq.wrapping_add(1);

            let packet = match encode_echo_request(target.family(), sub.id(), seq, self.config.size, &mut self.rng) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!(ttl, error = %e, "unable to build probe");
                    continue;
                }
            };

            sub.drain();
            let sent = Instant::now();
            if let Err(e) = listener.send(&packet, target.ip, ttl) {
                warn!(ttl, error = %e, "send failed");
                continue;
            }

            let deadline = sent + self.config.wait;
            while let Some(reply) = sub.recv_until(deadline) {
                let Some(kind) = classify(&reply.resp, sub.id(), seq, target.ip) else {
                    trace!(ttl, typ = reply.resp.typ, seq = reply.resp.seq, "uncorrelated reply");
                    continue;
                };
                let from = reply.resp.src.unwrap_or(target.ip);
                let rtt = reply.received.saturating_duration_since(sent);
                debug!(ttl, %from, ?kind, "hop answered");
                return (self.hop(ttl, from, rtt, kind), kind != HopKind::Router);
            }
        }

        debug!(ttl, "hop timed out");
        (HopResp::timeout(ttl), false)
    }

    fn hop(&mut self, num: u8, addr: IpAddr, rtt: Duration, kind: HopKind) -> HopResp {
        let hop = if self.config.resolve {
            self.resolver.reverse(addr).unwrap_or_else(|| addr.to_string())
        } else {
            addr.to_string()
        };
        let whois = if self.config.ripe {
            let lookup = self.whois;
            self.whois_cache.entry(addr).or_insert_with(|| lookup.lookup(addr)).clone()
        } else {
            None
        };
        let err = match kind {
            HopKind::Unreachable(code) => Some(HopError::Unreachable { code }),
            HopKind::Router | HopKind::Destination => None,
        };
        HopResp {
            num,
            hop,
            ip: Some(addr),
            elapsed: duration_ms(rtt),
            last: kind == HopKind::Destination,
            err,
            whois,
        }
    }
}

fn classify(resp: &IcmpResp, id: u16, seq: u16, destination: IpAddr) -> Option<HopKind> {
    match resp.kind() {
        ResponseKind::EchoReply if resp.id == id && resp.seq == seq => Some(HopKind::Destination),
        ResponseKind::TimeExceeded if resp.id == id && resp.seq == seq => Some(HopKind::Router),
        ResponseKind::Unreachable => match resp.quoted {
            Some(quoted) if quoted.dst != destination => None,
            Some(quoted) if quoted.echo && (resp.id != id || resp.seq != seq) => None,
            _ => Some(HopKind::Unreachable(resp.code)),
        },
        _ => None,
    }
}
