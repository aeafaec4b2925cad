use crate::cancel::CancelToken;
use crate::config::PingConfig;
use crate::error::ProbeResult;
use crate::listener::{Listeners, PacketListener, Subscription};
use crate::messages::{PingOutcome, PingResult, ResponseKind, Target};
use crate::packet::encode_echo_request;
use crate::report::Reporter;
use crate::stats::{Sample, Stats};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::any::Any;
use std::thread;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Drives echo request/reply exchanges against one or more targets.
pub struct Pinger {
    config: PingConfig,
    rng: StdRng,
}

struct Stream<'a> {
    target: &'a Target,
    listener: &'a PacketListener,
    sub: Subscription,
    rng: StdRng,
}

impl Pinger {
    pub fn new(config: PingConfig, rng: StdRng) -> Pinger {
        Pinger { config, rng }
    }

    /// Pings every target on its own thread and returns the final stats in target order.
    ///
    /// All ids are claimed before the first probe is sent, so a setup error aborts
    /// the whole session. Per-probe failures only show up as losses.
    pub fn run(
        &mut self,
        listeners: &Listeners,
        targets: &[Target],
        cancel: &CancelToken,
        reporter: &dyn Reporter,
    ) -> ProbeResult<Vec<(Target, Stats)>> {
        self.config.validate()?;

        let mut streams = Vec::with_capacity(targets.len());
        for (index, target) in targets.iter().enumerate() {
            let listener = listeners.get(target.family())?;
            let id = self.config.id.wrapping_add(index as u16);
            let sub = listener.subscribe(id, target.ip)?;
            let rng = StdRng::seed_from_u64(self.rng.next_u64());
            streams.push(Stream { target, listener, sub, rng });
        }
        if let Some(tos) = self.config.tos {
            for target in targets {
                listeners.get(target.family())?.set_tos(tos)?;
            }
        }

        let config = &self.config;
        let results = thread::scope(|scope| {
            let handles: Vec<_> = streams
                .into_iter()
                .map(|stream| (stream.target.ip, scope.spawn(move || ping_target(config, stream, cancel, reporter))))
                .collect();
            handles
                .into_iter()
                .map(|(ip, h)| {
                    h.join().unwrap_or_else(|panic| {
                        warn!(target = %ip, reason = panic_message(&*panic), "ping stream panicked");
                        Stats::default()
                    })
                })
                .collect::<Vec<Stats>>()
        });

        Ok(targets.iter().cloned().zip(results).collect())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown")
}

fn ping_target(config: &PingConfig, mut stream: Stream<'_>, cancel: &CancelToken, reporter: &dyn Reporter) -> Stats {
    let mut stats = Stats::default();
    let mut seq: u16 = 0;
    let mut sent: u32 = 0;

    debug!(target = %stream.target.ip, id = stream.sub.id(), count = config.count, "ping started");
    while config.count == 0 || sent < config.count {
        if cancel.is_cancelled() {
            break;
        }

        let (size, outcome) = echo(config, &mut stream, seq);
        match &outcome {
            PingOutcome::Reply { rtt, .. } => stats.record(Sample::Rtt(*rtt)),
            PingOutcome::TooSlow { .. } | PingOutcome::Timeout | PingOutcome::SendFailed(_) => {
                stats.record(Sample::Timeout)
            }
        }
        reporter.ping_result(&PingResult { target: stream.target.clone(), seq, size, outcome });

        sent += 1;
        seq = seq.wrapping_add(1);
        let last = config.count != 0 && sent >= config.count;
        if !last && !cancel.sleep(config.interval) {
            break;
        }
    }

    reporter.ping_summary(stream.target, &stats);
    stats
}

/// One send followed by a wait for the matching reply.
fn echo(config: &PingConfig, stream: &mut Stream<'_>, seq: u16) -> (usize, PingOutcome) {
    let target = stream.target;
    let id = stream.sub.id();

    let packet = match encode_echo_request(target.family(), id, seq, config.size, &mut stream.rng) {
        Ok(packet) => packet,
        Err(e) => return (0, PingOutcome::SendFailed(e.to_string())),
    };

    stream.sub.drain();
    let sent = Instant::now();
    if let Err(e) = stream.listener.send(&packet, target.ip, config.ttl) {
        warn!(target = %target.ip, seq, error = %e, "send failed");
        return (packet.len(), PingOutcome::SendFailed(e.to_string()));
    }

    let deadline = sent + config.timeout;
    while let Some(reply) = stream.sub.recv_until(deadline) {
        let resp = &reply.resp;
        if resp.kind() != ResponseKind::EchoReply || resp.id != id {
            continue;
        }
        if resp.seq != seq {
            trace!(expected = seq, got = resp.seq, "stale reply");
            continue;
        }

        let rtt = reply.received.saturating_duration_since(sent);
        let from = resp.src.unwrap_or(target.ip);
        if let Some(max_rtt) = config.max_rtt {
            if rtt > max_rtt {
                return (packet.len(), PingOutcome::TooSlow { from, rtt });
            }
        }
        return (packet.len(), PingOutcome::Reply { from, rtt });
    }

    (packet.len(), PingOutcome::Timeout)
}
