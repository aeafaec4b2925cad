use clap::{Args as ClapArgs, Parser, Subcommand};
use crossterm::style::Print;
use crossterm::{ExecutableCommand, terminal};
use hopscan::config::{DEFAULT_MAX_TTL, DEFAULT_PACKET_SIZE};
use hopscan::dns_resolver::{SystemResolver, resolve_target, resolve_targets};
use hopscan::messages::duration_ms;
use hopscan::socket::source_addr;
use hopscan::whois_resolver::{NoWhois, RipeWhois, WhoisLookup};
use hopscan::{
    CancelToken, HopResp, IpFamily, Listeners, PacketListener, PingConfig, PingOutcome, PingResult, Pinger,
    ProbeResult, Reporter, Stats, Target, TraceConfig, Tracer,
};
use pnet::datalink;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::io;
use std::net::IpAddr;
use std::process::ExitCode;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Log engine activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send ICMP echo requests to one or more hosts
    Ping(PingArgs),
    /// Discover the hops towards a host
    Trace(TraceArgs),
    /// List network interfaces and their addresses (for --source)
    Interfaces,
}

#[derive(ClapArgs, Debug)]
struct FamilyArgs {
    /// Use IPv4 only
    #[arg(short = '4', conflicts_with = "ipv6")]
    ipv4: bool,

    /// Use IPv6 only
    #[arg(short = '6')]
    ipv6: bool,

    /// Source address to send from
    #[arg(short = 'S', long)]
    source: Option<IpAddr>,

    /// Type of service byte (IPv4 only)
    #[arg(long)]
    tos: Option<u8>,
}

impl FamilyArgs {
    fn family(&self) -> Option<IpFamily> {
        match (self.ipv4, self.ipv6) {
            (true, _) => Some(IpFamily::V4),
            (_, true) => Some(IpFamily::V6),
            _ => None,
        }
    }
}

#[derive(ClapArgs, Debug)]
struct PingArgs {
    /// Hosts or IP addresses to ping
    #[arg(required = true)]
    targets: Vec<String>,

    /// Number of echo requests per host, 0 to run until interrupted
    #[arg(short, long, default_value_t = 4)]
    count: u32,

    /// Interval between requests in milliseconds
    #[arg(short, long, default_value_t = 1000)]
    interval: u64,

    /// Time to wait for each reply in milliseconds
    #[arg(short = 't', long, default_value_t = 2000)]
    timeout: u64,

    /// Replies slower than this many milliseconds count as lost
    #[arg(long)]
    max_rtt: Option<u64>,

    /// Packet size in bytes including headers; negative picks a random size below it
    #[arg(short, long, default_value_t = DEFAULT_PACKET_SIZE, allow_negative_numbers = true)]
    size: i32,

    /// Outgoing TTL / hop limit
    #[arg(long, default_value_t = 64)]
    ttl: u8,

    #[command(flatten)]
    net: FamilyArgs,
}

#[derive(ClapArgs, Debug)]
struct TraceArgs {
    /// Host or IP address to trace
    target: String,

    /// First TTL to probe
    #[arg(short, long, default_value_t = 1)]
    first_ttl: u8,

    /// Maximum number of hops
    #[arg(short, long, default_value_t = DEFAULT_MAX_TTL)]
    max_ttl: u8,

    /// Probes per hop
    #[arg(short, long, default_value_t = 1)]
    queries: u8,

    /// Time to wait for each hop in milliseconds
    #[arg(short, long, default_value_t = 2000)]
    wait: u64,

    /// Packet size in bytes including headers; negative picks a random size below it
    #[arg(short, long, default_value_t = DEFAULT_PACKET_SIZE, allow_negative_numbers = true)]
    size: i32,

    /// Do not resolve hop addresses to hostnames
    #[arg(short = 'n', long)]
    numeric: bool,

    /// Look up holder and ASN of each hop in the RIPE database
    #[arg(short, long)]
    ripe: bool,

    /// Print hops as they are discovered
    #[arg(long)]
    real_time: bool,

    /// Print the hop list as JSON
    #[arg(long, conflicts_with = "real_time")]
    json: bool,

    #[command(flatten)]
    net: FamilyArgs,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let cancel = CancelToken::new();
    let handler = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler.cancel()) {
        warn!(error = %e, "unable to install Ctrl-C handler");
    }

    let result = match args.command {
        Command::Ping(args) => ping(args, &cancel),
        Command::Trace(args) => trace(args, &cancel),
        Command::Interfaces => {
            list_interfaces();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("hopscan: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn ping(args: PingArgs, cancel: &CancelToken) -> ProbeResult<()> {
    let config = PingConfig {
        size: args.size,
        count: args.count,
        interval: Duration::from_millis(args.interval),
        timeout: Duration::from_millis(args.timeout),
        max_rtt: args.max_rtt.map(Duration::from_millis),
        ttl: args.ttl,
        tos: args.net.tos,
        family: args.net.family(),
        source: args.net.source,
        ..PingConfig::default()
    };
    config.validate()?;

    let targets = resolve_targets(&args.targets, config.family)?;
    let listeners = Listeners::open(targets.iter().map(Target::family), config.source)?;
    for target in &targets {
        let source = source_addr(config.source.filter(|s| IpFamily::of(s) == target.family()), target.ip)?;
        println!(
            "PING {} ({}) from {}: {} bytes",
            target.host,
            target.ip,
            source,
            config.size.unsigned_abs()
        );
    }

    let mut pinger = Pinger::new(config, StdRng::from_os_rng());
    pinger.run(&listeners, &targets, cancel, &Terminal)?;
    Ok(())
}

fn trace(args: TraceArgs, cancel: &CancelToken) -> ProbeResult<()> {
    let config = TraceConfig {
        size: args.size,
        first_ttl: args.first_ttl,
        max_ttl: args.max_ttl,
        queries: args.queries,
        wait: Duration::from_millis(args.wait),
        tos: args.net.tos,
        family: args.net.family(),
        source: args.net.source,
        resolve: !args.numeric,
        ripe: args.ripe,
        real_time: args.real_time,
        ..TraceConfig::default()
    };
    config.validate()?;

    let target = resolve_target(&args.target, config.family)?;
    let source = source_addr(config.source, target.ip)?;
    let listener = PacketListener::open(target.family(), config.source)?;
    let whois: Box<dyn WhoisLookup> = if config.ripe { Box::new(RipeWhois::new()?) } else { Box::new(NoWhois) };

    if !args.json {
        println!(
            "trace route to {} ({}) from {}, {} hops max",
            target.host, target.ip, source, config.max_ttl
        );
    }

    let real_time = config.real_time;
    let mut tracer = Tracer::new(config, StdRng::from_os_rng(), &SystemResolver, whois.as_ref());
    let hops = tracer.run(&listener, &target, cancel, &Terminal)?;

    if args.json {
        let json = serde_json::to_string_pretty(&hops).map_err(|e| hopscan::ProbeError::Encode(e.to_string()))?;
        println!("{}", json);
    } else if !real_time {
        for hop in &hops {
            println!("{}", format_hop(hop));
        }
    }
    Ok(())
}

struct Terminal;

impl Reporter for Terminal {
    fn ping_result(&self, result: &PingResult) {
        let PingResult { target, seq, size, outcome } = result;
        match outcome {
            PingOutcome::Reply { from, rtt } => println!(
                "{} bytes from {} ({}): icmp_seq={} time={:.3} ms",
                size,
                target.host,
                from,
                seq,
                duration_ms(*rtt)
            ),
            PingOutcome::TooSlow { from, rtt } => println!(
                "late reply from {} ({}): icmp_seq={} time={:.3} ms exceeds max RTT",
                target.host,
                from,
                seq,
                duration_ms(*rtt)
            ),
            PingOutcome::Timeout => println!("request timeout for {} icmp_seq={}", target.host, seq),
            PingOutcome::SendFailed(e) => println!("send to {} icmp_seq={} failed: {}", target.host, seq, e),
        }
    }

    fn ping_summary(&self, target: &Target, stats: &Stats) {
        println!("--- {} ping statistics ---", target.host);
        println!(
            "{} packets transmitted, {} received, {:.1}% packet loss",
            stats.sent,
            stats.received(),
            stats.packet_loss()
        );
        if stats.received() > 0 {
            println!("round-trip min/avg/max = {:.3}/{:.3}/{:.3} ms", stats.min, stats.avg, stats.max);
        }
    }

    fn hop(&self, hop: &HopResp) {
        let mut stdout = io::stdout();
        let _ = stdout.execute(terminal::Clear(terminal::ClearType::CurrentLine));
        let _ = stdout.execute(Print(format!("{}\n", format_hop(hop))));
    }
}

fn format_hop(hop: &HopResp) -> String {
    let Some(ip) = hop.ip else {
        let err = hop.err.map(|e| e.to_string()).unwrap_or_default();
        return format!("{:2}. {:39} {}", hop.num, hop.hop, err);
    };

    let mut line = if hop.hop == ip.to_string() {
        format!("{:2}. {:39} {:8.3} ms", hop.num, hop.hop, hop.elapsed)
    } else {
        format!("{:2}. {} ({}) {:8.3} ms", hop.num, hop.hop, ip, hop.elapsed)
    };
    if let Some(whois) = &hop.whois {
        line.push_str(&format!("  [{} AS{}]", whois.holder, whois.asn));
    }
    if let Some(err) = &hop.err {
        line.push_str(&format!("  {}", err));
    }
    line
}

fn list_interfaces() {
    let mut interfaces = datalink::interfaces();
    interfaces.sort_by_key(|k| k.index);
    interfaces.iter().for_each(|i| {
        let ips = i
            .ips
            .iter()
            .map(|ip| ip.ip())
            .filter(|ip| !ip.is_unspecified())
            .map(|ip| ip.to_string())
            .collect::<Vec<String>>();

        if !ips.is_empty() {
            println!("Index: {:2}, Name: {}, IP: {}", i.index, i.name, ips.join(", "));
        }
    });
}
