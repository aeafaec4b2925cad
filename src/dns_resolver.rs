use crate::error::{ProbeError, ProbeResult};
use crate::messages::{IpFamily, Target};
use std::net::IpAddr;
use tracing::debug;

/// Maps a hop address back to a hostname. Failures are never fatal.
pub trait ReverseResolver: Send + Sync {
    fn reverse(&self, addr: IpAddr) -> Option<String>;
}

/// Resolver backed by the system's name service.
pub struct SystemResolver;

impl ReverseResolver for SystemResolver {
    fn reverse(&self, addr: IpAddr) -> Option<String> {
        match dns_lookup::lookup_addr(&addr) {
            Ok(name) if !name.is_empty() && name != addr.to_string() => Some(name),
            Ok(_) => None,
            Err(e) => {
                debug!(%addr, error = %e, "reverse lookup failed");
                None
            }
        }
    }
}

/// Resolves `host` to a single address, honouring a forced family and
/// otherwise preferring IPv4.
pub fn resolve_target(host: &str, family: Option<IpFamily>) -> ProbeResult<Target> {
    let unresolvable = |reason: String| ProbeError::Unresolvable { host: host.to_string(), reason };
    if host.contains('/') {
        return Err(unresolvable("address blocks are not expanded".to_string()));
    }

    let addrs: Vec<IpAddr> = match host.parse::<IpAddr>() {
        Ok(ip) => vec![ip],
        Err(_) => dns_lookup::lookup_host(host).map_err(|e| unresolvable(e.to_string()))?,
    };
    let ip = pick_address(&addrs, family).ok_or_else(|| match family {
        Some(family) => unresolvable(format!("no {} address", family)),
        None => unresolvable("no address".to_string()),
    })?;
    debug!(host, %ip, "resolved target");
    Ok(Target::new(host, ip))
}

pub fn resolve_targets(hosts: &[String], family: Option<IpFamily>) -> ProbeResult<Vec<Target>> {
    hosts.iter().map(|host| resolve_target(host, family)).collect()
}

fn pick_address(addrs: &[IpAddr], family: Option<IpFamily>) -> Option<IpAddr> {
    let of = |f: IpFamily| addrs.iter().copied().find(|a| IpFamily::of(a) == f);
    match family {
        Some(f) => of(f),
        None => of(IpFamily::V4).or_else(|| of(IpFamily::V6)),
    }
}
