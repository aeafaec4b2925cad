use crate::error::{ProbeError, ProbeResult};
use crate::messages::Whois;
use std::net::IpAddr;
use tracing::debug;
use whois_rust::{WhoIs, WhoIsLookupOptions};

pub const RIPE_WHOIS: &str = "whois.ripe.net";

/// Holder and ASN for a hop address; `None` when unknown.
pub trait WhoisLookup: Send + Sync {
    fn lookup(&self, addr: IpAddr) -> Option<Whois>;
}

pub struct NoWhois;

impl WhoisLookup for NoWhois {
    fn lookup(&self, _addr: IpAddr) -> Option<Whois> {
        None
    }
}

pub struct RipeWhois {
    whois: WhoIs,
}

impl RipeWhois {
    pub fn new() -> ProbeResult<RipeWhois> {
        let whois = WhoIs::from_host(RIPE_WHOIS).map_err(|e| ProbeError::Unresolvable {
            host: RIPE_WHOIS.to_string(),
            reason: e.to_string(),
        })?;
        Ok(RipeWhois { whois })
    }
}

impl WhoisLookup for RipeWhois {
    fn lookup(&self, addr: IpAddr) -> Option<Whois> {
        let options = WhoIsLookupOptions::from_string(addr.to_string()).ok()?;
        match self.whois.lookup(options) {
            Ok(text) => extract_whois(&text),
            Err(e) => {
                debug!(%addr, error = %e, "whois lookup failed");
                None
            }
        }
    }
}

/// Pulls the holder (`descr`, falling back to `netname`) and the origin ASN out of a RIPE answer.
fn extract_whois(result: &str) -> Option<Whois> {
    let mut descr = None;
    let mut netname = None;
    let mut asn = None;

    for line in result.lines() {
        if line.starts_with('%') || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once(':') {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            if key.eq_ignore_ascii_case("descr") && descr.is_none() {
                descr = Some(value.to_string());
            } else if key.eq_ignore_ascii_case("netname") && netname.is_none() {
                netname = Some(value.to_string());
            } else if key.eq_ignore_ascii_case("origin") && asn.is_none() {
                let digits = value.trim_start_matches("AS").trim_start_matches("as");
                asn = digits.parse::<u32>().ok();
            }
        }
    }

    let holder = descr.or(netname);
    if holder.is_none() && asn.is_none() {
        return None;
    }
    Some(Whois { holder: holder.unwrap_or_default(), asn: asn.unwrap_or(0) })
}
