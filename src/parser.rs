use crate::error::DecodeError;
use crate::messages::{IcmpResp, IpFamily, QuotedHeader};
use pnet::packet::ipv4::Ipv4Packet;
use std::net::{IpAddr, Ipv6Addr};

pub const ICMPV4_ECHO_REPLY: u8 = 0;
pub const ICMPV4_DESTINATION_UNREACHABLE: u8 = 3;
pub const ICMPV4_ECHO_REQUEST: u8 = 8;
pub const ICMPV4_TIME_EXCEEDED: u8 = 11;

pub const ICMPV6_DESTINATION_UNREACHABLE: u8 = 1;
pub const ICMPV6_TIME_EXCEEDED: u8 = 3;
pub const ICMPV6_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_ECHO_REPLY: u8 = 129;

// IPv4 datagrams arrive with the 20 byte IP header in front of the ICMP message.
const V4_TYPE: usize = 20;
const V4_SRC: usize = 12;
const V4_ECHO_ID: usize = 24;
const V4_QUOTED_IP: usize = 28;
const V4_QUOTED_IP_END: usize = 48;
const V4_QUOTED_ECHO_ID: usize = 52;

// ICMPv6 datagrams arrive without the IP header.
const V6_ECHO_ID: usize = 4;
const V6_QUOTED_DST: usize = 32;
const V6_QUOTED_DST_END: usize = 48;
const V6_QUOTED_ECHO_ID: usize = 52;
/// Shorter Time Exceeded messages carry no usable quote.
const V6_TIME_EXCEEDED_MIN: usize = 44;

/// Decodes one datagram read from a raw ICMP socket of the given family.
///
/// Every fixed offset is length checked first; a datagram that is too short for the
/// fields its type implies is rejected with [`DecodeError::Truncated`]. The one
/// exception is a short ICMPv6 Time Exceeded, which decodes to type and code only.
pub fn decode_response(family: IpFamily, b: &[u8]) -> Result<IcmpResp, DecodeError> {
    match family {
        IpFamily::V4 => decode_v4(b),
        IpFamily::V6 => decode_v6(b),
    }
}

fn decode_v4(b: &[u8]) -> Result<IcmpResp, DecodeError> {
    if b.is_empty() {
        return Err(DecodeError::Empty);
    }
    require(b, V4_TYPE + 2, "ICMPv4 header")?;

    let mut resp = IcmpResp::new(IpFamily::V4, b[V4_TYPE], b[V4_TYPE + 1]);
    resp.src = Some(IpAddr::from(read_array::<4>(b, V4_SRC)));

    match resp.typ {
        ICMPV4_ECHO_REPLY => {
            require(b, V4_ECHO_ID + 4, "ICMPv4 echo reply")?;
            resp.id = read_u16(b, V4_ECHO_ID);
            resp.seq = read_u16(b, V4_ECHO_ID + 2);
        }
        ICMPV4_DESTINATION_UNREACHABLE => {
            require(b, V4_QUOTED_IP_END, "ICMPv4 destination unreachable")?;
            resp.quoted = quoted_v4(&b[V4_QUOTED_IP..V4_QUOTED_IP_END]);
            quoted_echo(&mut resp, b, V4_QUOTED_ECHO_ID);
        }
        ICMPV4_TIME_EXCEEDED => {
            require(b, V4_QUOTED_ECHO_ID + 4, "ICMPv4 time exceeded")?;
            resp.quoted = quoted_v4(&b[V4_QUOTED_IP..V4_QUOTED_IP_END]);
            quoted_echo(&mut resp, b, V4_QUOTED_ECHO_ID);
        }
        _ => {}
    }
    Ok(resp)
}

fn decode_v6(b: &[u8]) -> Result<IcmpResp, DecodeError> {
    if b.is_empty() {
        return Err(DecodeError::Empty);
    }
    require(b, 2, "ICMPv6 header")?;

    let mut resp = IcmpResp::new(IpFamily::V6, b[0], b[1]);

    if resp.typ == ICMPV6_TIME_EXCEEDED && b.len() < V6_TIME_EXCEEDED_MIN {
        return Ok(resp);
    }

    match resp.typ {
        ICMPV6_ECHO_REPLY => {
            require(b, V6_ECHO_ID + 4, "ICMPv6 echo reply")?;
            resp.id = read_u16(b, V6_ECHO_ID);
            resp.seq = read_u16(b, V6_ECHO_ID + 2);
        }
        ICMPV6_DESTINATION_UNREACHABLE => {
            require(b, V6_QUOTED_DST_END, "ICMPv6 destination unreachable")?;
            resp.quoted = Some(quoted_v6(b));
            quoted_echo(&mut resp, b, V6_QUOTED_ECHO_ID);
        }
        ICMPV6_TIME_EXCEEDED => {
            require(b, V6_QUOTED_ECHO_ID + 4, "ICMPv6 time exceeded")?;
            resp.quoted = Some(quoted_v6(b));
            quoted_echo(&mut resp, b, V6_QUOTED_ECHO_ID);
        }
        _ => {}
    }
    Ok(resp)
}

fn quoted_v4(header: &[u8]) -> Option<QuotedHeader> {
    let ip = Ipv4Packet::new(header)?;
    if ip.get_version() != 4 {
        return None;
    }
    Some(QuotedHeader { dst: IpAddr::V4(ip.get_destination()), ip_id: ip.get_identification(), echo: false })
}

fn quoted_v6(b: &[u8]) -> QuotedHeader {
    let dst = Ipv6Addr::from(read_array::<16>(b, V6_QUOTED_DST));
    QuotedHeader { dst: IpAddr::V6(dst), ip_id: 0, echo: false }
}

/// Copies id/seq out of the quoted echo header when the datagram still holds it.
fn quoted_echo(resp: &mut IcmpResp, b: &[u8], at: usize) {
    if b.len() < at + 4 {
        return;
    }
    resp.id = read_u16(b, at);
    resp.seq = read_u16(b, at + 2);
    if let Some(quoted) = resp.quoted.as_mut() {
        quoted.echo = true;
    }
}

fn require(b: &[u8], need: usize, kind: &'static str) -> Result<(), DecodeError> {
    if b.len() < need {
        return Err(DecodeError::Truncated { kind, len: b.len(), need });
    }
    Ok(())
}

// Callers check the length before reading.
fn read_u16(b: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([b[at], b[at + 1]])
}

fn read_array<const N: usize>(b: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&b[at..at + N]);
    out
}
