use crate::config::MAX_PACKET_SIZE;
use crate::error::ProbeError;
use crate::messages::IpFamily;
use crate::parser::{ICMPV4_ECHO_REQUEST, ICMPV6_ECHO_REQUEST};
use pnet::packet::Packet;
use pnet::packet::icmp::echo_request::{EchoRequestPacket, MutableEchoRequestPacket};
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpType, checksum};
use rand::Rng;

/// Payload bytes for a probe of `size` bytes on the wire.
///
/// The IP and ICMP headers are taken out of `size`; a negative `size` asks for a
/// payload drawn uniformly from `[0, len)` instead of exactly `len`.
pub fn payload_len<R: Rng + ?Sized>(family: IpFamily, size: i32, rng: &mut R) -> usize {
    let len = (size.unsigned_abs() as usize).saturating_sub(family.header_overhead());
    if size >= 0 || len == 0 {
        return len;
    }
    rng.random_range(0..len)
}

/// Builds an ICMP (or ICMPv6) Echo Request message without the IP header.
///
/// ICMPv6 checksums are filled in by the kernel, so only the IPv4 message carries one.
pub fn encode_echo_request<R: Rng + ?Sized>(
    family: IpFamily,
    id: u16,
    seq: u16,
    size: i32,
    rng: &mut R,
) -> Result<Vec<u8>, ProbeError> {
    if size.unsigned_abs() > MAX_PACKET_SIZE {
        return Err(ProbeError::Encode(format!("{} bytes do not fit in an IP datagram", size.unsigned_abs())));
    }
    let payload = payload_len(family, size, rng);
    let mut buf = vec![0u8; EchoRequestPacket::minimum_packet_size() + payload];

    let mut echo = MutableEchoRequestPacket::new(&mut buf)
        .ok_or_else(|| ProbeError::Encode(format!("buffer of {} bytes is too small", payload)))?;
    let typ = match family {
        IpFamily::V4 => ICMPV4_ECHO_REQUEST,
        IpFamily::V6 => ICMPV6_ECHO_REQUEST,
    };
    echo.set_icmp_type(IcmpType::new(typ));
    echo.set_icmp_code(IcmpCode::new(0));
    echo.set_identifier(id);
    echo.set_sequence_number(seq);

    if family == IpFamily::V4 {
        let icmp = IcmpPacket::new(echo.packet())
            .ok_or_else(|| ProbeError::Encode("unable to view echo request as ICMP".to_string()))?;
        let sum = checksum(&icmp);
        echo.set_checksum(sum);
    }

    Ok(buf)
}
