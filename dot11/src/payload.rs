//! IP and transport headers carried in 802.11 data frames

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// LLC/SNAP header preceding an EtherType in 802.11 data frames
const LLC_SNAP: [u8; 3] = [0xaa, 0xaa, 0x03];
const LLC_SNAP_LEN: usize = 8;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_IPV6: u16 = 0x86dd;

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// Network and transport addressing of an encapsulated IP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpSummary {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: u8,
    /// (source, destination) ports for TCP and UDP
    pub ports: Option<(u16, u16)>,
}

/// Extract IP addressing from the body of an unprotected data frame.
///
/// Returns `None` unless the body starts with an LLC/SNAP header whose
/// EtherType is IPv4 or IPv6 and the IP header is complete.
pub fn ip_summary(body: &[u8]) -> Option<IpSummary> {
    if body.len() < LLC_SNAP_LEN || body[..3] != LLC_SNAP {
        return None;
    }
    let ethertype = u16::from_be_bytes([body[6], body[7]]);
    let packet = &body[LLC_SNAP_LEN..];
    match ethertype {
        ETHERTYPE_IPV4 => ipv4(packet),
        ETHERTYPE_IPV6 => ipv6(packet),
        _ => None,
    }
}

fn ipv4(packet: &[u8]) -> Option<IpSummary> {
    if packet.len() < 20 || packet[0] >> 4 != 4 {
        return None;
    }
    let header_len = ((packet[0] & 0x0f) as usize) * 4;
    if header_len < 20 || packet.len() < header_len {
        return None;
    }
    let protocol = packet[9];
    let src = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let dst = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);

    // Only the first fragment carries the transport header
    let fragment_offset = u16::from_be_bytes([packet[6], packet[7]]) & 0x1fff;
    let ports = if fragment_offset == 0 {
        transport_ports(protocol, &packet[header_len..])
    } else {
        None
    };

    Some(IpSummary {
        src: IpAddr::V4(src),
        dst: IpAddr::V4(dst),
        protocol,
        ports,
    })
}

fn ipv6(packet: &[u8]) -> Option<IpSummary> {
    if packet.len() < 40 || packet[0] >> 4 != 6 {
        return None;
    }
    let protocol = packet[6];
    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&packet[8..24]);
    dst.copy_from_slice(&packet[24..40]);

    // Extension headers are not walked; ports are only read when the
    // transport header follows the fixed header directly.
    Some(IpSummary {
        src: IpAddr::V6(Ipv6Addr::from(src)),
        dst: IpAddr::V6(Ipv6Addr::from(dst)),
        protocol,
        ports: transport_ports(protocol, &packet[40..]),
    })
}

fn transport_ports(protocol: u8, segment: &[u8]) -> Option<(u16, u16)> {
    match protocol {
        IPPROTO_TCP | IPPROTO_UDP if segment.len() >= 4 => Some((
            u16::from_be_bytes([segment[0], segment[1]]),
            u16::from_be_bytes([segment[2], segment[3]]),
        )),
        _ => None,
    }
}
