//! Minimal IP header inspection used for routing tunneled packets

use std::net::Ipv4Addr;

/// Length of an IPv4 header without options
pub const IPV4_MIN_HEADER_LEN: usize = 20;

/// IP version nibble of a packet, `None` for an empty buffer
pub fn ip_version(packet: &[u8]) -> Option<u8> {
    packet.first().map(|b| b >> 4)
}

/// Destination address of an IPv4 packet
///
/// Returns `None` for anything that is not an IPv4 packet of at least
/// [`IPV4_MIN_HEADER_LEN`] bytes.
pub fn ipv4_destination(packet: &[u8]) -> Option<Ipv4Addr> {
    if packet.len() < IPV4_MIN_HEADER_LEN || ip_version(packet) != Some(4) {
        return None;
    }
    Some(Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(version_ihl: u8, dst: [u8; 4]) -> Vec<u8> {
        let mut pkt = vec![0u8; 20];
        pkt[0] = version_ihl;
        pkt[12..16].copy_from_slice(&[10, 0, 0, 2]);
        pkt[16..20].copy_from_slice(&dst);
        pkt
    }

    #[test]
    fn test_ipv4_destination() {
        let pkt = header(0x45, [10, 233, 233, 101]);
        assert_eq!(ipv4_destination(&pkt), Some(Ipv4Addr::new(10, 233, 233, 101)));
    }

    #[test]
    fn test_rejects_ipv6() {
        let mut pkt = vec![0u8; 40];
        pkt[0] = 0x60;
        assert_eq!(ip_version(&pkt), Some(6));
        assert_eq!(ipv4_destination(&pkt), None);
    }

    #[test]
    fn test_rejects_short_packets() {
        let pkt = header(0x45, [10, 233, 233, 100]);
        assert_eq!(ipv4_destination(&pkt[..19]), None);
        assert_eq!(ipv4_destination(&[]), None);
        assert_eq!(ip_version(&[]), None);
    }
}
