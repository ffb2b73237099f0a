//! Five-tuple extraction from raw Ethernet frames.
//!
//! Recognizes Ethernet, one optional 802.1Q VLAN tag, IPv4, IPv6, TCP and
//! UDP. Decoding stops silently at the first unknown layer; whatever was
//! extracted up to that point stands. Frames with no recognized IP layer
//! all map to the zero key, which collapses them into a single
//! "unclassified" flow per worker. The installed BPF filter is expected to
//! keep that bucket small.

use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::vlan::VlanPacket;
use pnet::packet::Packet;

use crate::flow::FlowKey;

/// Extract the directional five-tuple from a raw Ethernet frame.
///
/// Never fails: unparseable or non-IP frames come back as the zero key.
/// The pnet packet views borrow the slice, so this allocates nothing.
pub fn flow_key(data: &[u8]) -> FlowKey {
    let mut key = FlowKey::default();

    let Some(ethernet) = EthernetPacket::new(data) else {
        return key;
    };

    let mut ethertype = ethernet.get_ethertype();
    let mut network = ethernet.payload();

    // At most one 802.1Q tag; a second tag is an unknown layer.
    let vlan;
    if ethertype == EtherTypes::Vlan {
        let Some(tagged) = VlanPacket::new(network) else {
            return key;
        };
        vlan = tagged;
        ethertype = vlan.get_ethertype();
        network = vlan.payload();
    }

    match ethertype {
        EtherTypes::Ipv4 => {
            if let Some(ipv4) = Ipv4Packet::new(network) {
                key.proto = ipv4.get_next_level_protocol().0;
                key.src = ipv4.get_source().into();
                key.dst = ipv4.get_destination().into();
                transport_ports(&mut key, ipv4.get_next_level_protocol(), ipv4.payload());
            }
        }
        EtherTypes::Ipv6 => {
            if let Some(ipv6) = Ipv6Packet::new(network) {
                key.proto = ipv6.get_next_header().0;
                key.src = ipv6.get_source().into();
                key.dst = ipv6.get_destination().into();
                transport_ports(&mut key, ipv6.get_next_header(), ipv6.payload());
            }
        }
        _ => {}
    }

    key
}

fn transport_ports(key: &mut FlowKey, proto: IpNextHeaderProtocol, transport: &[u8]) {
    match proto {
        IpNextHeaderProtocols::Tcp => {
            if let Some(tcp) = TcpPacket::new(transport) {
                key.src_port = tcp.get_source();
                key.dst_port = tcp.get_destination();
            }
        }
        IpNextHeaderProtocols::Udp => {
            if let Some(udp) = UdpPacket::new(transport) {
                key.src_port = udp.get_source();
                key.dst_port = udp.get_destination();
            }
        }
        _ => {}
    }
}
