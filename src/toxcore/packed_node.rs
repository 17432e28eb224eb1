/*! Packed node format for cached TCP/UDP relays.

The messenger remembers the relays the transport was connected to when the
state was saved and re-injects them on the first `tick` after a load.
*/

use std::net::{
    IpAddr,
    Ipv4Addr,
    Ipv6Addr,
};
use nom::{be_u16, le_u8};

use toxcore::binary_io::*;
use toxcore::crypto_core::*;

/// Protocol the node is reachable over.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProtocolType {
    /// UDP.
    UDP,
    /// TCP.
    TCP,
}

/// Address of a node with its protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IpPort {
    /// Type of protocol
    pub protocol: ProtocolType,
    /// IP address
    pub ip_addr: IpAddr,
    /// Port number
    pub port: u16,
}

impl FromBytes for IpPort {
    named!(from_bytes<IpPort>, alt!(call!(IpPort::from_udp_bytes) | call!(IpPort::from_tcp_bytes)));
}

impl ToBytes for IpPort {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(self.ip_type()) >>
            gen_call!(|buf, ip_addr| IpPort::ip_addr_to_bytes(ip_addr, buf), &self.ip_addr) >>
            gen_be_u16!(self.port)
        )
    }
}

impl IpPort {
    /** Get IP Type byte.

    * 1st bit - protocol
    * 4th bit - address family

    Value | Type
    ----- | ----
    `2`   | UDP IPv4
    `10`  | UDP IPv6
    `130` | TCP IPv4
    `138` | TCP IPv6

    */
    fn ip_type(&self) -> u8 {
        if self.ip_addr.is_ipv4() {
            match self.protocol {
                ProtocolType::UDP => 2,
                ProtocolType::TCP => 130,
            }
        } else {
            match self.protocol {
                ProtocolType::UDP => 10,
                ProtocolType::TCP => 138,
            }
        }
    }

    named!(from_udp_bytes<IpPort>, do_parse!(
        ip_addr: switch!(le_u8,
            2 => map!(IpPort::ipv4_from_bytes, IpAddr::V4) |
            10 => map!(IpPort::ipv6_from_bytes, IpAddr::V6)
        ) >>
        port: be_u16 >>
        (IpPort { protocol: ProtocolType::UDP, ip_addr, port })
    ));

    named!(from_tcp_bytes<IpPort>, do_parse!(
        ip_addr: switch!(le_u8,
            130 => map!(IpPort::ipv4_from_bytes, IpAddr::V4) |
            138 => map!(IpPort::ipv6_from_bytes, IpAddr::V6)
        ) >>
        port: be_u16 >>
        (IpPort { protocol: ProtocolType::TCP, ip_addr, port })
    ));

    named!(ipv4_from_bytes<Ipv4Addr>, map!(take!(4),
        |b: &[u8]| Ipv4Addr::new(b[0], b[1], b[2], b[3])
    ));

    named!(ipv6_from_bytes<Ipv6Addr>, map!(count_fixed!(u8, le_u8, 16),
        |b: [u8; 16]| Ipv6Addr::from(b)
    ));

    fn ip_addr_to_bytes<'a>(ip_addr: &IpAddr, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        match *ip_addr {
            IpAddr::V4(ref addr) => do_gen!(buf,
                gen_slice!(addr.octets())
            ),
            IpAddr::V6(ref addr) => do_gen!(buf,
                gen_slice!(addr.octets())
            ),
        }
    }
}

/** A node that can be reached over both TCP and UDP.

Used for the cached relay list in the saved state.
*/
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TcpUdpPackedNode {
    /// Address of the node.
    pub ip_port: IpPort,
    /// `PublicKey` of the node.
    pub pk: PublicKey,
}

impl TcpUdpPackedNode {
    /// Number of bytes the node occupies in serialized form.
    pub fn packed_size(&self) -> usize {
        let ip_len = if self.ip_port.ip_addr.is_ipv4() { 4 } else { 16 };
        1 + ip_len + 2 + PUBLICKEYBYTES
    }
}

impl FromBytes for TcpUdpPackedNode {
    named!(from_bytes<TcpUdpPackedNode>, do_parse!(
        ip_port: call!(IpPort::from_bytes) >>
        pk: call!(PublicKey::from_bytes) >>
        (TcpUdpPackedNode {
            ip_port,
            pk,
        })
    ));
}

impl ToBytes for TcpUdpPackedNode {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_call!(|buf, data| IpPort::to_bytes(data, buf), &self.ip_port) >>
            gen_slice!(self.pk.as_ref())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    encode_decode_test!(
        ip_port_udp_ipv4_encode_decode,
        IpPort {
            protocol: ProtocolType::UDP,
            ip_addr: "1.2.3.4".parse().unwrap(),
            port: 1234,
        }
    );

    encode_decode_test!(
        ip_port_tcp_ipv6_encode_decode,
        IpPort {
            protocol: ProtocolType::TCP,
            ip_addr: "::1".parse().unwrap(),
            port: 4321,
        }
    );

    encode_decode_test!(
        tcp_udp_packed_node_encode_decode,
        TcpUdpPackedNode {
            pk: gen_keypair().0,
            ip_port: IpPort {
                protocol: ProtocolType::TCP,
                ip_addr: "1.2.3.5".parse().unwrap(),
                port: 12345,
            },
        }
    );
}
