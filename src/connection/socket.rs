//! UDP socket pairs: RTP on an even port, RTCP on the next odd one.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use log::{debug, warn};
use rand::Rng;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::{Error, Result};

const PORT_RANGE_START: u16 = 15550;
const PORT_RANGE_END: u16 = 65534;

/// Two bound sockets on adjacent ports.
#[derive(Debug)]
pub struct PortPair {
    pub rtp: UdpSocket,
    pub rtcp: UdpSocket,
    pub rtp_port: u16,
}

impl PortPair {
    pub fn rtcp_port(&self) -> u16 {
        self.rtp_port + 1
    }
}

/// Binds a pair on the wildcard address, starting from a random even port.
pub fn make_port_pair() -> Result<PortPair> {
    bind_port_pair(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |_| Ok(()))
}

/// Binds a pair on `local_ip` and connects it to `remote_ip:remote_rtp_port`
/// and the port after it. `ip_tos_ecn` is applied as IP_TOS (or the IPv6
/// traffic class) when positive; a non-zero `network_handle` becomes the
/// socket mark on Linux.
pub fn make_rtp_socket_pair(
    local_ip: IpAddr,
    remote_ip: IpAddr,
    remote_rtp_port: u16,
    ip_tos_ecn: i32,
    network_handle: i64,
) -> Result<PortPair> {
    let remote_rtcp_port = remote_rtp_port
        .checked_add(1)
        .ok_or(Error::InvalidPort(remote_rtp_port))?;

    let pair = bind_port_pair(local_ip, |socket| {
        apply_tos(socket, local_ip, ip_tos_ecn);
        apply_network_mark(socket, network_handle);
        Ok(())
    })?;

    pair.rtp.connect(SocketAddr::new(remote_ip, remote_rtp_port))?;
    pair.rtcp.connect(SocketAddr::new(remote_ip, remote_rtcp_port))?;
    debug!(
        "RTP pair {}:{} -> {}:{}",
        local_ip, pair.rtp_port, remote_ip, remote_rtp_port
    );

    Ok(pair)
}

fn new_udp_socket(ip: IpAddr) -> Result<Socket> {
    let domain = match ip {
        IpAddr::V4(_) => Domain::IPV4,
        IpAddr::V6(_) => Domain::IPV6,
    };
    Ok(Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?)
}

fn bind_port_pair<F>(ip: IpAddr, configure: F) -> Result<PortPair>
where
    F: Fn(&Socket) -> Result<()>,
{
    let slots = (PORT_RANGE_END - PORT_RANGE_START) / 2;
    let start = rand::thread_rng().gen_range(0..slots);

    for i in 0..slots {
        let port = PORT_RANGE_START + ((start + i) % slots) * 2;

        let rtp = new_udp_socket(ip)?;
        configure(&rtp)?;
        if rtp.bind(&SockAddr::from(SocketAddr::new(ip, port))).is_err() {
            continue;
        }

        let rtcp = new_udp_socket(ip)?;
        configure(&rtcp)?;
        if rtcp
            .bind(&SockAddr::from(SocketAddr::new(ip, port + 1)))
            .is_err()
        {
            continue;
        }

        return Ok(PortPair {
            rtp: rtp.into(),
            rtcp: rtcp.into(),
            rtp_port: port,
        });
    }

    Err(Error::Other(format!("no free RTP/RTCP port pair on {ip}")))
}

/// ICMP errors surfaced on connected UDP sockets.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

fn apply_tos(socket: &Socket, ip: IpAddr, ip_tos_ecn: i32) {
    if ip_tos_ecn <= 0 {
        return;
    }
    let result = match ip {
        IpAddr::V4(_) => socket.set_tos(ip_tos_ecn as u32),
        IpAddr::V6(_) => socket.set_tclass_v6(ip_tos_ecn as u32),
    };
    if let Err(err) = result {
        warn!("failed to set TOS/ECN {ip_tos_ecn:#x}: {err}");
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn apply_network_mark(socket: &Socket, network_handle: i64) {
    if network_handle == 0 {
        return;
    }
    if let Err(err) = socket.set_mark(network_handle as u32) {
        warn!("failed to mark socket for network {network_handle}: {err}");
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn apply_network_mark(_socket: &Socket, network_handle: i64) {
    if network_handle != 0 {
        warn!("network binding is not supported on this platform");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_port_pair_is_even_and_adjacent() -> Result<()> {
        let pair = make_port_pair()?;
        assert_eq!(pair.rtp_port % 2, 0);
        assert_eq!(pair.rtp.local_addr()?.port(), pair.rtp_port);
        assert_eq!(pair.rtcp.local_addr()?.port(), pair.rtcp_port());
        Ok(())
    }

    #[test]
    fn test_rtp_socket_pair_connects_both_ports() -> Result<()> {
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let pair = make_rtp_socket_pair(localhost, localhost, 40000, 0xB8, 0)?;
        assert_eq!(pair.rtp.peer_addr()?, SocketAddr::new(localhost, 40000));
        assert_eq!(pair.rtcp.peer_addr()?, SocketAddr::new(localhost, 40001));
        Ok(())
    }

    #[test]
    fn test_rtp_socket_pair_rejects_last_port() {
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert!(matches!(
            make_rtp_socket_pair(localhost, localhost, u16::MAX, 0, 0),
            Err(Error::InvalidPort(u16::MAX))
        ));
    }
}
