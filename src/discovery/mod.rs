//! SSDP discovery of CCAPI cameras on the local network.
//!
//! Cameras announce themselves with UPnP NOTIFY multicasts and answer
//! M-SEARCH queries for their camera-control service. This module owns the
//! raw socket plumbing and datagram parsing; the record store and primary
//! selection live in [`registry`].

pub mod registry;

use netdev::Interface;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

pub(crate) const SSDP_ADDR_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub(crate) const SSDP_PORT: u16 = 1900;
/// Service type the cameras advertise.
pub(crate) const CAMERA_SERVICE_ST: &str =
    "urn:schemas-canon-com:service:ICPO-CameraControlAPIService:1";
/// Port the camera control API listens on.
pub(crate) const CCAPI_PORT: u16 = 443;

pub(crate) fn get_active_interfaces() -> impl Iterator<Item = Interface> {
    netdev::get_interfaces()
        .into_iter()
        .filter(Interface::is_running)
}

/// Bind a UDP socket suitable for SSDP listen/search.
#[tracing::instrument(level = "trace")]
pub(crate) fn bind_ssdp_socket(addr: SocketAddr) -> eyre::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    // Async runtime needs the socket in non-blocking mode.
    socket.set_nonblocking(true)?;
    // Other UPnP daemons may share the SSDP port.
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Join the SSDP multicast group on every running IPv4 interface.
#[tracing::instrument(level = "debug", skip(socket))]
pub(crate) fn join_multicast_groups(socket: &UdpSocket) {
    for intf in get_active_interfaces() {
        for net in &intf.ipv4 {
            match socket.join_multicast_v4(SSDP_ADDR_V4, net.addr()) {
                Ok(()) => tracing::trace!(intf = intf.name, addr = %net.addr(), "joined SSDP group"),
                Err(err) => tracing::warn!(intf = intf.name, %err, "SSDP group join failed"),
            }
        }
    }
}

/// The M-SEARCH datagram soliciting camera responses.
pub(crate) fn msearch_message() -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {SSDP_ADDR_V4}:{SSDP_PORT}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: 3\r\n\
         ST: {CAMERA_SERVICE_ST}\r\n\
         \r\n"
    )
}

/// A parsed SSDP NOTIFY or M-SEARCH response relevant to us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SsdpAnnouncement {
    pub(crate) uuid: String,
    pub(crate) ip: IpAddr,
    pub(crate) port: u16,
    pub(crate) service: String,
    /// `ssdp:byebye`: the device is leaving the network.
    pub(crate) byebye: bool,
}

/// Parse an SSDP datagram from `src`, keeping only camera-service traffic.
pub(crate) fn parse_announcement(data: &[u8], src: SocketAddr) -> Option<SsdpAnnouncement> {
    let text = std::str::from_utf8(data).ok()?;
    let mut lines = text.split("\r\n");
    let start_line = lines.next()?;
    if !start_line.starts_with("NOTIFY") && !start_line.starts_with("HTTP/1.1 200") {
        return None;
    }

    let mut usn = None;
    let mut service = None;
    let mut byebye = false;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("usn") {
            usn = Some(value);
        } else if name.eq_ignore_ascii_case("st") || name.eq_ignore_ascii_case("nt") {
            service = Some(value);
        } else if name.eq_ignore_ascii_case("nts") {
            byebye = value.eq_ignore_ascii_case("ssdp:byebye");
        }
    }

    let service = service?;
    if !service.to_ascii_lowercase().contains("canon") {
        return None;
    }
    // USN is `uuid:<id>` or `uuid:<id>::<service>`.
    let usn = usn?;
    let uuid = usn
        .strip_prefix("uuid:")
        .unwrap_or(usn)
        .split("::")
        .next()?
        .to_owned();
    if uuid.is_empty() {
        return None;
    }

    Some(SsdpAnnouncement {
        uuid,
        ip: src.ip(),
        port: CCAPI_PORT,
        service: service.to_owned(),
        byebye,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src() -> SocketAddr {
        "192.168.1.50:1900".parse().expect("addr")
    }

    #[test]
    fn parses_notify_alive() {
        let packet = format!(
            "NOTIFY * HTTP/1.1\r\n\
             HOST: 239.255.255.250:1900\r\n\
             NT: {CAMERA_SERVICE_ST}\r\n\
             NTS: ssdp:alive\r\n\
             USN: uuid:00000000-dead-beef-0000-aabbccddeeff::{CAMERA_SERVICE_ST}\r\n\
             LOCATION: http://192.168.1.50:49152/upnp/CameraDevDesc.xml\r\n\
             \r\n"
        );
        let ann = parse_announcement(packet.as_bytes(), src()).expect("announcement");
        assert_eq!(ann.uuid, "00000000-dead-beef-0000-aabbccddeeff");
        assert_eq!(ann.ip, src().ip());
        assert_eq!(ann.port, CCAPI_PORT);
        assert!(!ann.byebye);
    }

    #[test]
    fn parses_byebye() {
        let packet = format!(
            "NOTIFY * HTTP/1.1\r\n\
             NT: {CAMERA_SERVICE_ST}\r\n\
             NTS: ssdp:byebye\r\n\
             USN: uuid:cam-1::{CAMERA_SERVICE_ST}\r\n\
             \r\n"
        );
        let ann = parse_announcement(packet.as_bytes(), src()).expect("announcement");
        assert!(ann.byebye);
    }

    #[test]
    fn ignores_foreign_services() {
        let packet = "NOTIFY * HTTP/1.1\r\n\
                      NT: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
                      USN: uuid:tv-1::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
                      \r\n";
        assert_eq!(parse_announcement(packet.as_bytes(), src()), None);
    }

    #[test]
    fn ignores_msearch_requests() {
        let packet = msearch_message();
        assert_eq!(parse_announcement(packet.as_bytes(), src()), None);
    }
}
