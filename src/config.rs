use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Service configuration, assembled by the binary and threaded through the
/// composition root. No module reads configuration globally.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the REST/WebSocket server listens on.
    pub listen_addr: SocketAddr,
    /// Root directory for persisted state (`timelapse-reports/` lives here).
    pub data_dir: PathBuf,
    /// Network the host's access-point interface serves. Clients connecting
    /// from this network outrank `wlan` clients for time-sync trust.
    pub ap_network: Ipv4Network,
    /// Period between active SSDP searches.
    pub ssdp_search_interval: Duration,
    /// Period between camera connection probes.
    pub monitor_interval: Duration,
    /// Period between `status_update` broadcasts.
    pub status_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000),
            data_dir: PathBuf::from("data"),
            ap_network: Ipv4Network {
                addr: Ipv4Addr::new(192, 168, 4, 0),
                prefix: 24,
            },
            ssdp_search_interval: Duration::from_secs(60),
            monitor_interval: Duration::from_secs(10),
            status_interval: Duration::from_secs(10),
        }
    }
}

/// An IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Network {
    pub addr: Ipv4Addr,
    pub prefix: u8,
}

impl Ipv4Network {
    pub fn contains(self, ip: IpAddr) -> bool {
        let IpAddr::V4(ip) = ip else { return false };
        let mask = if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        };
        u32::from(ip) & mask == u32::from(self.addr) & mask
    }
}

impl std::str::FromStr for Ipv4Network {
    type Err = eyre::Error;

    fn from_str(s: &str) -> eyre::Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| eyre::eyre!("expected CIDR notation (a.b.c.d/n), got {s:?}"))?;
        let prefix = prefix.parse::<u8>()?;
        eyre::ensure!(prefix <= 32, "prefix length {prefix} out of range");
        Ok(Self {
            addr: addr.parse()?,
            prefix,
        })
    }
}

impl std::fmt::Display for Ipv4Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}
