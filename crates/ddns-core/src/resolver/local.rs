// # Local Interface Source
//
// Reads the address of the interface the kernel would route public traffic
// through. A UDP socket is "connected" toward a probe address, which only
// performs route selection; no packet leaves the host.
//
// Only globally routable addresses are accepted. Behind NAT this strategy
// fails and the resolver falls through to the remote detectors.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;

use crate::Error;
use crate::config::IpVersion;

const DEFAULT_PROBE_V4: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)), 53);
const DEFAULT_PROBE_V6: SocketAddr = SocketAddr::new(
    IpAddr::V6(Ipv6Addr::new(0x2606, 0x4700, 0x4700, 0, 0, 0, 0, 0x1111)),
    53,
);

/// Public address of the outbound interface
#[derive(Debug, Clone)]
pub struct LocalInterfaceSource {
    probe_v4: SocketAddr,
    probe_v6: SocketAddr,
}

impl Default for LocalInterfaceSource {
    fn default() -> Self {
        Self {
            probe_v4: DEFAULT_PROBE_V4,
            probe_v6: DEFAULT_PROBE_V6,
        }
    }
}

impl LocalInterfaceSource {
    /// Build with optional probe overrides (`ip` or `ip:port`)
    pub fn new(probe_v4: Option<&str>, probe_v6: Option<&str>) -> Result<Self, Error> {
        let mut source = Self::default();
        if let Some(probe) = probe_v4 {
            source.probe_v4 = parse_probe(probe)?;
            if !source.probe_v4.is_ipv4() {
                return Err(Error::config(format!("IPv4 probe is not IPv4: {probe}")));
            }
        }
        if let Some(probe) = probe_v6 {
            source.probe_v6 = parse_probe(probe)?;
            if !source.probe_v6.is_ipv6() {
                return Err(Error::config(format!("IPv6 probe is not IPv6: {probe}")));
            }
        }
        Ok(source)
    }

    /// Find a public address for `version`
    ///
    /// `Both` tries IPv4 first, then IPv6.
    pub async fn detect(&self, version: IpVersion) -> Result<IpAddr, Error> {
        match version {
            IpVersion::V4 => self.probe(self.probe_v4).await,
            IpVersion::V6 => self.probe(self.probe_v6).await,
            IpVersion::Both => match self.probe(self.probe_v4).await {
                Ok(ip) => Ok(ip),
                Err(e) => {
                    tracing::debug!("No public IPv4 on local interface: {}", e);
                    self.probe(self.probe_v6).await
                }
            },
        }
    }

    async fn probe(&self, target: SocketAddr) -> Result<IpAddr, Error> {
        let bind: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind).await?;
        socket.connect(target).await?;
        let ip = socket.local_addr()?.ip();

        if is_public_ip(&ip) {
            Ok(ip)
        } else {
            Err(Error::public_ip(format!(
                "local interface address {ip} is not publicly routable"
            )))
        }
    }
}

fn parse_probe(probe: &str) -> Result<SocketAddr, Error> {
    if let Ok(addr) = probe.parse::<SocketAddr>() {
        return Ok(addr);
    }
    probe
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|_| Error::config(format!("Invalid probe address: {probe}")))
}

/// Whether an address can be published as a host's public address
pub fn is_public_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => is_public_v6(v6),
    }
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b & 0xfe) == 18)
        // 240.0.0.0/4 reserved
        || a >= 240)
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
        // 2001:db8::/32 documentation
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
        || ip.to_ipv4_mapped().is_some())
}
