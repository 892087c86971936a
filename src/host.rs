//! Host environment discovery
//!
//! Supplies the facts used to fill in launch parameters the operator left
//! out: CPU parallelism for the thread count, and the address/platform
//! fingerprint for the display name.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Source of host facts consumed by parameter validation
#[cfg_attr(test, mockall::automock)]
pub trait HostEnvironment: Send + Sync {
    /// Number of hardware threads available to this process (at least 1)
    fn available_parallelism(&self) -> usize;

    /// Operating system name (e.g. "linux")
    fn platform(&self) -> String;

    /// CPU architecture (e.g. "x86_64")
    fn arch(&self) -> String;

    /// Kernel / OS release string
    fn release(&self) -> String;

    /// Local network address of this host
    fn local_address(&self) -> IpAddr;
}

/// Display name fingerprint: address, platform, arch and release joined by spaces
pub fn fingerprint<H: HostEnvironment + ?Sized>(host: &H) -> String {
    [
        host.local_address().to_string(),
        host.platform(),
        host.arch(),
        host.release(),
    ]
    .join(" ")
}

/// The real host this process runs on
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

impl HostEnvironment for SystemHost {
    fn available_parallelism(&self) -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    fn platform(&self) -> String {
        std::env::consts::OS.to_string()
    }

    fn arch(&self) -> String {
        std::env::consts::ARCH.to_string()
    }

    fn release(&self) -> String {
        sysinfo::System::kernel_version().unwrap_or_else(|| "unknown".to_string())
    }

    fn local_address(&self) -> IpAddr {
        outbound_ipv4().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

/// Address the routing table would use for outbound traffic.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
fn outbound_ipv4() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    let addr = socket.local_addr().ok()?.ip();
    (!addr.is_unspecified()).then_some(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_joins_with_single_spaces() {
        let mut host = MockHostEnvironment::new();
        host.expect_local_address()
            .returning(|| IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));
        host.expect_platform().returning(|| "linux".to_string());
        host.expect_arch().returning(|| "x86_64".to_string());
        host.expect_release().returning(|| "6.1.0".to_string());

        assert_eq!(fingerprint(&host), "192.168.1.20 linux x86_64 6.1.0");
    }

    #[test]
    fn test_system_host_reports_at_least_one_thread() {
        let host = SystemHost;
        assert!(host.available_parallelism() >= 1);
        assert!(!host.platform().is_empty());
        assert!(!host.arch().is_empty());
        assert!(!host.release().is_empty());
    }
}
