//! Source-address allow-list for inbound connections.

use std::net::IpAddr;

use ipnet::IpNet;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::settings::{resolve_addr, Partner, Settings};

/// Decides which remote addresses may connect.
///
/// Loopback addresses always match.
#[derive(Debug, Clone, Default)]
pub struct IpMatcher {
    nets: Vec<IpNet>,
}

impl IpMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the settings' CIDRs and every partner's addresses.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let mut matcher = Self::new();
        for cidr in &settings.allow_cidrs {
            matcher.allow_cidr(cidr)?;
        }
        for partner in settings.partners.values() {
            matcher.allow_partner(partner).await;
        }
        Ok(matcher)
    }

    /// Allow a network such as `10.0.0.0/8`.
    pub fn allow_cidr(&mut self, cidr: &str) -> Result<()> {
        let net = cidr
            .parse::<IpNet>()
            .map_err(|e| SyncError::Settings(format!("invalid CIDR {:?}: {}", cidr, e)))?;
        self.nets.push(net);
        Ok(())
    }

    /// Allow a single host.
    pub fn allow_ip(&mut self, ip: IpAddr) {
        self.nets.push(IpNet::from(ip));
    }

    /// Allow a partner's HTTP and recon hosts. Addresses that do not resolve
    /// are skipped.
    pub async fn allow_partner(&mut self, partner: &Partner) {
        let http_ip = match resolve_addr(&partner.http_addr).await {
            Ok(addr) => {
                self.allow_ip(addr.ip());
                Some(addr.ip())
            }
            Err(e) => {
                debug!(addr = %partner.http_addr, error = %e, "partner http address not allowed");
                None
            }
        };
        match resolve_addr(&partner.recon_addr).await {
            Ok(addr) if Some(addr.ip()) != http_ip => self.allow_ip(addr.ip()),
            Ok(_) => {}
            Err(e) => {
                debug!(addr = %partner.recon_addr, error = %e, "partner recon address not allowed");
            }
        }
    }

    pub fn matches(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        ip.is_loopback() || self.nets.iter().any(|net| net.contains(&ip))
    }
}
