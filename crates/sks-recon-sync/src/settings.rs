//! Peer settings, parsed from the `[conflux.recon]` TOML section.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sks_recon_store::config::{DEFAULT_BIT_QUANTUM, DEFAULT_MBAR, DEFAULT_THRESH_MULT};
use sks_recon_store::PTreeConfig;

use crate::error::{Result, SyncError};
use crate::messages::Config;

pub const DEFAULT_VERSION: &str = "1.1.6";
pub const DEFAULT_HTTP_ADDR: &str = ":11371";
pub const DEFAULT_RECON_ADDR: &str = ":11370";
pub const DEFAULT_SEEN_CACHE_SIZE: usize = 16384;
pub const DEFAULT_GOSSIP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_OUTSTANDING_RECON_REQUESTS: usize = 100;

/// Partner weight used when none is configured.
pub const DEFAULT_PARTNER_WEIGHT: i64 = 100;

/// Port assumed for the HTTP side of partners listed in the compat `partners` key.
const COMPAT_PARTNER_HTTP_PORT: u16 = 11371;

/// `recon_addr` value that disables the accepting side.
pub const RECON_ADDR_NONE: &str = "none";

/// A remote peer we gossip with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Partner {
    #[serde(rename = "httpAddr")]
    pub http_addr: String,
    #[serde(rename = "reconAddr")]
    pub recon_addr: String,
    /// Relative gossip weight. Zero means [`DEFAULT_PARTNER_WEIGHT`];
    /// negative excludes the partner from gossip.
    pub weight: i64,
}

/// Reconciliation peer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "threshMult")]
    pub thresh_mult: usize,
    #[serde(rename = "bitQuantum")]
    pub bit_quantum: usize,
    #[serde(rename = "mBar")]
    pub mbar: usize,

    pub version: String,
    #[serde(rename = "httpAddr")]
    pub http_addr: String,
    #[serde(rename = "reconAddr")]
    pub recon_addr: String,
    #[serde(rename = "seenCacheSize")]
    pub seen_cache_size: usize,
    #[serde(rename = "partner")]
    pub partners: BTreeMap<String, Partner>,
    #[serde(rename = "allowCIDRs")]
    pub allow_cidrs: Vec<String>,
    pub filters: Vec<String>,

    // Older configuration keys, folded in by `resolve`.
    #[serde(rename = "httpPort", skip_serializing)]
    pub compat_http_port: u16,
    #[serde(rename = "reconPort", skip_serializing)]
    pub compat_recon_port: u16,
    #[serde(rename = "partners", skip_serializing)]
    pub compat_partner_addrs: Vec<String>,

    #[serde(rename = "gossipIntervalSecs")]
    pub gossip_interval_secs: u64,
    #[serde(rename = "maxOutstandingReconRequests")]
    pub max_outstanding_recon_requests: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            thresh_mult: DEFAULT_THRESH_MULT,
            bit_quantum: DEFAULT_BIT_QUANTUM,
            mbar: DEFAULT_MBAR,
            version: DEFAULT_VERSION.to_string(),
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            recon_addr: DEFAULT_RECON_ADDR.to_string(),
            seen_cache_size: DEFAULT_SEEN_CACHE_SIZE,
            partners: BTreeMap::new(),
            allow_cidrs: Vec::new(),
            filters: vec!["yminsky.dedup".to_string(), "yminsky.merge".to_string()],
            compat_http_port: 0,
            compat_recon_port: 0,
            compat_partner_addrs: Vec::new(),
            gossip_interval_secs: DEFAULT_GOSSIP_INTERVAL_SECS,
            max_outstanding_recon_requests: DEFAULT_MAX_OUTSTANDING_RECON_REQUESTS,
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct Document {
    conflux: ConfluxSection,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct ConfluxSection {
    recon: Settings,
}

impl Settings {
    /// Parse the `[conflux.recon]` section of a TOML document and resolve it.
    /// Missing keys take their defaults.
    pub fn parse(data: &str) -> Result<Self> {
        let doc: Document = toml::from_str(data).map_err(|e| SyncError::Settings(e.to_string()))?;
        let mut settings = doc.conflux.recon;
        settings.resolve()?;
        Ok(settings)
    }

    /// Fold older configuration keys into their current form and validate
    /// the local addresses.
    pub fn resolve(&mut self) -> Result<()> {
        if self.compat_http_port != 0 {
            self.http_addr = format!(":{}", self.compat_http_port);
        }
        if self.compat_recon_port != 0 {
            self.recon_addr = format!(":{}", self.compat_recon_port);
        }
        if !self.compat_partner_addrs.is_empty() {
            let mut partners = BTreeMap::new();
            for addr in &self.compat_partner_addrs {
                let (host, _) = split_host_port(addr).map_err(|e| {
                    SyncError::Settings(format!("invalid 'partners' address {:?}: {}", addr, e))
                })?;
                partners.insert(
                    host.to_string(),
                    Partner {
                        http_addr: join_host_port(host, COMPAT_PARTNER_HTTP_PORT),
                        recon_addr: addr.clone(),
                        weight: 0,
                    },
                );
            }
            self.partners = partners;
        }

        split_host_port(&self.http_addr).map_err(|e| {
            SyncError::Settings(format!("invalid httpAddr {:?}: {}", self.http_addr, e))
        })?;
        if self.recon_addr != RECON_ADDR_NONE {
            split_host_port(&self.recon_addr).map_err(|e| {
                SyncError::Settings(format!("invalid reconAddr {:?}: {}", self.recon_addr, e))
            })?;
        }
        Ok(())
    }

    pub fn ptree_config(&self) -> PTreeConfig {
        PTreeConfig {
            thresh_mult: self.thresh_mult,
            bit_quantum: self.bit_quantum,
            mbar: self.mbar,
        }
    }

    /// The configuration announced to remote peers.
    pub fn config(&self) -> Result<Config> {
        let (_, http_port) = split_host_port(&self.http_addr).map_err(|e| {
            SyncError::Settings(format!(
                "cannot determine httpPort from httpAddr {:?}: {}",
                self.http_addr, e
            ))
        })?;
        Ok(Config {
            version: self.version.clone(),
            http_port: u32::from(http_port),
            bit_quantum: to_wire_int(self.bit_quantum, "bitQuantum")?,
            mbar: to_wire_int(self.mbar, "mBar")?,
            filters: self.filters.join(","),
            custom: BTreeMap::new(),
        })
    }

    /// Whether the accepting side is enabled.
    pub fn serves(&self) -> bool {
        self.recon_addr != RECON_ADDR_NONE
    }

    /// Jittered gossip delay: the interval minus 10%, plus up to 20% at random.
    pub fn skewed_gossip_interval(&self) -> Duration {
        let interval = self.gossip_interval_secs as f64;
        let base = interval * 0.9;
        let skew = rand::random::<f64>() * interval * 0.2;
        Duration::from_secs_f64(base + skew)
    }

    /// Pick a partner at random, weighted by [`Partner::weight`].
    ///
    /// Partners whose address does not resolve are skipped; their errors are
    /// returned alongside the choice.
    pub async fn random_partner_addr(&self) -> (Option<SocketAddr>, Vec<SyncError>) {
        let mut choices = Vec::new();
        let mut errors = Vec::new();
        for partner in self.partners.values() {
            match resolve_addr(&partner.recon_addr).await {
                Ok(addr) => {
                    let weight = match partner.weight {
                        0 => DEFAULT_PARTNER_WEIGHT,
                        w => w,
                    };
                    if weight > 0 {
                        choices.push((addr, weight));
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        let choice = choices
            .choose_weighted(&mut rand::thread_rng(), |(_, weight)| *weight)
            .map(|(addr, _)| *addr);
        match choice {
            Ok(addr) => (Some(addr), errors),
            Err(_) if choices.is_empty() => (None, errors),
            Err(e) => {
                errors.push(SyncError::Settings(e.to_string()));
                (None, errors)
            }
        }
    }
}

fn to_wire_int(value: usize, name: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| SyncError::Settings(format!("{} out of range: {}", name, value)))
}

/// Timing knobs for reconciliation sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Ordinary reads, including the configuration exchange.
    pub read: Duration,
    /// Non-blocking reply poll inside the server loop.
    pub poll: Duration,
    /// Reads while waiting out a flush.
    pub flush_read: Duration,
    /// Outbound connection attempts.
    pub dial: Duration,
    /// TCP keepalive on accepted connections.
    pub keepalive: Duration,
    /// Writing a configuration rejection.
    pub config_fail_write: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(300),
            poll: Duration::from_millis(1),
            flush_read: Duration::from_secs(3),
            dial: Duration::from_secs(30),
            keepalive: Duration::from_secs(180),
            config_fail_write: Duration::from_secs(3),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Addresses
// ─────────────────────────────────────────────────────────────────────────────

/// Split `host:port`, `[v6]:port` or `:port`. The host may be empty.
pub fn split_host_port(addr: &str) -> std::result::Result<(&str, u16), String> {
    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| "missing ']' in address".to_string())?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| "missing port in address".to_string())?;
        (host, port)
    } else {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| "missing port in address".to_string())?;
        if host.contains(':') {
            return Err("too many colons in address".to_string());
        }
        (host, port)
    };
    let port = port
        .parse::<u16>()
        .map_err(|_| format!("invalid port {:?}", port))?;
    Ok((host, port))
}

/// Inverse of [`split_host_port`]; IPv6 hosts are bracketed.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Resolve an address. An empty host means every local interface.
pub async fn resolve_addr(addr: &str) -> Result<SocketAddr> {
    let (host, port) = split_host_port(addr)
        .map_err(|e| SyncError::Settings(format!("invalid address {:?}: {}", addr, e)))?;
    if host.is_empty() {
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| SyncError::Settings(format!("no addresses found for {:?}", addr)))
}
