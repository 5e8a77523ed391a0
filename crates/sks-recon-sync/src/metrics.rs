//! Prometheus metrics for reconciliation sessions.
//!
//! The collectors are created on first use and registered in the default
//! registry under the `conflux` namespace, so an application exposes them by
//! serving [`prometheus::gather`]. Every series is labelled by the remote
//! host, without its port.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use prometheus::{GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use tracing::warn;

use crate::error::Result;

const NAMESPACE: &str = "conflux";

/// Session outcome counters and timings.
#[derive(Clone)]
pub struct ReconMetrics {
    /// Elements handed to the recovery consumer, by peer.
    pub items_recovered: IntCounterVec,
    /// Sessions refused because one side was busy, by peer.
    pub busy_peer: IntCounterVec,
    /// Session duration in seconds, by peer and result.
    pub duration: HistogramVec,
    /// Unix time of the last event, by peer, event and role.
    pub event_time: GaugeVec,
    pub failure: IntCounterVec,
    pub success: IntCounterVec,
}

impl ReconMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            items_recovered: IntCounterVec::new(
                Opts::new(
                    "reconciliation_items_recovered",
                    "Count of items recovered since startup",
                )
                .namespace(NAMESPACE),
                &["peer"],
            )?,
            busy_peer: IntCounterVec::new(
                Opts::new(
                    "reconciliation_busy_peer",
                    "Count of reconciliations attempted against busy peers since startup",
                )
                .namespace(NAMESPACE),
                &["peer"],
            )?,
            duration: HistogramVec::new(
                HistogramOpts::new(
                    "reconciliation_duration_seconds",
                    "Time spent performing a reconciliation",
                )
                .namespace(NAMESPACE),
                &["peer", "result"],
            )?,
            event_time: GaugeVec::new(
                Opts::new(
                    "reconciliation_event_time_seconds",
                    "When the given event last occurred, in seconds since the epoch",
                )
                .namespace(NAMESPACE),
                &["peer", "event", "role"],
            )?,
            failure: IntCounterVec::new(
                Opts::new(
                    "reconciliation_failure",
                    "Count of failed reconciliations since startup",
                )
                .namespace(NAMESPACE),
                &["peer"],
            )?,
            success: IntCounterVec::new(
                Opts::new(
                    "reconciliation_success",
                    "Count of successful reconciliations since startup",
                )
                .namespace(NAMESPACE),
                &["peer"],
            )?,
        })
    }

    /// Register every collector in `registry`.
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.items_recovered.clone()))?;
        registry.register(Box::new(self.busy_peer.clone()))?;
        registry.register(Box::new(self.duration.clone()))?;
        registry.register(Box::new(self.event_time.clone()))?;
        registry.register(Box::new(self.failure.clone()))?;
        registry.register(Box::new(self.success.clone()))?;
        Ok(())
    }

    fn mark_event(&self, peer: &str, event: &str, role: &str) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.event_time
            .with_label_values(&[peer, event, role])
            .set(now);
    }
}

static METRICS: OnceLock<Option<ReconMetrics>> = OnceLock::new();

/// The process-wide collectors, registered on first call.
///
/// `None` if registration failed, e.g. because the application already
/// registered collectors under the same names.
pub fn metrics() -> Option<&'static ReconMetrics> {
    METRICS
        .get_or_init(|| {
            let registered = ReconMetrics::new().and_then(|m| {
                m.register(prometheus::default_registry())?;
                Ok(m)
            });
            match registered {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!(error = %e, "cannot register reconciliation metrics");
                    None
                }
            }
        })
        .as_ref()
}

fn host(peer: SocketAddr) -> String {
    peer.ip().to_string()
}

pub(crate) fn record_initiate(peer: SocketAddr, role: &str) {
    if let Some(m) = metrics() {
        m.mark_event(&host(peer), "initiate", role);
    }
}

/// Record a finished session: busy, failed or successful.
pub(crate) fn record_session(peer: SocketAddr, role: &str, elapsed: Duration, result: &Result<()>) {
    let Some(m) = metrics() else {
        return;
    };
    let host = host(peer);
    match result {
        Err(e) if e.is_busy() => {
            m.busy_peer.with_label_values(&[&host]).inc();
            m.mark_event(&host, "busy", role);
        }
        Err(_) => {
            m.duration
                .with_label_values(&[&host, "failure"])
                .observe(elapsed.as_secs_f64());
            m.failure.with_label_values(&[&host]).inc();
            m.mark_event(&host, "failure", role);
        }
        Ok(()) => {
            m.duration
                .with_label_values(&[&host, "success"])
                .observe(elapsed.as_secs_f64());
            m.success.with_label_values(&[&host]).inc();
            m.mark_event(&host, "success", role);
        }
    }
}

pub(crate) fn record_items_recovered(peer: SocketAddr, items: usize) {
    if let Some(m) = metrics() {
        m.items_recovered
            .with_label_values(&[&host(peer)])
            .inc_by(items as u64);
    }
}
