//! Fetching the elements a reconciliation session found missing.
//!
//! Each [`Recover`] the peer posts names elements some remote holds. The
//! [`RecoveryWorker`] asks an application [`ElementFetcher`] for them in
//! chunks and queues whatever arrives for insertion.
//!
//! An element the remote advertises but never delivers would be recovered
//! again after every session. The worker counts failed attempts per element;
//! once an element exceeds the attempt limit it is inserted anyway, as a
//! poison pill, so reconciliation stops asking for it.

use std::collections::HashMap;

use async_trait::async_trait;
use sks_recon_core::Zp;
use sks_recon_sync::{Peer, Recover, RecoverChan};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// Elements requested from the remote in one fetch.
pub const REQUEST_CHUNK_SIZE: usize = 100;

/// Default number of failed fetches before an element is given up on.
pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 10;

/// Retrieves elements from a remote peer's key service.
#[async_trait]
pub trait ElementFetcher: Send + Sync {
    /// Fetch `chunk` from the service at `hkp_addr` and store it locally.
    ///
    /// Returns the elements actually obtained. Elements left out count as
    /// one failed attempt each; an error fails the whole chunk.
    async fn fetch(&self, hkp_addr: &str, chunk: &[Zp]) -> Result<Vec<Zp>>;
}

/// Settings for [`RecoveryWorker`].
#[derive(Debug, Clone, Copy)]
pub struct RecoveryConfig {
    pub chunk_size: usize,
    pub max_recovery_attempts: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            chunk_size: REQUEST_CHUNK_SIZE,
            max_recovery_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
        }
    }
}

/// Outcome of handling one [`Recover`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Elements the fetcher delivered.
    pub fetched: usize,
    /// Elements that failed and will be retried.
    pub failed: usize,
    /// Elements inserted without being fetched.
    pub poisoned: usize,
    /// Chunks whose fetch returned an error.
    pub chunk_errors: usize,
    /// Elements not requested because the remote's key service address is
    /// invalid. They are not counted as failed attempts.
    pub skipped: usize,
}

/// Consumes a peer's recovery channel.
pub struct RecoveryWorker<F> {
    peer: Peer,
    fetcher: F,
    config: RecoveryConfig,
    attempts: HashMap<Zp, u32>,
}

impl<F: ElementFetcher> RecoveryWorker<F> {
    pub fn new(peer: Peer, fetcher: F, config: RecoveryConfig) -> Self {
        Self {
            peer,
            fetcher,
            config,
            attempts: HashMap::new(),
        }
    }

    /// Failed attempts recorded for `z`.
    pub fn attempts(&self, z: &Zp) -> u32 {
        self.attempts.get(z).copied().unwrap_or(0)
    }

    /// Handle recoveries until the channel closes or `shutdown` turns true.
    pub async fn run(mut self, mut recover_rx: RecoverChan, mut shutdown: watch::Receiver<bool>) {
        loop {
            let recover = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => return,
                recover = recover_rx.recv() => match recover {
                    Some(recover) => recover,
                    None => return,
                },
            };
            let remote_addr = recover.remote_addr;
            info!(%remote_addr, items = recover.remote_elements.len(), "items to recover");
            let report = self.handle(&recover).await;
            recover.complete();
            if report.skipped > 0 {
                warn!(%remote_addr, skipped = report.skipped, "recovery skipped");
            } else if report.chunk_errors > 0 {
                error!(
                    %remote_addr,
                    chunk_errors = report.chunk_errors,
                    failed = report.failed,
                    "recovery completed with errors"
                );
            } else {
                info!(
                    %remote_addr,
                    fetched = report.fetched,
                    poisoned = report.poisoned,
                    "recovery complete"
                );
            }
        }
    }

    /// Fetch one recovery's elements chunk by chunk.
    pub async fn handle(&mut self, recover: &Recover) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        let hkp_addr = match recover.hkp_addr() {
            Ok(hkp_addr) => hkp_addr,
            Err(e) => {
                warn!(remote_addr = %recover.remote_addr, error = %e, "cannot locate remote key service");
                report.skipped = recover.remote_elements.len();
                return report;
            }
        };
        let chunk_size = self.config.chunk_size.max(1);

        for chunk in recover.remote_elements.chunks(chunk_size) {
            debug!(%hkp_addr, elements = chunk.len(), "requesting chunk");
            let fetched = match self.fetcher.fetch(&hkp_addr, chunk).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(%hkp_addr, error = %e, "chunk fetch failed");
                    report.chunk_errors += 1;
                    Vec::new()
                }
            };

            let mut insert = Vec::with_capacity(chunk.len());
            for z in chunk {
                if fetched.contains(z) {
                    self.attempts.remove(z);
                    report.fetched += 1;
                    insert.push(z.clone());
                } else if self.record_failure(z) {
                    warn!(element = %z, attempts = self.config.max_recovery_attempts, "giving up, inserting poison pill");
                    report.poisoned += 1;
                    insert.push(z.clone());
                } else {
                    report.failed += 1;
                }
            }
            self.peer.insert(insert);
        }
        report
    }

    /// Count a failed attempt; true once the element should be given up on.
    fn record_failure(&mut self, z: &Zp) -> bool {
        let count = self.attempts.entry(z.clone()).or_insert(0);
        *count += 1;
        if *count > self.config.max_recovery_attempts {
            self.attempts.remove(z);
            true
        } else {
            false
        }
    }
}
