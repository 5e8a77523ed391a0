//! The ReconNode: a prefix tree, the peer that reconciles it, and the
//! worker that fetches what reconciliation finds missing.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sks_recon_core::{digest_to_zp, Zp};
use sks_recon_store::{MemPrefixTree, PrefixTree, SqlitePrefixTree};
use sks_recon_sync::{Peer, PeerMode, RecoverChan, SessionTimeouts, Settings};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ReconError, Result};
use crate::recovery::{ElementFetcher, RecoveryConfig, RecoveryWorker};

/// Configuration for a [`ReconNode`].
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Which peer loops to run.
    pub mode: PeerMode,
    /// Session timing.
    pub timeouts: SessionTimeouts,
    /// Recovery worker settings.
    pub recovery: RecoveryConfig,
}

#[derive(Default)]
struct NodeState {
    recover_rx: Option<RecoverChan>,
    worker: Option<JoinHandle<()>>,
    stopped: bool,
}

/// A reconciling keyserver node.
///
/// Provides a unified API for:
/// - Opening the prefix tree (in memory or SQLite)
/// - Feeding digest changes from the key store
/// - Running gossip and serve loops
/// - Recovering missing elements through an [`ElementFetcher`]
pub struct ReconNode {
    peer: Peer,
    config: NodeConfig,
    state: Mutex<NodeState>,
    shutdown_tx: watch::Sender<bool>,
}

impl ReconNode {
    /// Create a node over an existing tree.
    pub fn new(settings: Settings, tree: Arc<dyn PrefixTree>, config: NodeConfig) -> Self {
        let (peer, recover_rx) = Peer::with_timeouts(settings, tree, config.timeouts);
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            peer,
            config,
            state: Mutex::new(NodeState {
                recover_rx: Some(recover_rx),
                ..NodeState::default()
            }),
            shutdown_tx,
        }
    }

    /// Create a node with an in-memory tree shaped by `settings`.
    pub fn in_memory(settings: Settings, config: NodeConfig) -> Self {
        let tree = Arc::new(MemPrefixTree::new(settings.ptree_config()));
        Self::new(settings, tree, config)
    }

    /// Create a node whose tree lives in a SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>, settings: Settings, config: NodeConfig) -> Result<Self> {
        let tree = Arc::new(SqlitePrefixTree::open(path, settings.ptree_config())?);
        Ok(Self::new(settings, tree, config))
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The underlying peer.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// The prefix tree.
    pub fn tree(&self) -> &Arc<dyn PrefixTree> {
        self.peer.tree()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start the recovery worker and the peer loops.
    ///
    /// Returns the address the node serves reconciliation on, if any.
    pub async fn start<F>(&self, fetcher: F) -> Result<Option<SocketAddr>>
    where
        F: ElementFetcher + 'static,
    {
        let recover_rx = self.take_recover_chan()?;
        self.tree().create().await?;

        let worker = RecoveryWorker::new(self.peer.clone(), fetcher, self.config.recovery);
        let handle = tokio::spawn(worker.run(recover_rx, self.shutdown_tx.subscribe()));
        self.state().worker = Some(handle);

        let local_addr = self.peer.start(self.config.mode).await?;
        info!(mode = ?self.config.mode, ?local_addr, "recon node started");
        Ok(local_addr)
    }

    /// Hand the recovery channel to the caller instead of a worker.
    ///
    /// The node then only reconciles; [`ReconNode::start`] can no longer be
    /// used, and the caller must complete every [`sks_recon_sync::Recover`].
    pub fn take_recover_chan(&self) -> Result<RecoverChan> {
        let mut state = self.state();
        if state.stopped {
            return Err(ReconError::InvalidOperation("node is stopped".into()));
        }
        state
            .recover_rx
            .take()
            .ok_or_else(|| ReconError::InvalidOperation("recovery already started".into()))
    }

    /// Stop the peer, apply pending mutations, stop the worker and close
    /// the tree.
    pub async fn stop(&self) -> Result<()> {
        let worker = {
            let mut state = self.state();
            if state.stopped {
                return Ok(());
            }
            state.stopped = true;
            state.recover_rx = None;
            state.worker.take()
        };

        self.peer.stop().await;
        self.shutdown_tx.send_replace(true);
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "recovery worker failed");
            }
        }
        self.tree().close().await?;
        info!("recon node stopped");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Digest notifications
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue key store changes, given as hex digests.
    ///
    /// Every digest is checked before any is queued, so a bad digest leaves
    /// the pending mutations untouched.
    pub fn digests_changed<I, R>(&self, inserted: I, removed: R) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        let inserted = digests_to_zps(inserted)?;
        let removed = digests_to_zps(removed)?;
        debug!(
            inserted = inserted.len(),
            removed = removed.len(),
            "digests changed"
        );
        self.peer.insert(inserted);
        self.peer.remove(removed);
        Ok(())
    }

    /// Apply queued changes now, once no session is reading the tree.
    pub async fn flush(&self) {
        self.peer.flush().await;
    }
}

fn digests_to_zps<I>(digests: I) -> Result<Vec<Zp>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    digests
        .into_iter()
        .map(|d| {
            let digest = d.as_ref();
            digest_to_zp(digest).map_err(|source| ReconError::BadDigest {
                digest: digest.to_string(),
                source,
            })
        })
        .collect()
}

/// The hex digest an SKS element was derived from.
///
/// Inverse of [`digest_to_zp`] for 16-byte digests.
pub fn zp_to_digest(z: &Zp) -> String {
    let mut bytes = z.to_padded_bytes();
    bytes.truncate(DIGEST_LEN);
    hex::encode(bytes)
}

/// Length of an MD5 key digest.
pub const DIGEST_LEN: usize = 16;
