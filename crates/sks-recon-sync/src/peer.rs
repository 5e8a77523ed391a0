//! The reconciliation peer: owns the tree, gossips with partners and serves
//! inbound sessions.
//!
//! # Mutation
//!
//! [`Peer::insert`] and [`Peer::remove`] only queue elements. The queue is
//! drained into the tree under a [`MutationGuard`] once no session is reading
//! it (see [`crate::gate`]): by the mutator task, by [`Peer::flush`], or at
//! [`Peer::stop`].
//!
//! # Recovery
//!
//! Elements a session learns the remote has and we lack are posted on the
//! [`RecoverChan`] returned by [`Peer::new`]. The session waits for the
//! consumer to complete each [`Recover`]. If the consumer is still busy with
//! an earlier one, the items are dropped and the peer refuses new sessions
//! until the next mutation.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use sks_recon_core::{ZSet, Zp};
use sks_recon_store::PrefixTree;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client::ClientSession;
use crate::error::{Result, SyncError};
use crate::gate::{MutationGuard, ReadGuard, ReconGate};
use crate::handshake::exchange_config;
use crate::matcher::IpMatcher;
use crate::messages::{Config, BUSY_RESPONSE};
use crate::metrics;
use crate::recover::{Recover, RecoverChan, RecoverSender};
use crate::server::ServerSession;
use crate::settings::{resolve_addr, SessionTimeouts, Settings};
use crate::tasks::TaskGroup;
use crate::transport::{Connection, ReconStream};

const GOSSIP: &str = "gossip";
const SERVE: &str = "serve";

/// Recoveries that may wait for the consumer. A session whose recovery
/// does not fit marks the peer full.
const RECOVER_CHANNEL_CAPACITY: usize = 1;

/// Which loops [`Peer::start`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerMode {
    #[default]
    Default,
    GossipOnly,
    ServeOnly,
}

impl PeerMode {
    fn gossips(self) -> bool {
        self != PeerMode::ServeOnly
    }

    fn serves(self) -> bool {
        self != PeerMode::GossipOnly
    }
}

type MutatedFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct PendingElements {
    insert: Vec<Zp>,
    remove: Vec<Zp>,
}

struct PeerInner {
    settings: Settings,
    timeouts: SessionTimeouts,
    tree: Arc<dyn PrefixTree>,
    gate: Arc<ReconGate>,
    pending: Mutex<PendingElements>,
    mutated_fn: Mutex<Option<MutatedFn>>,
    die: tokio::sync::Mutex<()>,
    tasks: TaskGroup,
    recover_tx: RecoverSender,
}

/// A reconciliation peer. Clones share the same state.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl Peer {
    /// Create a peer over `tree`, returning the channel recovered elements
    /// are posted on.
    pub fn new(settings: Settings, tree: Arc<dyn PrefixTree>) -> (Self, RecoverChan) {
        Self::with_timeouts(settings, tree, SessionTimeouts::default())
    }

    pub fn with_timeouts(
        settings: Settings,
        tree: Arc<dyn PrefixTree>,
        timeouts: SessionTimeouts,
    ) -> (Self, RecoverChan) {
        let (recover_tx, recover_rx) = mpsc::channel(RECOVER_CHANNEL_CAPACITY);
        let inner = PeerInner {
            settings,
            timeouts,
            tree,
            gate: ReconGate::new(),
            pending: Mutex::new(PendingElements::default()),
            mutated_fn: Mutex::new(None),
            die: tokio::sync::Mutex::new(()),
            tasks: TaskGroup::new(),
            recover_tx,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            recover_rx,
        )
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn tree(&self) -> &Arc<dyn PrefixTree> {
        &self.inner.tree
    }

    pub fn gate(&self) -> &Arc<ReconGate> {
        &self.inner.gate
    }

    fn pending(&self) -> MutexGuard<'_, PendingElements> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start the loops `mode` selects. Serving binds the configured recon
    /// address first and returns the bound address.
    pub async fn start(&self, mode: PeerMode) -> Result<Option<SocketAddr>> {
        let mut local_addr = None;
        if mode.serves() && self.inner.settings.serves() {
            let addr = resolve_addr(&self.inner.settings.recon_addr).await?;
            let listener = TcpListener::bind(addr).await?;
            local_addr = Some(listener.local_addr()?);
            self.serve_listener(listener).await?;
        }
        if mode.gossips() {
            let peer = self.clone();
            self.inner.tasks.spawn_cancellable(async move {
                peer.gossip_loop().await;
            });
        }
        Ok(local_addr)
    }

    /// Accept sessions on an already bound listener.
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<()> {
        let matcher = IpMatcher::from_settings(&self.inner.settings).await?;
        let peer = self.clone();
        self.inner.tasks.spawn_cancellable(async move {
            peer.serve_loop(listener, matcher).await;
        });
        Ok(())
    }

    /// Cancel every session, apply queued mutations and wait for all tasks.
    ///
    /// Sessions driven directly through [`Peer::accept`],
    /// [`Peer::initiate`] or [`Peer::initiate_recon`] are not cancelled;
    /// `stop` waits for them to release the tree.
    pub async fn stop(&self) {
        {
            let _die = self.inner.die.lock().await;
            self.inner.tasks.shutdown();
        }
        self.flush().await;
        self.inner.tasks.join().await;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.tasks.is_shutting_down()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue elements for insertion.
    pub fn insert(&self, zs: impl IntoIterator<Item = Zp>) {
        self.pending().insert.extend(zs);
    }

    /// Queue elements for removal.
    pub fn remove(&self, zs: impl IntoIterator<Item = Zp>) {
        self.pending().remove.extend(zs);
    }

    /// Call `f` after every batch of mutations is applied.
    pub fn set_mutated_fn(&self, f: impl Fn() + Send + Sync + 'static) {
        *self
            .inner
            .mutated_fn
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(f));
    }

    /// Number of queued inserts and removes.
    pub fn pending_len(&self) -> (usize, usize) {
        let pending = self.pending();
        (pending.insert.len(), pending.remove.len())
    }

    /// Apply queued inserts, then queued removes, once no session is reading
    /// the tree.
    ///
    /// Waits for every [`ReadGuard`] to be released, so it must not be called
    /// while holding one.
    pub async fn flush(&self) {
        let mutation = self.inner.gate.begin_mutation().await;
        self.apply_pending(&mutation).await;
    }

    /// Drain the queue into the tree. Elements the tree rejects are logged
    /// and dropped.
    async fn apply_pending(&self, _mutation: &MutationGuard) {
        let batch = std::mem::take(&mut *self.pending());
        let tree = &self.inner.tree;

        let mut inserted = 0;
        for z in &batch.insert {
            match tree.insert(z).await {
                Ok(()) => inserted += 1,
                Err(e) => warn!(element = %z, error = %e, "cannot insert into prefix tree"),
            }
        }
        if inserted > 0 {
            debug!(elements = inserted, "inserted");
        }

        let mut removed = 0;
        for z in &batch.remove {
            match tree.remove(z).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(element = %z, error = %e, "cannot remove from prefix tree"),
            }
        }
        if removed > 0 {
            debug!(elements = removed, "removed");
        }

        let mutated_fn = self
            .inner
            .mutated_fn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(f) = mutated_fn {
            f();
        }
    }

    /// Admit a session, scheduling the next mutation if this is the first
    /// reader since the last one.
    async fn read_acquire(&self) -> Option<ReadGuard> {
        if self.is_shutting_down() {
            return None;
        }
        let (guard, schedule) = self.inner.gate.try_acquire()?;
        if schedule {
            self.schedule_mutation().await;
        }
        Some(guard)
    }

    async fn schedule_mutation(&self) {
        let _die = self.inner.die.lock().await;
        if self.is_shutting_down() {
            return;
        }
        let peer = self.clone();
        self.inner.tasks.spawn(async move {
            peer.flush().await;
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Gossip
    // ─────────────────────────────────────────────────────────────────────────

    async fn gossip_loop(self) {
        loop {
            let delay = self.inner.settings.skewed_gossip_interval();
            info!(role = GOSSIP, ?delay, "waiting for next gossip attempt");
            tokio::time::sleep(delay).await;

            match self.gossip_once().await {
                Ok(()) => {}
                Err(SyncError::NoPartners) => {
                    debug!(role = GOSSIP, "no partners to gossip with");
                }
                Err(e) if e.is_busy() => {
                    debug!(role = GOSSIP, error = %e, "partner busy");
                }
                Err(e) if e.is_gossip_blocked() => {
                    debug!(role = GOSSIP, error = %e, "gossip blocked");
                }
                Err(e) => error!(role = GOSSIP, error = %e, "recon failed"),
            }
        }
    }

    /// One gossip attempt with a randomly chosen partner. Does nothing while
    /// the tree is unavailable.
    pub async fn gossip_once(&self) -> Result<()> {
        let Some(guard) = self.read_acquire().await else {
            return Ok(());
        };
        let (addr, errors) = self.inner.settings.random_partner_addr().await;
        for e in errors {
            warn!(role = GOSSIP, error = %e, "cannot resolve partner");
        }
        let addr = addr.ok_or(SyncError::NoPartners)?;
        let result = self.dial_and_reconcile(addr).await;
        drop(guard);
        result
    }

    /// Reconcile with the peer at `addr` now.
    pub async fn initiate_recon(&self, addr: SocketAddr) -> Result<()> {
        let guard = self.read_acquire().await.ok_or(SyncError::PeerBusy)?;
        let result = self.dial_and_reconcile(addr).await;
        drop(guard);
        result
    }

    async fn dial_and_reconcile(&self, addr: SocketAddr) -> Result<()> {
        let started = Instant::now();
        metrics::record_initiate(addr, GOSSIP);
        let result = self.dial(addr).await;
        metrics::record_session(addr, GOSSIP, started.elapsed(), &result);
        result
    }

    async fn dial(&self, addr: SocketAddr) -> Result<()> {
        debug!(role = GOSSIP, remote_addr = %addr, "initiating recon");
        let stream =
            tokio::time::timeout(self.inner.timeouts.dial, TcpStream::connect(addr)).await??;
        let mut conn = Connection::new(stream, addr);
        self.client_recon(&mut conn).await
    }

    /// Reconcile as the initiating side over an established connection.
    pub async fn initiate<S: ReconStream>(&self, mut conn: Connection<S>) -> Result<()> {
        let guard = self.read_acquire().await.ok_or(SyncError::PeerBusy)?;
        let result = self.client_recon(&mut conn).await;
        drop(guard);
        result
    }

    async fn client_recon<S: ReconStream>(&self, conn: &mut Connection<S>) -> Result<()> {
        let local = self.inner.settings.config()?;
        let remote_config =
            exchange_config(conn, &local, None, &self.inner.timeouts, GOSSIP).await?;

        let remote_addr = conn.remote_addr();
        let mut session = ClientSession::new(self.inner.tree.as_ref(), conn, self.inner.timeouts);
        let result = session.run().await;
        let recovered = session.into_recovered();
        self.send_items(recovered, remote_addr, remote_config, GOSSIP)
            .await;
        result
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Serve
    // ─────────────────────────────────────────────────────────────────────────

    async fn serve_loop(self, listener: TcpListener, matcher: IpMatcher) {
        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(role = SERVE, error = %e, "accept failed");
                    continue;
                }
            };
            if let Err(e) = set_keepalive(&stream, &self.inner.timeouts) {
                debug!(role = SERVE, %remote_addr, error = %e, "cannot set keepalive");
            }
            if !matcher.matches(remote_addr.ip()) {
                warn!(role = SERVE, %remote_addr, "connection rejected");
                continue;
            }

            let _die = self.inner.die.lock().await;
            if self.is_shutting_down() {
                return;
            }
            let peer = self.clone();
            self.inner.tasks.spawn_cancellable(async move {
                let conn = Connection::new(stream, remote_addr);
                match peer.accept(conn).await {
                    Ok(()) => {}
                    Err(SyncError::PeerBusy) => {
                        debug!(role = SERVE, %remote_addr, "busy, refused session");
                    }
                    Err(e) => error!(role = SERVE, %remote_addr, error = %e, "recon failed"),
                }
            });
        }
    }

    /// Serve one session over an accepted connection.
    pub async fn accept<S: ReconStream>(&self, conn: Connection<S>) -> Result<()> {
        let remote_addr = conn.remote_addr();
        info!(role = SERVE, %remote_addr, "accepted connection");

        let started = Instant::now();
        metrics::record_initiate(remote_addr, SERVE);
        let result = self.serve(conn).await;
        metrics::record_session(remote_addr, SERVE, started.elapsed(), &result);
        result
    }

    async fn serve<S: ReconStream>(&self, mut conn: Connection<S>) -> Result<()> {
        let remote_addr = conn.remote_addr();
        let guard = self.read_acquire().await;
        let fail_resp = guard.is_none().then_some(BUSY_RESPONSE);
        let local = self.inner.settings.config()?;
        let handshake =
            exchange_config(&mut conn, &local, fail_resp, &self.inner.timeouts, SERVE).await;
        let Some(guard) = guard else {
            return Err(SyncError::PeerBusy);
        };
        let remote_config = handshake?;

        let mut session = ServerSession::new(
            self.inner.tree.as_ref(),
            &mut conn,
            self.inner.timeouts,
            self.inner.settings.max_outstanding_recon_requests,
        );
        let result = session.run().await;
        let recovered = session.into_recovered();
        self.send_items(recovered, remote_addr, remote_config, SERVE)
            .await;
        drop(guard);
        result
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Recovery
    // ─────────────────────────────────────────────────────────────────────────

    async fn send_items(
        &self,
        items: ZSet,
        remote_addr: SocketAddr,
        remote_config: Config,
        role: &'static str,
    ) {
        if items.is_empty() || self.is_shutting_down() {
            return;
        }
        let count = items.len();
        let (recover, done) = Recover::new(remote_addr, remote_config, items.items());
        match self.inner.recover_tx.try_send(recover) {
            Ok(()) => {
                info!(role, %remote_addr, items = count, "recovering items");
                let _ = done.await;
                info!(role, %remote_addr, "recovery complete");
                metrics::record_items_recovered(remote_addr, count);
            }
            Err(TrySendError::Full(_)) => {
                debug!(role, %remote_addr, items = count, "recovery backlogged, marking full");
                self.inner.gate.mark_full();
            }
            Err(TrySendError::Closed(_)) => {
                warn!(role, %remote_addr, items = count, "recovery channel closed, dropping items");
            }
        }
    }
}

fn set_keepalive(stream: &TcpStream, timeouts: &SessionTimeouts) -> std::io::Result<()> {
    let keepalive = socket2::TcpKeepalive::new().with_time(timeouts.keepalive);
    socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)
}
