//! Test fixtures and helpers.
//!
//! Peers here talk over in-memory pipes, so a whole reconciliation runs
//! without sockets or timers.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use sks_recon_core::{ZSet, Zp};
use sks_recon_store::{MemPrefixTree, PTreeConfig, PrefixTree, PrefixTreeExt};
use sks_recon_sync::{memory, Peer, RecoverChan, SessionTimeouts, Settings};
use tokio::task::JoinHandle;

/// A peer over an in-memory tree whose recoveries are inserted directly.
pub struct PeerFixture {
    pub peer: Peer,
    pub addr: SocketAddr,
    recovery: JoinHandle<()>,
}

impl PeerFixture {
    /// Create a peer holding `elements`, with default geometry.
    pub async fn new(port: u16, elements: &[Zp]) -> anyhow::Result<Self> {
        Self::with_config(port, PTreeConfig::default(), elements).await
    }

    /// Create a peer with a specific tree geometry.
    pub async fn with_config(
        port: u16,
        config: PTreeConfig,
        elements: &[Zp],
    ) -> anyhow::Result<Self> {
        let settings = Settings {
            thresh_mult: config.thresh_mult,
            bit_quantum: config.bit_quantum,
            mbar: config.mbar,
            ..Settings::default()
        };
        let tree = Arc::new(MemPrefixTree::new(config));
        tree.insert_all(elements)
            .await
            .context("seeding prefix tree")?;

        let (peer, recover_rx) = Peer::with_timeouts(settings, tree, SessionTimeouts::default());
        let recovery = tokio::spawn(insert_recovered(peer.clone(), recover_rx));
        Ok(Self {
            peer,
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            recovery,
        })
    }

    pub fn tree(&self) -> &Arc<dyn PrefixTree> {
        self.peer.tree()
    }

    /// Every element in the tree.
    pub async fn elements(&self) -> anyhow::Result<ZSet> {
        let tree = self.tree();
        let root = tree.root().await?;
        Ok(tree.elements(&root).await?.into_iter().collect())
    }

    /// Apply pending mutations once no session is reading.
    pub async fn settle(&self) {
        self.peer.flush().await;
    }

    /// Stop the peer and its recovery task.
    pub async fn shutdown(self) {
        self.peer.stop().await;
        self.recovery.abort();
    }
}

async fn insert_recovered(peer: Peer, mut recover_rx: RecoverChan) {
    while let Some(recover) = recover_rx.recv().await {
        peer.insert(recover.remote_elements.iter().cloned());
        recover.complete();
    }
}

/// Two peers, `a` initiating and `b` serving.
pub struct TwoPeers {
    pub a: PeerFixture,
    pub b: PeerFixture,
}

impl TwoPeers {
    pub async fn new(a_elements: &[Zp], b_elements: &[Zp]) -> anyhow::Result<Self> {
        Ok(Self {
            a: PeerFixture::new(40001, a_elements).await?,
            b: PeerFixture::new(11370, b_elements).await?,
        })
    }

    /// Run one session over an in-memory pipe and apply what it recovered.
    pub async fn reconcile(&self) -> anyhow::Result<()> {
        let (client_conn, server_conn) = memory::pair(self.a.addr, self.b.addr);
        let (client, server) = tokio::join!(
            self.a.peer.initiate(client_conn),
            self.b.peer.accept(server_conn)
        );
        client.context("initiating side")?;
        server.context("serving side")?;
        self.a.settle().await;
        self.b.settle().await;
        Ok(())
    }

    /// Reconcile until both sides agree, up to `max_rounds` sessions.
    ///
    /// Returns the number of sessions it took.
    pub async fn converge(&self, max_rounds: usize) -> anyhow::Result<usize> {
        for round in 1..=max_rounds {
            self.reconcile().await?;
            if self.a.elements().await? == self.b.elements().await? {
                return Ok(round);
            }
        }
        anyhow::bail!("peers still differ after {} rounds", max_rounds)
    }

    pub async fn shutdown(self) {
        self.a.shutdown().await;
        self.b.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sks_recon_core::p_sks;

    fn zs(ns: impl IntoIterator<Item = i64>) -> Vec<Zp> {
        let p = p_sks();
        ns.into_iter().map(|n| Zp::from_i64(&p, n)).collect()
    }

    #[tokio::test]
    async fn test_two_peers_converge() {
        let peers = TwoPeers::new(&zs(100..150), &zs(130..210)).await.unwrap();
        let rounds = peers.converge(3).await.unwrap();
        assert_eq!(rounds, 1);

        let union: ZSet = zs(100..210).into_iter().collect();
        assert_eq!(peers.a.elements().await.unwrap(), union);
        peers.shutdown().await;
    }

    #[tokio::test]
    async fn test_mismatched_geometry_is_rejected() {
        let a = PeerFixture::new(40001, &[]).await.unwrap();
        let config = PTreeConfig {
            mbar: 7,
            ..PTreeConfig::default()
        };
        let b = PeerFixture::with_config(11370, config, &[]).await.unwrap();
        let peers = TwoPeers { a, b };
        assert!(peers.reconcile().await.is_err());
        peers.shutdown().await;
    }
}
