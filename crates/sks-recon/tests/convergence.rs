//! End-to-end reconciliation between nodes over loopback TCP.
//!
//! Each node's fetcher answers from the other node's tree, standing in for
//! the hashquery a keyserver would make against its partner.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use sks_recon::core::p_sks;
use sks_recon::store::PrefixTreeExt;
use sks_recon::sync::SyncError;
use sks_recon::{
    ElementFetcher, MemPrefixTree, NodeConfig, PeerMode, PrefixTree, ReconError, ReconNode,
    RecoveryConfig, SessionTimeouts, Settings, Zp, DIGEST_LEN,
};

const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(30);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Random elements derived from 16-byte digests, as a key store produces.
fn random_elements(n: usize) -> Vec<Zp> {
    let p = p_sks();
    (0..n)
        .map(|_| Zp::from_le_bytes(&p, &Zp::random(&p).to_padded_bytes()[..DIGEST_LEN]))
        .collect()
}

/// Fetches from a remote node's tree.
struct TreeFetcher {
    remote: Arc<dyn PrefixTree>,
}

#[async_trait]
impl ElementFetcher for TreeFetcher {
    async fn fetch(&self, _hkp_addr: &str, chunk: &[Zp]) -> sks_recon::Result<Vec<Zp>> {
        let mut found = Vec::with_capacity(chunk.len());
        for z in chunk {
            if self.remote.contains(z).await? {
                found.push(z.clone());
            }
        }
        Ok(found)
    }
}

/// Never delivers anything.
struct NoFetch;

#[async_trait]
impl ElementFetcher for NoFetch {
    async fn fetch(&self, _hkp_addr: &str, _chunk: &[Zp]) -> sks_recon::Result<Vec<Zp>> {
        Ok(Vec::new())
    }
}

struct Pair {
    a: ReconNode,
    b: ReconNode,
    b_addr: SocketAddr,
}

async fn start_pair(a_elements: &[Zp], b_elements: &[Zp]) -> anyhow::Result<Pair> {
    start_pair_with(a_elements, b_elements, true).await
}

/// Start a pair. Unless `b_learns`, b's set stays fixed: its fetcher delivers
/// nothing and it never gives up on an element.
async fn start_pair_with(
    a_elements: &[Zp],
    b_elements: &[Zp],
    b_learns: bool,
) -> anyhow::Result<Pair> {
    let settings = Settings::parse(
        "[conflux.recon]\nhttpAddr = \"127.0.0.1:0\"\nreconAddr = \"127.0.0.1:0\"",
    )?;
    let config = NodeConfig {
        mode: PeerMode::ServeOnly,
        timeouts: SessionTimeouts {
            read: Duration::from_secs(10),
            ..SessionTimeouts::default()
        },
        ..NodeConfig::default()
    };

    let a_tree: Arc<dyn PrefixTree> = Arc::new(MemPrefixTree::new(settings.ptree_config()));
    let b_tree: Arc<dyn PrefixTree> = Arc::new(MemPrefixTree::new(settings.ptree_config()));
    a_tree.insert_all(a_elements).await?;
    b_tree.insert_all(b_elements).await?;

    let a = ReconNode::new(settings.clone(), Arc::clone(&a_tree), config.clone());
    a.start(TreeFetcher {
        remote: Arc::clone(&b_tree),
    })
    .await?;

    let (b, b_addr) = if b_learns {
        let b = ReconNode::new(settings, Arc::clone(&b_tree), config);
        let addr = b.start(TreeFetcher { remote: a_tree }).await?;
        (b, addr)
    } else {
        let config = NodeConfig {
            recovery: RecoveryConfig {
                max_recovery_attempts: u32::MAX,
                ..RecoveryConfig::default()
            },
            ..config
        };
        let b = ReconNode::new(settings, Arc::clone(&b_tree), config);
        let addr = b.start(NoFetch).await?;
        (b, addr)
    };
    let b_addr = b_addr.context("node b is not serving")?;
    Ok(Pair { a, b, b_addr })
}

async fn element_set(node: &ReconNode) -> anyhow::Result<HashSet<Zp>> {
    let tree = node.tree();
    Ok(tree.elements(&tree.root().await?).await?.into_iter().collect())
}

/// Every interior node's size is the sum of its children's, and every leaf
/// holds exactly `size` elements.
async fn assert_consistent(tree: &Arc<dyn PrefixTree>) -> anyhow::Result<()> {
    let mut stack = vec![tree.root().await?];
    while let Some(node) = stack.pop() {
        let children = tree.children(&node).await?;
        if node.is_leaf() {
            let held = tree.elements(&node).await?.len();
            anyhow::ensure!(
                held == node.size(),
                "leaf {} holds {} elements, size {}",
                node.key(),
                held,
                node.size()
            );
        } else {
            let sum: usize = children.iter().map(|child| child.size()).sum();
            anyhow::ensure!(
                sum == node.size(),
                "node {} children sum to {}, size {}",
                node.key(),
                sum,
                node.size()
            );
        }
        stack.extend(children);
    }
    Ok(())
}

/// Reconcile a with b until both hold `expected`.
async fn reconcile_until(pair: &Pair, expected: &HashSet<Zp>) -> anyhow::Result<usize> {
    reconcile_until_each(pair, expected, expected).await
}

/// Reconcile a with b until a holds `expected_a` and b holds `expected_b`.
async fn reconcile_until_each(
    pair: &Pair,
    expected_a: &HashSet<Zp>,
    expected_b: &HashSet<Zp>,
) -> anyhow::Result<usize> {
    let deadline = tokio::time::Instant::now() + CONVERGENCE_TIMEOUT;
    let mut rounds = 0;
    loop {
        if tokio::time::Instant::now() > deadline {
            bail!("no convergence after {} rounds", rounds);
        }
        match pair.a.peer().initiate_recon(pair.b_addr).await {
            Ok(()) => rounds += 1,
            Err(SyncError::PeerBusy) | Err(SyncError::RemoteRejectedConfig(_)) => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        // b's worker finishes its recovery before b's session releases the tree.
        pair.a.flush().await;
        pair.b.flush().await;
        if &element_set(&pair.a).await? == expected_a && &element_set(&pair.b).await? == expected_b
        {
            return Ok(rounds);
        }
    }
}

#[tokio::test]
async fn test_two_nodes_converge() -> anyhow::Result<()> {
    init_tracing();
    let shared = random_elements(200);
    let only_a = random_elements(250);
    let only_b = random_elements(250);

    let a_elements: Vec<Zp> = shared.iter().chain(&only_a).cloned().collect();
    let b_elements: Vec<Zp> = shared.iter().chain(&only_b).cloned().collect();
    let pair = start_pair(&a_elements, &b_elements).await?;

    let expected: HashSet<Zp> = a_elements.iter().chain(&b_elements).cloned().collect();
    let rounds = reconcile_until(&pair, &expected).await?;
    assert!(rounds >= 1);
    assert_eq!(expected.len(), 700);

    pair.a.stop().await?;
    pair.b.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_one_sided_sync() -> anyhow::Result<()> {
    init_tracing();
    let elements = random_elements(120);
    let pair = start_pair(&elements, &[]).await?;

    let expected: HashSet<Zp> = elements.into_iter().collect();
    reconcile_until(&pair, &expected).await?;
    assert_eq!(element_set(&pair.a).await?, expected);

    pair.a.stop().await?;
    pair.b.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_identical_sets_recover_nothing() -> anyhow::Result<()> {
    init_tracing();
    let elements = random_elements(64);
    let pair = start_pair(&elements, &elements).await?;

    pair.a.peer().initiate_recon(pair.b_addr).await?;
    assert_eq!(pair.a.peer().pending_len(), (0, 0));
    assert_eq!(element_set(&pair.a).await?.len(), 64);

    pair.a.stop().await?;
    pair.b.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_mutations_during_sessions() -> anyhow::Result<()> {
    init_tracing();
    let shared = random_elements(100);
    let only_a = random_elements(60);
    let only_b = random_elements(80);
    let late = random_elements(60);
    let doomed: Vec<Zp> = only_a[..30].to_vec();

    let a_elements: Vec<Zp> = shared.iter().chain(&only_a).cloned().collect();
    let b_elements: Vec<Zp> = shared.iter().chain(&only_b).cloned().collect();
    let pair = Arc::new(start_pair_with(&a_elements, &b_elements, false).await?);

    let writer = tokio::spawn({
        let pair = Arc::clone(&pair);
        let late = late.clone();
        let doomed = doomed.clone();
        async move {
            for (added, removed) in late.chunks(10).zip(doomed.chunks(5)) {
                let added: Vec<String> = added.iter().map(sks_recon::zp_to_digest).collect();
                let removed: Vec<String> = removed.iter().map(sks_recon::zp_to_digest).collect();
                pair.a.digests_changed(&added, &removed)?;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok::<_, ReconError>(())
        }
    });

    for _ in 0..3 {
        match pair.a.peer().initiate_recon(pair.b_addr).await {
            Ok(()) | Err(SyncError::PeerBusy) | Err(SyncError::RemoteRejectedConfig(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    writer.await??;

    // a ends with what it held, what b holds and what was queued for
    // insertion, less what was queued for removal. b never learns from a.
    let doomed: HashSet<Zp> = doomed.into_iter().collect();
    let expected_a: HashSet<Zp> = a_elements
        .iter()
        .chain(&b_elements)
        .chain(&late)
        .filter(|z| !doomed.contains(*z))
        .cloned()
        .collect();
    let expected_b: HashSet<Zp> = b_elements.iter().cloned().collect();
    reconcile_until_each(&pair, &expected_a, &expected_b).await?;

    assert_eq!(pair.a.peer().pending_len(), (0, 0));
    assert_eq!(pair.a.tree().root().await?.size(), expected_a.len());
    assert_eq!(expected_a.len(), 100 + 30 + 80 + 60);
    assert_eq!(pair.b.tree().root().await?.size(), expected_b.len());
    assert_consistent(pair.a.tree()).await?;
    assert_consistent(pair.b.tree()).await?;

    pair.a.stop().await?;
    pair.b.stop().await?;
    Ok(())
}
