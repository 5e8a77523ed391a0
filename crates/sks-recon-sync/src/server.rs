//! Accepting side of a reconciliation session.
//!
//! The server walks its own tree from the root, sending one request per node
//! and pipelining up to `max_outstanding` of them before forcing a flush.
//! Replies arrive in request order, so each one is matched against the oldest
//! outstanding request.

use std::collections::VecDeque;

use sks_recon_core::ZSet;
use sks_recon_store::{PrefixNode, PrefixTree};
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::messages::limits::MAX_REQUEST_QUEUE_LEN;
use crate::messages::ReconMsg;
use crate::settings::SessionTimeouts;
use crate::transport::{Connection, ReconStream};

const ROLE: &str = "serve";

/// An entry awaiting a reply, or the marker for the end of a flushed batch.
#[derive(Debug)]
enum Bottom {
    Request(PrefixNode),
    FlushEnded,
}

/// Server-side session state.
pub struct ServerSession<'a, S> {
    tree: &'a dyn PrefixTree,
    conn: &'a mut Connection<S>,
    timeouts: SessionTimeouts,
    max_outstanding: usize,
    request_q: VecDeque<PrefixNode>,
    bottom_q: VecDeque<Bottom>,
    recovered: ZSet,
    flushing: bool,
}

impl<'a, S: ReconStream> ServerSession<'a, S> {
    pub fn new(
        tree: &'a dyn PrefixTree,
        conn: &'a mut Connection<S>,
        timeouts: SessionTimeouts,
        max_outstanding: usize,
    ) -> Self {
        Self {
            tree,
            conn,
            timeouts,
            max_outstanding,
            request_q: VecDeque::new(),
            bottom_q: VecDeque::new(),
            recovered: ZSet::new(),
            flushing: false,
        }
    }

    /// Reconcile the whole tree, then send `Done`.
    ///
    /// Elements learned before a failure are kept; collect them with
    /// [`into_recovered`](Self::into_recovered) either way.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.interact().await;
        if let Err(e) = self.conn.writer.write_msgs(&[ReconMsg::Done]).await {
            debug!(role = ROLE, error = %e, "failed to send done");
        }
        result
    }

    /// Elements the client holds that we lack.
    pub fn into_recovered(self) -> ZSet {
        self.recovered
    }

    async fn interact(&mut self) -> Result<()> {
        let remote_addr = self.conn.remote_addr();
        debug!(role = ROLE, %remote_addr, "interacting with client");

        let root = self.tree.root().await?;
        self.request_q.push_back(root);

        while !(self.request_q.is_empty() && self.bottom_q.is_empty()) {
            match self.bottom_q.front() {
                None => self.send_next_request().await?,
                Some(Bottom::FlushEnded) => {
                    self.bottom_q.pop_front();
                    self.flushing = false;
                }
                Some(Bottom::Request(_)) => {
                    if let Some(msg) = self.conn.reader.poll_msg(self.timeouts.poll).await? {
                        let node = self.pop_request_bottom()?;
                        self.handle_reply(msg, &node).await?;
                    } else if self.bottom_q.len() > self.max_outstanding
                        || self.request_q.is_empty()
                    {
                        if !self.flushing {
                            self.flush_queue().await?;
                        } else {
                            let node = self.pop_request_bottom()?;
                            let msg = self
                                .conn
                                .reader
                                .read_msg_timeout(self.timeouts.flush_read)
                                .await?;
                            debug!(role = ROLE, %msg, "reply");
                            self.handle_reply(msg, &node).await?;
                        }
                    } else {
                        self.send_next_request().await?;
                    }
                }
            }
        }

        info!(role = ROLE, %remote_addr, recovered = self.recovered.len(), "reconciliation done");
        Ok(())
    }

    fn pop_request_bottom(&mut self) -> Result<PrefixNode> {
        match self.bottom_q.pop_front() {
            Some(Bottom::Request(node)) => Ok(node),
            other => Err(SyncError::UnexpectedMessage(format!(
                "reply without outstanding request: {:?}",
                other
            ))),
        }
    }

    async fn send_next_request(&mut self) -> Result<()> {
        let node = self
            .request_q
            .pop_front()
            .ok_or_else(|| SyncError::UnexpectedMessage("empty request queue".into()))?;

        let msg = if node.is_leaf() || node.size() < self.tree.config().mbar {
            let elements = self.tree.elements(&node).await?;
            ReconMsg::ReconRqstFull {
                prefix: node.key().clone(),
                elements: elements.into_iter().collect(),
            }
        } else {
            ReconMsg::ReconRqstPoly {
                prefix: node.key().clone(),
                size: node.size(),
                samples: node.svalues().to_vec(),
            }
        };
        debug!(role = ROLE, %msg, "send request");
        self.conn.writer.push(&msg)?;
        self.bottom_q.push_back(Bottom::Request(node));
        Ok(())
    }

    async fn handle_reply(&mut self, msg: ReconMsg, node: &PrefixNode) -> Result<()> {
        debug!(role = ROLE, %msg, key = %node.key(), "handle reply");
        match msg {
            ReconMsg::SyncFail => {
                if node.is_leaf() {
                    return Err(SyncError::UnexpectedMessage(
                        "SyncFail received at leaf node".into(),
                    ));
                }
                let children = self.tree.children(node).await?;
                for (i, child) in children.into_iter().enumerate() {
                    if i == 0 {
                        self.request_q.push_back(child);
                    } else if self.request_q.len() < MAX_REQUEST_QUEUE_LEN {
                        self.request_q.push_front(child);
                    }
                }
            }
            ReconMsg::Elements(zs) => self.recovered.add_all(&zs),
            ReconMsg::FullElements(remote) => {
                let local: ZSet = self.tree.elements(node).await?.into_iter().collect();
                let local_needs = remote.difference(&local);
                let remote_needs = local.difference(&remote);
                self.conn.writer.push(&ReconMsg::Elements(remote_needs))?;
                self.recovered.add_all(&local_needs);
            }
            ReconMsg::Error(text) => return Err(SyncError::PeerError(text)),
            other => {
                return Err(SyncError::UnexpectedMessage(other.to_string()));
            }
        }
        Ok(())
    }

    async fn flush_queue(&mut self) -> Result<()> {
        debug!(role = ROLE, "flush queue");
        self.conn.writer.push(&ReconMsg::Flush)?;
        self.conn.writer.flush().await?;
        self.bottom_q.push_back(Bottom::FlushEnded);
        self.flushing = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::loopback_pair;
    use sks_recon_core::{p_sks, Zp};
    use sks_recon_store::{MemPrefixTree, PTreeConfig};

    fn zs(ns: &[i64]) -> Vec<Zp> {
        let p = p_sks();
        ns.iter().map(|n| Zp::from_i64(&p, *n)).collect()
    }

    #[tokio::test]
    async fn test_small_tree_sends_full_request() {
        let tree = MemPrefixTree::new(PTreeConfig::default());
        for z in zs(&[100, 200, 300]) {
            tree.insert(&z).await.unwrap();
        }
        let (mut server_conn, mut client) = loopback_pair();

        let client_side = async {
            let request = client.reader.read_msg().await.unwrap();
            let ReconMsg::ReconRqstFull { prefix, elements } = request else {
                panic!("expected full request, got {}", request);
            };
            assert!(prefix.is_empty());
            assert_eq!(elements.len(), 3);
            assert_eq!(client.reader.read_msg().await.unwrap(), ReconMsg::Flush);

            // We hold 200 and 400.
            let ours: ZSet = zs(&[200, 400]).into_iter().collect();
            client
                .writer
                .write_msgs(&[ReconMsg::FullElements(ours)])
                .await
                .unwrap();

            let reply = client.reader.read_msg().await.unwrap();
            assert_eq!(
                reply,
                ReconMsg::Elements(zs(&[100, 300]).into_iter().collect())
            );
            assert_eq!(client.reader.read_msg().await.unwrap(), ReconMsg::Done);
        };

        let server_side = async {
            let mut session =
                ServerSession::new(&tree, &mut server_conn, SessionTimeouts::default(), 100);
            session.run().await.unwrap();
            session.into_recovered()
        };

        let ((), recovered) = tokio::join!(client_side, server_side);
        assert_eq!(recovered.items(), zs(&[400]));
    }

    #[tokio::test]
    async fn test_sync_fail_at_leaf_is_an_error() {
        let tree = MemPrefixTree::new(PTreeConfig::default());
        let (mut server_conn, mut client) = loopback_pair();

        let client_side = async {
            client.reader.read_msg().await.unwrap();
            client.reader.read_msg().await.unwrap();
            client
                .writer
                .write_msgs(&[ReconMsg::SyncFail])
                .await
                .unwrap();
            assert_eq!(client.reader.read_msg().await.unwrap(), ReconMsg::Done);
        };
        let server_side = async {
            let mut session =
                ServerSession::new(&tree, &mut server_conn, SessionTimeouts::default(), 100);
            session.run().await
        };

        let ((), result) = tokio::join!(client_side, server_side);
        assert!(matches!(result, Err(SyncError::UnexpectedMessage(_))));
    }

    #[tokio::test]
    async fn test_sync_fail_pushes_children() {
        let config = PTreeConfig::default();
        let tree = MemPrefixTree::new(config);
        let p = p_sks();
        for i in 0..(config.split_threshold() as i64 + 20) {
            tree.insert(&Zp::from_i64(&p, 1_000 + i * 7919)).await.unwrap();
        }
        let root = tree.root().await.unwrap();
        assert!(!root.is_leaf());

        let (mut server_conn, mut client) = loopback_pair();
        let client_side = async {
            let first = client.reader.read_msg().await.unwrap();
            assert!(matches!(first, ReconMsg::ReconRqstPoly { .. }));
            assert_eq!(client.reader.read_msg().await.unwrap(), ReconMsg::Flush);
            client
                .writer
                .write_msgs(&[ReconMsg::SyncFail])
                .await
                .unwrap();

            // One request per child, highest index first, child 0 last.
            let mut prefixes = Vec::new();
            loop {
                match client.reader.read_msg().await.unwrap() {
                    ReconMsg::ReconRqstPoly { prefix, .. }
                    | ReconMsg::ReconRqstFull { prefix, .. } => prefixes.push(prefix),
                    ReconMsg::Flush => break,
                    other => panic!("unexpected {}", other),
                }
            }
            let empty = ZSet::new();
            let replies: Vec<_> = prefixes
                .iter()
                .map(|_| ReconMsg::Elements(empty.clone()))
                .collect();
            client.writer.write_msgs(&replies).await.unwrap();
            assert_eq!(client.reader.read_msg().await.unwrap(), ReconMsg::Done);
            prefixes
        };
        let server_side = async {
            let mut session =
                ServerSession::new(&tree, &mut server_conn, SessionTimeouts::default(), 100);
            session.run().await
        };

        let (prefixes, result) = tokio::join!(client_side, server_side);
        result.unwrap();
        let indexes: Vec<usize> = prefixes
            .iter()
            .map(|key| sks_recon_store::next_child(key, 0, config.bit_quantum))
            .collect();
        assert_eq!(indexes, vec![3, 2, 1, 0]);
    }
}
