//! Initiating (gossip) side of a reconciliation session.
//!
//! The client answers the server's requests against its own tree. Replies
//! are held back until the server sends `Flush`.

use sks_recon_core::{reconcile, CoreError, ZSet, Zp};
use sks_recon_store::PrefixTree;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::messages::limits::MAX_RECOVER_SIZE;
use crate::messages::ReconMsg;
use crate::settings::SessionTimeouts;
use crate::transport::{Connection, ReconStream};

const ROLE: &str = "gossip";

/// What one server message contributes to the session.
#[derive(Debug, Default)]
struct Step {
    elements: ZSet,
    messages: Vec<ReconMsg>,
    flush: bool,
    done: bool,
}

impl Step {
    fn reply(elements: ZSet, msg: ReconMsg) -> Self {
        Self {
            elements,
            messages: vec![msg],
            ..Self::default()
        }
    }
}

/// Client-side session state.
pub struct ClientSession<'a, S> {
    tree: &'a dyn PrefixTree,
    conn: &'a mut Connection<S>,
    timeouts: SessionTimeouts,
    pending: Vec<ReconMsg>,
    recovered: ZSet,
}

impl<'a, S: ReconStream> ClientSession<'a, S> {
    pub fn new(
        tree: &'a dyn PrefixTree,
        conn: &'a mut Connection<S>,
        timeouts: SessionTimeouts,
    ) -> Self {
        Self {
            tree,
            conn,
            timeouts,
            pending: Vec::new(),
            recovered: ZSet::new(),
        }
    }

    /// Answer requests until the server is done or enough elements have
    /// been recovered.
    ///
    /// A failed step is reported to the server with an `Error` message and
    /// ends the session.
    pub async fn run(&mut self) -> Result<()> {
        let remote_addr = self.conn.remote_addr();
        while self.recovered.len() < MAX_RECOVER_SIZE {
            let msg = self.conn.reader.read_msg_timeout(self.timeouts.read).await?;
            debug!(role = ROLE, %remote_addr, %msg, "interact");

            let step = match self.handle(msg).await {
                Ok(step) => step,
                Err(e) => {
                    let report = ReconMsg::Error(e.to_string());
                    if let Err(write_err) = self.conn.writer.write_msgs(&[report]).await {
                        debug!(role = ROLE, error = %write_err, "failed to report step error");
                    }
                    return Err(e);
                }
            };

            if step.done {
                info!(role = ROLE, %remote_addr, recovered = self.recovered.len(), "reconciliation done");
                return Ok(());
            }

            self.pending.extend(step.messages);
            if step.flush {
                let pending = std::mem::take(&mut self.pending);
                self.conn.writer.write_msgs(&pending).await?;
            }
            self.recovered.add_all(&step.elements);
        }
        info!(role = ROLE, %remote_addr, recovered = self.recovered.len(), "recover limit reached");
        Ok(())
    }

    /// Elements the server holds that we lack.
    pub fn into_recovered(self) -> ZSet {
        self.recovered
    }

    async fn handle(&mut self, msg: ReconMsg) -> Result<Step> {
        match msg {
            ReconMsg::ReconRqstPoly {
                prefix,
                size,
                samples,
            } => {
                let node = self.tree.node(&prefix).await?;
                self.handle_poly(&node, size, &samples).await
            }
            ReconMsg::ReconRqstFull { prefix, elements } => {
                let node = self.tree.node(&prefix).await?;
                let local: ZSet = self.tree.elements(&node).await?.into_iter().collect();
                let local_needs = elements.difference(&local);
                let remote_needs = local.difference(&elements);
                debug!(
                    role = ROLE,
                    local_needs = local_needs.len(),
                    remote_needs = remote_needs.len(),
                    "full request"
                );
                Ok(Step::reply(local_needs, ReconMsg::Elements(remote_needs)))
            }
            ReconMsg::Elements(zs) => Ok(Step {
                elements: zs,
                ..Step::default()
            }),
            ReconMsg::Flush => Ok(Step {
                flush: true,
                ..Step::default()
            }),
            ReconMsg::Done => Ok(Step {
                done: true,
                ..Step::default()
            }),
            ReconMsg::Error(text) => Err(SyncError::PeerError(text)),
            other => Err(SyncError::UnexpectedMessage(other.to_string())),
        }
    }

    async fn handle_poly(
        &self,
        node: &sks_recon_store::PrefixNode,
        remote_size: usize,
        remote_samples: &[Zp],
    ) -> Result<Step> {
        let points = self.tree.points();
        let local_samples = node.svalues();
        if remote_samples.len() != points.len() {
            return Err(SyncError::UnexpectedMessage(format!(
                "expected {} samples, got {}",
                points.len(),
                remote_samples.len()
            )));
        }

        let values = remote_samples
            .iter()
            .zip(local_samples)
            .map(|(remote, local)| {
                local
                    .inv()
                    .map(|inv| remote * inv)
                    .ok_or(CoreError::ZeroDivisor)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let deg_diff = remote_size as i64 - node.size() as i64;

        match reconcile(&values, points, deg_diff) {
            Ok((remote_only, local_only)) => {
                debug!(
                    role = ROLE,
                    remote_only = remote_only.len(),
                    local_only = local_only.len(),
                    "poly request solved"
                );
                Ok(Step::reply(remote_only, ReconMsg::Elements(local_only)))
            }
            Err(CoreError::LowMBar) => {
                let config = self.tree.config();
                if node.is_leaf() || node.size() < config.thresh_mult * config.mbar {
                    debug!(role = ROLE, key = %node.key(), "low MBar, sending full elements");
                    let elements: ZSet = self.tree.elements(node).await?.into_iter().collect();
                    Ok(Step::reply(ZSet::new(), ReconMsg::FullElements(elements)))
                } else {
                    debug!(
                        role = ROLE,
                        key = %node.key(),
                        size = node.size(),
                        "low MBar, sending SyncFail"
                    );
                    Ok(Step::reply(ZSet::new(), ReconMsg::SyncFail))
                }
            }
            Err(e) => {
                debug!(role = ROLE, error = %e, "poly request failed, sending SyncFail");
                Ok(Step::reply(ZSet::new(), ReconMsg::SyncFail))
            }
        }
    }
}
