//! Configuration exchange at the start of every session.
//!
//! Both sides send their [`Config`] and read the remote's at the same time.
//! Each then checks tree geometry and answers with a bare `passed` status, or
//! `failed` followed by a reason. The statuses are unframed strings.

use tracing::{debug, error, warn};

use crate::error::{Result, SyncError};
use crate::messages::{Config, ReconMsg, CONFIG_FAILED, CONFIG_PASSED};
use crate::settings::SessionTimeouts;
use crate::transport::{Connection, ReconStream};

/// Exchange configurations and agree to reconcile.
///
/// `fail_resp` rejects the remote regardless of its configuration, e.g.
/// because the local tree is busy. Returns the remote configuration.
pub async fn exchange_config<S: ReconStream>(
    conn: &mut Connection<S>,
    local: &Config,
    fail_resp: Option<&str>,
    timeouts: &SessionTimeouts,
    role: &'static str,
) -> Result<Config> {
    let remote_addr = conn.remote_addr();
    let remote = read_remote_config(conn, local, timeouts).await?;
    debug!(role, %remote_addr, remote_config = %remote, "remote config");

    let reason = match fail_resp {
        Some(reason) => Some(reason.to_string()),
        None => check_compatible(local, &remote, role),
    };

    if let Some(reason) = reason {
        send_rejection(conn, &reason, timeouts, role).await;
        return Err(SyncError::ConfigRejected(reason));
    }

    ack_config(conn, timeouts).await?;
    Ok(remote)
}

async fn read_remote_config<S: ReconStream>(
    conn: &mut Connection<S>,
    local: &Config,
    timeouts: &SessionTimeouts,
) -> Result<Config> {
    let (reader, writer) = (&mut conn.reader, &mut conn.writer);
    let ours = ReconMsg::Config(local.clone());
    let (_, theirs) = tokio::try_join!(
        writer.write_msgs(std::slice::from_ref(&ours)),
        reader.read_msg_timeout(timeouts.read),
    )?;
    match theirs {
        ReconMsg::Config(config) => Ok(config),
        other => Err(SyncError::UnexpectedMessage(format!(
            "expected remote config, got {}",
            other
        ))),
    }
}

fn check_compatible(local: &Config, remote: &Config, role: &'static str) -> Option<String> {
    if remote.bit_quantum != local.bit_quantum {
        error!(
            role,
            remote_bit_quantum = remote.bit_quantum,
            local_bit_quantum = local.bit_quantum,
            "mismatched BitQuantum values"
        );
        return Some("mismatched bitquantum".to_string());
    }
    if remote.mbar != local.mbar {
        error!(
            role,
            remote_mbar = remote.mbar,
            local_mbar = local.mbar,
            "mismatched MBar"
        );
        return Some("mismatched mbar".to_string());
    }
    None
}

async fn send_rejection<S: ReconStream>(
    conn: &mut Connection<S>,
    reason: &str,
    timeouts: &SessionTimeouts,
    role: &'static str,
) {
    let writer = &mut conn.writer;
    let result = async {
        writer.push_string(CONFIG_FAILED)?;
        writer.push_string(reason)?;
        tokio::time::timeout(timeouts.config_fail_write, writer.flush()).await?
    }
    .await;
    if let Err(e) = result {
        warn!(role, remote_addr = %conn.remote_addr(), error = %e, "failed to send config rejection");
    }
}

/// Send our `passed` status and read the remote's.
///
/// A remote that rejected us may close before our status is written, so
/// its status is read regardless and a rejection takes precedence over our
/// own write error.
async fn ack_config<S: ReconStream>(
    conn: &mut Connection<S>,
    timeouts: &SessionTimeouts,
) -> Result<()> {
    let (reader, writer) = (&mut conn.reader, &mut conn.writer);
    let send = async {
        writer.push_string(CONFIG_PASSED)?;
        writer.flush().await
    };
    let recv = async {
        let status = tokio::time::timeout(timeouts.read, reader.read_string()).await??;
        if status == CONFIG_PASSED {
            return Ok(());
        }
        match tokio::time::timeout(timeouts.read, reader.read_string()).await {
            Ok(Ok(reason)) => Err(SyncError::RemoteRejectedConfig(reason)),
            Ok(Err(e)) => Err(SyncError::RemoteRejectedConfig(e.to_string())),
            Err(e) => Err(SyncError::RemoteRejectedConfig(e.to_string())),
        }
    };
    let (sent, status) = tokio::join!(send, recv);
    status?;
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::BUSY_RESPONSE;
    use crate::transport::memory::loopback_pair;

    fn config(bit_quantum: u32, mbar: u32) -> Config {
        Config {
            version: "1.1.6".into(),
            http_port: 11371,
            bit_quantum,
            mbar,
            filters: "yminsky.dedup,yminsky.merge".into(),
            custom: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_compatible_configs() {
        let (mut a, mut b) = loopback_pair();
        let timeouts = SessionTimeouts::default();
        let ca = config(2, 5);
        let mut cb = config(2, 5);
        cb.http_port = 8080;

        let (ra, rb) = tokio::join!(
            exchange_config(&mut a, &ca, None, &timeouts, "gossip"),
            exchange_config(&mut b, &cb, None, &timeouts, "serve"),
        );
        assert_eq!(ra.unwrap().http_port, 8080);
        assert_eq!(rb.unwrap().http_port, 11371);

        // Both connections remain usable for framed messages.
        a.writer.write_msgs(&[ReconMsg::Done]).await.unwrap();
        assert_eq!(b.reader.read_msg().await.unwrap(), ReconMsg::Done);
    }

    #[tokio::test]
    async fn test_mismatched_mbar() {
        let (mut a, mut b) = loopback_pair();
        let timeouts = SessionTimeouts::default();
        let (ca, cb) = (config(2, 5), config(2, 6));
        let (ra, rb) = tokio::join!(
            exchange_config(&mut a, &ca, None, &timeouts, "gossip"),
            exchange_config(&mut b, &cb, None, &timeouts, "serve"),
        );
        assert!(matches!(ra, Err(SyncError::ConfigRejected(ref r)) if r == "mismatched mbar"));
        assert!(matches!(rb, Err(SyncError::ConfigRejected(ref r)) if r == "mismatched mbar"));
    }

    #[tokio::test]
    async fn test_busy_server_is_reported_to_client() {
        let (mut a, mut b) = loopback_pair();
        let timeouts = SessionTimeouts::default();
        let (ca, cb) = (config(2, 5), config(2, 5));
        let (ra, rb) = tokio::join!(
            exchange_config(&mut a, &ca, None, &timeouts, "gossip"),
            exchange_config(&mut b, &cb, Some(BUSY_RESPONSE), &timeouts, "serve"),
        );
        assert!(matches!(ra, Err(SyncError::RemoteRejectedConfig(ref r)) if r == BUSY_RESPONSE));
        assert!(matches!(rb, Err(SyncError::ConfigRejected(_))));
    }

    #[tokio::test]
    async fn test_rejection_survives_closed_connection() {
        let (mut a, b) = loopback_pair();
        let timeouts = SessionTimeouts::default();
        let ca = config(2, 5);
        let server = async move {
            let mut b = b;
            let cb = config(2, 5);
            let result = exchange_config(&mut b, &cb, Some(BUSY_RESPONSE), &timeouts, "serve").await;
            // Closing here makes the client's own status write fail.
            drop(b);
            result
        };
        let (ra, rb) = tokio::join!(
            exchange_config(&mut a, &ca, None, &timeouts, "gossip"),
            server,
        );
        assert!(matches!(rb, Err(SyncError::ConfigRejected(_))));
        assert!(matches!(ra, Err(SyncError::RemoteRejectedConfig(ref r)) if r == BUSY_RESPONSE));
    }

    #[tokio::test]
    async fn test_non_config_first_message() {
        let (mut a, mut b) = loopback_pair();
        let timeouts = SessionTimeouts::default();
        let ca = config(2, 5);
        let done = [ReconMsg::Done];
        let (ra, _) = tokio::join!(
            exchange_config(&mut a, &ca, None, &timeouts, "gossip"),
            b.writer.write_msgs(&done),
        );
        assert!(matches!(ra, Err(SyncError::UnexpectedMessage(_))));
    }
}
