//! Elements recovered from a remote peer, handed to the application.

use std::fmt;
use std::net::SocketAddr;

use sks_recon_core::Zp;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, SyncError};
use crate::messages::Config;
use crate::settings::join_host_port;

/// One reconciliation outcome: elements the remote holds and we lack.
///
/// The consumer fetches the elements, then calls [`Recover::complete`]. The
/// session that produced it waits for completion before releasing the tree.
#[derive(Debug)]
pub struct Recover {
    pub remote_addr: SocketAddr,
    pub remote_config: Config,
    pub remote_elements: Vec<Zp>,
    done: Option<oneshot::Sender<()>>,
}

impl Recover {
    /// Create a recovery and the receiver that resolves on completion.
    pub fn new(
        remote_addr: SocketAddr,
        remote_config: Config,
        remote_elements: Vec<Zp>,
    ) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                remote_addr,
                remote_config,
                remote_elements,
                done: Some(tx),
            },
            rx,
        )
    }

    /// Address of the remote's HTTP key service.
    ///
    /// Fails if the remote advertised a port outside the TCP range.
    pub fn hkp_addr(&self) -> Result<String> {
        let http_port = self.remote_config.http_port;
        let port = u16::try_from(http_port).map_err(|_| SyncError::InvalidHttpPort(http_port))?;
        Ok(join_host_port(&self.remote_addr.ip().to_string(), port))
    }

    /// Signal that the elements have been handled.
    pub fn complete(mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

impl Drop for Recover {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

impl fmt::Display for Recover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} elements",
            self.remote_addr,
            self.remote_elements.len()
        )
    }
}

/// Producer side of the recovery channel.
pub type RecoverSender = mpsc::Sender<Recover>;

/// Consumer side of the recovery channel.
pub type RecoverChan = mpsc::Receiver<Recover>;

#[cfg(test)]
mod tests {
    use super::*;
    use sks_recon_core::p_sks;

    fn config(http_port: u32) -> Config {
        Config {
            http_port,
            ..Config::default()
        }
    }

    #[test]
    fn test_hkp_addr() {
        let (r, _) = Recover::new("10.0.0.5:11370".parse().unwrap(), config(11371), vec![]);
        assert_eq!(r.hkp_addr().unwrap(), "10.0.0.5:11371");

        let (r, _) = Recover::new("[2001:db8::1]:11370".parse().unwrap(), config(80), vec![]);
        assert_eq!(r.hkp_addr().unwrap(), "[2001:db8::1]:80");

        let (r, _) = Recover::new("10.0.0.5:11370".parse().unwrap(), config(65535), vec![]);
        assert_eq!(r.hkp_addr().unwrap(), "10.0.0.5:65535");
    }

    #[test]
    fn test_hkp_addr_rejects_out_of_range_port() {
        let (r, _) = Recover::new("10.0.0.5:11370".parse().unwrap(), config(70000), vec![]);
        assert!(matches!(r.hkp_addr(), Err(SyncError::InvalidHttpPort(70000))));

        let (r, _) = Recover::new("10.0.0.5:11370".parse().unwrap(), config(65536), vec![]);
        assert!(matches!(r.hkp_addr(), Err(SyncError::InvalidHttpPort(65536))));
    }

    #[tokio::test]
    async fn test_complete_signals_done() {
        let p = p_sks();
        let (r, done) = Recover::new(
            "127.0.0.1:1".parse().unwrap(),
            config(1),
            vec![Zp::from_i64(&p, 3)],
        );
        assert_eq!(r.to_string(), "127.0.0.1:1: 1 elements");
        r.complete();
        done.await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_signals_done() {
        let (r, done) = Recover::new("127.0.0.1:1".parse().unwrap(), config(1), vec![]);
        drop(r);
        done.await.unwrap();
    }
}
