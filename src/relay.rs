//! Relay session clients
//!
//! The secondary per-phone connections are driven by an external relay
//! client, one process per linked phone number. The supervisor only sees the
//! `RelayConnector`/`RelaySession` seam, so the wire client can be swapped
//! without touching restore/teardown logic.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Opens an authorized session for a phone number from its stored
/// credential artifact.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn open(&self, phone: &str, credential: &Path) -> Result<Box<dyn RelaySession>>;
}

/// One live, authorized relay connection.
#[async_trait]
pub trait RelaySession: Send + Sync {
    fn phone_number(&self) -> &str;

    /// Attach the message-redirection hooks. Called once per restore; a
    /// failure here counts as a failed restore.
    async fn install_redirections(&mut self) -> Result<()>;

    /// Whether the underlying connection is still up.
    async fn is_alive(&mut self) -> bool;

    async fn close(&mut self) -> Result<()>;
}

/// Production connector: spawns the configured relay client binary with the
/// phone number and its credential artifact.
pub struct ProcessConnector {
    client_bin: PathBuf,
}

impl ProcessConnector {
    pub fn new(client_bin: PathBuf) -> Self {
        Self { client_bin }
    }
}

#[async_trait]
impl RelayConnector for ProcessConnector {
    async fn open(&self, phone: &str, credential: &Path) -> Result<Box<dyn RelaySession>> {
        let child = Command::new(&self.client_bin)
            .arg("--phone")
            .arg(phone)
            .arg("--session")
            .arg(credential)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Relay(format!("spawn relay client for {}: {}", phone, e)))?;

        let mut session = ProcessSession {
            phone: phone.to_string(),
            child,
        };

        // An immediate exit means the artifact is unusable (revoked or
        // corrupt authorization); surface it as a failed open.
        tokio::time::sleep(Duration::from_millis(200)).await;
        if !session.is_alive().await {
            return Err(Error::Relay(format!(
                "relay client for {} exited during authorization",
                phone
            )));
        }

        debug!("Relay client started for {}", phone);
        Ok(Box::new(session))
    }
}

struct ProcessSession {
    phone: String,
    child: Child,
}

#[async_trait]
impl RelaySession for ProcessSession {
    fn phone_number(&self) -> &str {
        &self.phone
    }

    async fn install_redirections(&mut self) -> Result<()> {
        // The client process wires its own redirection handlers at startup;
        // this just confirms it survived long enough to do so.
        if self.is_alive().await {
            Ok(())
        } else {
            Err(Error::Relay(format!(
                "relay client for {} died before installing redirections",
                self.phone
            )))
        }
    }

    async fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn close(&mut self) -> Result<()> {
        if let Err(e) = self.child.start_kill() {
            // Already gone is fine
            debug!("Relay client {} kill: {}", self.phone, e);
            return Ok(());
        }
        if let Err(e) = self.child.wait().await {
            warn!("Relay client {} did not reap cleanly: {}", self.phone, e);
        }
        Ok(())
    }
}
