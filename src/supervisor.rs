//! Session supervisor
//!
//! Opens, restores, and tears down the fleet of per-phone relay sessions,
//! and re-establishes the bot's own primary connection. Live handles are
//! owned exclusively here and never survive a process restart; the persisted
//! registry records which phones to bring back on the next restore pass.

use crate::error::{Error, Result};
use crate::relay::{RelayConnector, RelaySession};
use crate::sessions::SessionRegistry;
use crate::transport::BotTransport;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one restore pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub failed: usize,
    pub already_live: usize,
    pub total: usize,
}

/// Outcome of the administrative cleanup.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub sessions_removed: usize,
    pub artifacts_deleted: usize,
}

pub struct SessionSupervisor {
    registry: SessionRegistry,
    connector: Arc<dyn RelayConnector>,
    credentials_dir: PathBuf,
    live: HashMap<String, Box<dyn RelaySession>>,
}

impl SessionSupervisor {
    pub fn new(
        registry: SessionRegistry,
        connector: Arc<dyn RelayConnector>,
        credentials_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            connector,
            credentials_dir,
            live: HashMap::new(),
        }
    }

    pub fn credential_path(&self, phone: &str) -> PathBuf {
        self.credentials_dir.join(format!("relay_{}.session", phone))
    }

    /// Re-open every session whose last persisted state was connected.
    ///
    /// Safe to call repeatedly: a descriptor that already has a live handle
    /// is skipped, never double-opened. One bad credential never aborts the
    /// pass; the failed phone is marked disconnected and picked up again
    /// only by a later repair cycle.
    pub async fn restore_all(&mut self) -> RestoreReport {
        let phones = self.registry.connected_phones();
        let mut report = RestoreReport {
            total: phones.len(),
            ..Default::default()
        };

        for phone in phones {
            if let Some(session) = self.live.get_mut(&phone) {
                if session.is_alive().await {
                    debug!("Session {} already live, skipping", phone);
                    report.already_live += 1;
                    continue;
                }
                // Stale handle from a dead client; drop it and reopen
                self.live.remove(&phone);
            }

            match self.restore_one(&phone).await {
                Ok(()) => {
                    info!("Session restored: {}", phone);
                    report.restored += 1;
                }
                Err(e) => {
                    warn!("Failed to restore session {}: {}", phone, e);
                    report.failed += 1;
                    if let Err(e) = self.registry.mark_connected(&phone, false).await {
                        warn!("Failed to persist disconnect for {}: {}", phone, e);
                    }
                }
            }
        }

        report
    }

    async fn restore_one(&mut self, phone: &str) -> Result<()> {
        let credential = self.credential_path(phone);
        if !credential.exists() {
            return Err(Error::Relay(format!(
                "missing credential artifact for {}",
                phone
            )));
        }

        let mut session = self.connector.open(phone, &credential).await?;

        if let Err(e) = session.install_redirections().await {
            let _ = session.close().await;
            return Err(e);
        }

        self.registry.mark_connected(phone, true).await?;
        self.live.insert(phone.to_string(), session);
        Ok(())
    }

    /// Re-establish the bot's own primary connection if it is down.
    ///
    /// Returns true when a reconnect was actually performed; a call while
    /// the primary is live is a no-op.
    pub async fn reconnect_primary(&self, transport: &dyn BotTransport) -> Result<bool> {
        if transport.is_connected().await {
            debug!("Primary connection already live");
            return Ok(false);
        }
        info!("Primary connection down, reconnecting");
        transport.connect().await?;
        Ok(true)
    }

    /// Close every live handle best-effort with a bounded wait per session.
    ///
    /// Persisted `connected` flags are left untouched so the next
    /// `restore_all` attempts the same set again.
    pub async fn teardown_all(&mut self, grace: Duration) {
        for (phone, mut session) in self.live.drain() {
            match tokio::time::timeout(grace, session.close()).await {
                Ok(Ok(())) => debug!("Session {} closed", phone),
                Ok(Err(e)) => warn!("Session {} close failed: {}", phone, e),
                Err(_) => warn!("Session {} close timed out", phone),
            }
        }
    }

    /// Administrative cleanup: close everything, drop all descriptors, and
    /// delete the credential artifacts.
    pub async fn cleanup(&mut self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        for (phone, mut session) in self.live.drain() {
            if let Err(e) = session.close().await {
                warn!("Session {} close during cleanup: {}", phone, e);
            }
        }

        let phones: Vec<String> = self.registry.all().keys().cloned().collect();
        for phone in phones {
            if self.registry.remove(&phone).await?.is_some() {
                report.sessions_removed += 1;
            }
            let credential = self.credential_path(&phone);
            match std::fs::remove_file(&credential) {
                Ok(()) => report.artifacts_deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete credential for {}: {}", phone, e),
            }
        }

        Ok(report)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SessionRegistry {
        &mut self.registry
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Whether the relay subsystem has at least one live session.
    pub fn is_active(&self) -> bool {
        !self.live.is_empty()
    }
}
