//! Daemon event loop
//!
//! One task owns every piece of mutable core state: the license store, the
//! session registry and its live handles, and the reactivation counter. Bot
//! events, gateway commands, and the watchdog ticker all converge here, so
//! per-user and per-phone operations are naturally serialized.

use crate::commands::{self, Command};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gateway::{self, AppState, StatusSnapshot};
use crate::license::LicenseManager;
use crate::payment::{self, CallbackAction};
use crate::relay::ProcessConnector;
use crate::sessions::SessionRegistry;
use crate::supervisor::SessionSupervisor;
use crate::transport::{BotEvent, BotTransport, Button, TelegramBot};
use crate::users::{Plan, UserStore};
use crate::watchdog::{self, ReactivationState, RepairReport};
use chrono::Utc;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Mutating requests handed to the event loop from other tasks.
#[derive(Debug)]
pub enum LoopCommand {
    Reactivate {
        reply: oneshot::Sender<RepairReport>,
    },
}

pub struct BotDaemon {
    config: Config,
    transport: Arc<dyn BotTransport>,
    licenses: LicenseManager,
    relays: SessionSupervisor,
    reactivation: ReactivationState,
    primary_connected: bool,
    snapshot_tx: watch::Sender<StatusSnapshot>,
}

impl BotDaemon {
    pub fn new(
        config: Config,
        transport: Arc<dyn BotTransport>,
        licenses: LicenseManager,
        relays: SessionSupervisor,
    ) -> (Self, watch::Receiver<StatusSnapshot>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(StatusSnapshot::starting());
        let daemon = Self {
            config,
            transport,
            licenses,
            relays,
            reactivation: ReactivationState::default(),
            primary_connected: false,
            snapshot_tx,
        };
        (daemon, snapshot_rx)
    }

    /// Establish the primary connection and bring persisted sessions back.
    /// A dead primary at boot is fatal: the process must not serve traffic.
    pub async fn bootstrap(&mut self) -> Result<()> {
        self.transport
            .connect()
            .await
            .map_err(|e| Error::FatalInit(format!("primary connection failed: {}", e)))?;
        self.primary_connected = true;

        let report = self.relays.restore_all().await;
        info!(
            "Boot restore: {}/{} sessions ({} failed)",
            report.restored, report.total, report.failed
        );

        self.publish_snapshot();
        Ok(())
    }

    /// Drive the event loop until shutdown.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<BotEvent>,
        mut commands: mpsc::Receiver<LoopCommand>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.watchdog_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // immediate first tick; boot already checked

        loop {
            tokio::select! {
                maybe_event = events.recv() => match maybe_event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("Transport event stream closed");
                        break;
                    }
                },
                maybe_command = commands.recv() => match maybe_command {
                    Some(LoopCommand::Reactivate { reply }) => {
                        let report = self.repair_cycle().await;
                        let _ = reply.send(report);
                    }
                    None => break,
                },
                _ = ticker.tick() => self.on_tick().await,
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    break;
                }
            }

            self.publish_snapshot();
        }

        self.relays.teardown_all(self.config.teardown_grace()).await;
        info!("Daemon stopped");
        Ok(())
    }

    // ========================================================================
    // Event handling
    // ========================================================================

    pub async fn handle_event(&mut self, event: BotEvent) {
        match event {
            BotEvent::Message { sender_id, text } => {
                self.handle_message(&sender_id, &text).await;
            }
            BotEvent::Callback {
                sender_id,
                callback_id,
                payload,
            } => {
                self.handle_callback(&sender_id, &callback_id, &payload)
                    .await;
            }
        }
    }

    async fn handle_message(&mut self, sender_id: &str, text: &str) {
        if watchdog::is_reactivation_trigger(text) {
            if !self.is_admin(sender_id) {
                warn!("Ignoring reactivation trigger from non-admin {}", sender_id);
                return;
            }
            self.send_best_effort(sender_id, "ok").await;
            let report = self.repair_cycle().await;
            self.notify_admin_repair(&report).await;
            return;
        }

        let Some(command) = commands::parse(text) else {
            debug!("Ignoring non-command message from {}", sender_id);
            return;
        };

        if let Err(e) = self.handle_command(sender_id, command).await {
            error!("Command from {} failed: {}", sender_id, e);
            self.send_best_effort(sender_id, "❌ Erreur technique. Réessayez /status pour vérifier votre état.")
                .await;
        }
    }

    async fn handle_command(&mut self, sender_id: &str, command: Command) -> Result<()> {
        match command {
            Command::Start => {
                self.licenses.register_new_user(sender_id).await?;
                self.licenses.mark_contacted(sender_id).await?;

                let text = if self.licenses.check_access(sender_id) {
                    commands::welcome_text()
                } else {
                    commands::access_expired_text()
                };
                self.send_best_effort(sender_id, &text).await;
            }

            Command::Menu => {
                self.licenses.register_new_user(sender_id).await?;
                self.licenses.mark_contacted(sender_id).await?;

                if !self.licenses.check_access(sender_id) {
                    self.send_best_effort(sender_id, &commands::access_expired_text())
                        .await;
                } else {
                    self.send_best_effort(sender_id, &commands::welcome_text())
                        .await;
                }
            }

            Command::Help => {
                let text = commands::help_text(self.is_admin(sender_id));
                self.send_best_effort(sender_id, &text).await;
            }

            Command::Pronostics => {
                if !self.licenses.check_access(sender_id) {
                    self.send_best_effort(sender_id, &commands::access_expired_text())
                        .await;
                } else {
                    self.send_best_effort(
                        sender_id,
                        &format!(
                            "⚽ *Pronostics du jour - {}*",
                            Utc::now().format("%d/%m/%Y")
                        ),
                    )
                    .await;
                }
            }

            Command::Payer => {
                self.licenses.register_new_user(sender_id).await?;

                let buttons = vec![
                    Button::new(
                        "1 Semaine - 1000f",
                        &payment::encode_request(Plan::Week, sender_id),
                    ),
                    Button::new(
                        "1 Mois - 3000f",
                        &payment::encode_request(Plan::Month, sender_id),
                    ),
                    Button::new("❌ Annuler", payment::CANCEL_PAYLOAD),
                ];

                if let Err(e) = self
                    .transport
                    .send_buttons(sender_id, &commands::payer_text(), &buttons)
                    .await
                {
                    warn!("Failed to send payment menu to {}: {}", sender_id, e);
                }
            }

            Command::Status { target } => {
                let queried = match target {
                    Some(ref target_id) if self.is_admin(sender_id) => target_id.as_str(),
                    // Non-admin callers always get their own status
                    _ => sender_id,
                };

                let reply = match (self.licenses.status_of(queried), self.licenses.info_of(queried))
                {
                    (Some(status), Some(record)) => commands::status_text(queried, status, record),
                    _ => {
                        if queried == sender_id {
                            "❌ Vous n'êtes pas enregistré. Utilisez /start".to_string()
                        } else {
                            "❌ Utilisateur non trouvé".to_string()
                        }
                    }
                };
                self.send_best_effort(sender_id, &reply).await;
            }

            Command::Activate { user_id, plan_raw } => {
                if !self.is_admin(sender_id) {
                    warn!("Unauthorized /activer from {}", sender_id);
                    return Ok(());
                }

                let plan: Plan = match plan_raw.parse() {
                    Ok(plan) => plan,
                    Err(_) => {
                        self.send_best_effort(
                            sender_id,
                            "❌ Plan invalide. Utilisez `semaine` ou `mois`.",
                        )
                        .await;
                        return Ok(());
                    }
                };

                match self.licenses.activate(&user_id, plan).await {
                    Ok((license_key, expires)) => {
                        // State change is the source of truth; the user
                        // notification is best-effort on top of it.
                        self.send_best_effort(
                            &user_id,
                            &commands::license_activated_text(&license_key, expires),
                        )
                        .await;
                        self.send_best_effort(
                            sender_id,
                            &format!("✅ Utilisateur {} activé ({})", user_id, plan),
                        )
                        .await;
                    }
                    Err(Error::UserNotFound(_)) => {
                        self.send_best_effort(sender_id, "❌ Utilisateur non trouvé")
                            .await;
                    }
                    Err(e) => return Err(e),
                }
            }

            Command::Reconnect => {
                if !self.is_admin(sender_id) {
                    warn!("Unauthorized /reconnect from {}", sender_id);
                    return Ok(());
                }
                let report = self.repair_cycle().await;
                self.notify_admin_repair(&report).await;
            }

            Command::Clean => {
                if !self.is_admin(sender_id) {
                    warn!("Unauthorized /clean from {}", sender_id);
                    return Ok(());
                }
                let report = self.relays.cleanup().await?;
                self.send_best_effort(
                    sender_id,
                    &format!(
                        "🧹 *Sessions nettoyées :* {} descripteurs, {} artefacts supprimés",
                        report.sessions_removed, report.artifacts_deleted
                    ),
                )
                .await;
            }

            Command::ConfigDump => {
                if !self.is_admin(sender_id) {
                    warn!("Unauthorized /config from {}", sender_id);
                    return Ok(());
                }
                let (total, active) = self.licenses.user_counts();
                let text = format!(
                    "⚙️ *Configuration système*\n\
                     🔑 BOT\\_TOKEN : {}\n\
                     🔑 ADMIN\\_ID : {}\n\
                     👥 Utilisateurs : {} ({} actifs)\n\
                     📡 Sessions relais : {} ({} en ligne)\n\
                     🔄 Réactivations : {}",
                    if self.config.bot_token.is_empty() { "❌" } else { "✅" },
                    if self.config.admin_id.is_empty() { "❌" } else { "✅" },
                    total,
                    active,
                    self.relays.registry().len(),
                    self.relays.live_count(),
                    self.reactivation.count,
                );
                self.send_best_effort(sender_id, &text).await;
            }
        }

        Ok(())
    }

    async fn handle_callback(&mut self, sender_id: &str, callback_id: &str, payload: &[u8]) {
        let action = match payment::decode_callback(payload) {
            Ok(action) => action,
            Err(e) => {
                warn!("Bad callback payload from {}: {}", sender_id, e);
                self.ack_best_effort(callback_id, Some("❌ Action non reconnue"))
                    .await;
                return;
            }
        };

        if let Err(e) = payment::authorize(&action, sender_id) {
            warn!("{}", e);
            self.ack_best_effort(callback_id, Some("❌ Utilisateur non autorisé"))
                .await;
            return;
        }

        match action {
            CallbackAction::RequestPayment { plan, .. } => {
                let ttl = self.config.payment_request_ttl();
                match payment::request_payment(&mut self.licenses, sender_id, plan, ttl).await {
                    Ok(ticket) => {
                        self.ack_best_effort(callback_id, None).await;
                        let admin_id = self.config.admin_id.clone();
                        self.send_best_effort(
                            &admin_id,
                            &commands::payment_requested_admin_text(&ticket.user_id, ticket.plan),
                        )
                        .await;
                        self.send_best_effort(
                            sender_id,
                            &commands::payment_requested_user_text(ticket.plan),
                        )
                        .await;
                    }
                    Err(Error::AlreadyRequested(_)) => {
                        self.ack_best_effort(
                            callback_id,
                            Some("⏳ Demande déjà en attente pour ce plan"),
                        )
                        .await;
                    }
                    Err(e) => {
                        // Interactive operation: surface the failure rather
                        // than letting it look like a success
                        error!("Payment request from {} failed: {}", sender_id, e);
                        self.ack_best_effort(callback_id, Some("❌ Erreur technique, réessayez"))
                            .await;
                    }
                }
            }

            CallbackAction::CancelPayment => {
                if let Err(e) = payment::cancel_payment(&mut self.licenses, sender_id).await {
                    error!("Payment cancel from {} failed: {}", sender_id, e);
                }
                self.ack_best_effort(callback_id, Some("❌ Paiement annulé"))
                    .await;
            }
        }
    }

    // ========================================================================
    // Watchdog
    // ========================================================================

    /// Passive liveness check. Reconnects a dead primary when
    /// auto-reactivation is enabled; never touches the repair counter.
    pub async fn on_tick(&mut self) {
        self.primary_connected = self.transport.is_connected().await;
        if self.primary_connected || !self.reactivation.auto_enabled {
            return;
        }

        warn!("Primary connection lost, attempting reconnect");
        match self.relays.reconnect_primary(self.transport.as_ref()).await {
            Ok(_) => {
                self.primary_connected = self.transport.is_connected().await;
                if self.primary_connected {
                    info!("Primary connection re-established");
                }
            }
            // Transient failure: the next tick retries
            Err(e) => warn!("Primary reconnect failed: {}", e),
        }
    }

    /// Full active repair cycle: restore sessions, reconnect the primary,
    /// bump the counter.
    pub async fn repair_cycle(&mut self) -> RepairReport {
        let count = self.reactivation.record_trigger();
        info!("Repair cycle #{} starting", count);

        let restore = self.relays.restore_all().await;

        let reconnected = match self.relays.reconnect_primary(self.transport.as_ref()).await {
            Ok(reconnected) => reconnected,
            Err(e) => {
                warn!("Primary reconnect during repair failed: {}", e);
                false
            }
        };
        self.primary_connected = self.transport.is_connected().await;

        RepairReport {
            reactivation_count: count,
            sessions_restored: restore.restored,
            sessions_failed: restore.failed,
            primary_reconnected: reconnected,
            triggered_at: Utc::now(),
        }
    }

    async fn notify_admin_repair(&self, report: &RepairReport) {
        let text = commands::repair_report_text(
            report.reactivation_count,
            report.sessions_restored,
            report.sessions_failed,
            report.primary_reconnected,
        );
        self.send_best_effort(&self.config.admin_id, &text).await;
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn is_admin(&self, sender_id: &str) -> bool {
        !self.config.admin_id.is_empty() && sender_id == self.config.admin_id
    }

    /// Notifications never roll back the state change that triggered them;
    /// a failed send is logged and the user can re-query with /status.
    async fn send_best_effort(&self, user_id: &str, text: &str) {
        if let Err(e) = self.transport.send_message(user_id, text).await {
            warn!("Failed to send message to {}: {}", user_id, e);
        }
    }

    async fn ack_best_effort(&self, callback_id: &str, text: Option<&str>) {
        if let Err(e) = self.transport.ack_callback(callback_id, text).await {
            warn!("Failed to ack callback {}: {}", callback_id, e);
        }
    }

    pub fn publish_snapshot(&self) {
        let (users_total, users_active) = self.licenses.user_counts();
        let snapshot = StatusSnapshot {
            service: "tipbot",
            running: true,
            bot_connected: self.primary_connected,
            relay_active: self.relays.is_active(),
            relay_live: self.relays.live_count(),
            relay_total: self.relays.registry().len(),
            reactivation_count: self.reactivation.count,
            auto_reactivation: self.reactivation.auto_enabled,
            last_reactivation: self.reactivation.last_trigger,
            users_total,
            users_active,
            timestamp: Utc::now(),
        };
        self.snapshot_tx.send_replace(snapshot);
    }

    #[cfg(test)]
    pub(crate) fn licenses(&self) -> &LicenseManager {
        &self.licenses
    }

    #[cfg(test)]
    pub(crate) fn reactivation(&self) -> &ReactivationState {
        &self.reactivation
    }
}

/// Wire everything up and run until shutdown.
pub async fn run_daemon(config: Config) -> Result<()> {
    if config.bot_token.is_empty() {
        return Err(Error::FatalInit("BOT_TOKEN is not set".to_string()));
    }
    if config.admin_id.is_empty() {
        return Err(Error::FatalInit("ADMIN_ID is not set".to_string()));
    }

    let transport: Arc<dyn BotTransport> = Arc::new(TelegramBot::new(config.bot_token.clone()));

    let mut users = UserStore::new(&config.users_file);
    info!("Loaded {} users", users.load()?);
    let licenses = LicenseManager::new(users);

    let mut registry = SessionRegistry::new(&config.sessions_file);
    info!("Loaded {} relay sessions from registry", registry.load()?);

    let connector = Arc::new(ProcessConnector::new(config.relay_client.clone()));
    let relays = SessionSupervisor::new(registry, connector, config.credentials_dir.clone());

    let http_port = config.http_port;
    let (mut daemon, snapshot_rx) =
        BotDaemon::new(config, transport.clone(), licenses, relays);
    daemon.bootstrap().await?;

    let (event_tx, event_rx) = mpsc::channel(64);
    let (command_tx, command_rx) = mpsc::channel(16);

    // Transport listener: pushes bot events onto the loop's queue
    {
        let transport = transport.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.listen(event_tx).await {
                error!("Transport listener failed: {}", e);
            }
        });
    }

    // Health surface on its own task, talking to the loop via channels only
    let listener = TcpListener::bind(("0.0.0.0", http_port)).await?;
    let state = AppState {
        commands: command_tx,
        snapshot: snapshot_rx,
    };
    tokio::spawn(async move {
        if let Err(e) = gateway::serve(listener, state).await {
            error!("Health surface failed: {}", e);
        }
    });

    daemon.run(event_rx, command_rx).await
}
