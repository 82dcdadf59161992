//! Command parsing and reply texts
//!
//! Thin boundary between raw chat text and the core: commands are parsed
//! once into a closed enum and dispatched by the daemon. Admin-only variants
//! are re-gated at dispatch time, never here.

use crate::users::{Plan, UserRecord, UserStatus};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Menu,
    Help,
    Pronostics,
    Payer,
    /// `/status` for self, `/status <user_id>` for the admin.
    Status { target: Option<String> },
    // Admin-only
    Activate { user_id: String, plan_raw: String },
    Reconnect,
    Clean,
    ConfigDump,
}

/// Parse a raw message into a command. Non-command text returns None and is
/// ignored by the router.
pub fn parse(text: &str) -> Option<Command> {
    let mut parts = text.split_whitespace();
    let head = parts.next()?;

    // Tolerate the @botname suffix Telegram appends in groups
    let head = head.split('@').next().unwrap_or(head);

    match head {
        "/start" => Some(Command::Start),
        "/menu" => Some(Command::Menu),
        "/help" => Some(Command::Help),
        "/pronostics" => Some(Command::Pronostics),
        "/payer" => Some(Command::Payer),
        "/status" => Some(Command::Status {
            target: parts.next().map(|s| s.to_string()),
        }),
        "/activer" => {
            let user_id = parts.next()?.to_string();
            let plan_raw = parts.next()?.to_string();
            Some(Command::Activate { user_id, plan_raw })
        }
        "/reconnect" => Some(Command::Reconnect),
        "/clean" => Some(Command::Clean),
        "/config" => Some(Command::ConfigDump),
        _ => None,
    }
}

// ============================================================================
// Reply texts
// ============================================================================

pub fn welcome_text() -> String {
    "🤖 *Bienvenue !*\n\n\
     ✅ Votre licence est active\n\n\
     • /menu - Interface à boutons\n\
     • /pronostics - Pronostics du jour\n\
     • /status - Votre statut\n\
     • /help - Aide"
        .to_string()
}

pub fn access_expired_text() -> String {
    "❌ Votre licence est expirée ou inactive.\n\
     Utilisez /payer pour choisir un abonnement."
        .to_string()
}

pub fn help_text(is_admin: bool) -> String {
    let mut text = "📱 *Commandes :*\n\
         /start - Démarrer le bot\n\
         /menu - Interface à boutons\n\
         /pronostics - Pronostics du jour\n\
         /status - Votre statut\n\
         /payer - Choisir un abonnement\n\n\
         💰 *Tarifs :* 1 semaine = 1000f, 1 mois = 3000f"
        .to_string();

    if is_admin {
        text.push_str(
            "\n\n👑 *Admin :*\n\
             /activer user\\_id plan - Activer une licence\n\
             /status user\\_id - Statut d'un utilisateur\n\
             /reconnect - Cycle de réparation\n\
             /clean - Nettoyer les sessions\n\
             /config - Configuration système",
        );
    }

    text
}

pub fn payer_text() -> String {
    "💳 *Choisissez votre abonnement*\n\n\
     • *1 Semaine* - 1000f\n\
     • *1 Mois* - 3000f"
        .to_string()
}

pub fn status_text(user_id: &str, status: UserStatus, record: &UserRecord) -> String {
    let mut text = format!(
        "📊 *Statut utilisateur {}*\n🔄 Statut : *{}*\n",
        user_id, status
    );
    if let Some(plan) = record.plan.or(record.requested_plan) {
        text.push_str(&format!("📋 Plan : *{}*\n", plan));
    }
    if let Some(expires) = record.expires_at {
        text.push_str(&format!("⏳ Expire : *{}*\n", format_date(expires)));
    }
    if let Some(ref key) = record.license_key {
        text.push_str(&format!("🔐 Clé : `{}`", key));
    }
    text
}

pub fn license_activated_text(license_key: &str, expires: DateTime<Utc>) -> String {
    format!(
        "✅ *Licence activée !*\n🔐 Clé : `{}`\n⏳ Expire : *{}*",
        license_key,
        format_date(expires)
    )
}

pub fn payment_requested_admin_text(user_id: &str, plan: Plan) -> String {
    format!(
        "💳 *Nouvelle demande de paiement*\n\n\
         👤 Utilisateur : {}\n\
         📦 Plan : {}\n\
         💰 Prix : {}\n\n\
         *Action :* `/activer {} {}`",
        user_id,
        plan,
        plan.price(),
        user_id,
        plan
    )
}

pub fn payment_requested_user_text(plan: Plan) -> String {
    format!(
        "✅ *Demande de paiement enregistrée*\n\n\
         📦 Plan choisi : *{}*\n\
         💰 Prix : *{}*\n\n\
         Votre licence sera activée après confirmation du paiement.",
        plan,
        plan.price()
    )
}

pub fn repair_report_text(
    count: u64,
    restored: usize,
    failed: usize,
    reconnected: bool,
) -> String {
    format!(
        "🔄 *Réactivation #{} effectuée*\n\
         📡 Sessions restaurées : {} (échecs : {})\n\
         🔌 Connexion principale : {}",
        count,
        restored,
        failed,
        if reconnected { "rétablie" } else { "déjà active" }
    )
}

fn format_date(at: DateTime<Utc>) -> String {
    at.format("%d/%m/%Y %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_commands() {
        assert_eq!(parse("/start"), Some(Command::Start));
        assert_eq!(parse("/menu"), Some(Command::Menu));
        assert_eq!(parse("/help"), Some(Command::Help));
        assert_eq!(parse("/pronostics"), Some(Command::Pronostics));
        assert_eq!(parse("/payer"), Some(Command::Payer));
    }

    #[test]
    fn test_parse_status_with_and_without_target() {
        assert_eq!(parse("/status"), Some(Command::Status { target: None }));
        assert_eq!(
            parse("/status 42"),
            Some(Command::Status {
                target: Some("42".to_string())
            })
        );
    }

    #[test]
    fn test_parse_activate() {
        assert_eq!(
            parse("/activer 123456789 semaine"),
            Some(Command::Activate {
                user_id: "123456789".to_string(),
                plan_raw: "semaine".to_string()
            })
        );
        // Missing arguments: not a valid command
        assert_eq!(parse("/activer 123456789"), None);
        assert_eq!(parse("/activer"), None);
    }

    #[test]
    fn test_parse_bot_mention_suffix() {
        assert_eq!(parse("/start@tipster_bot"), Some(Command::Start));
    }

    #[test]
    fn test_parse_rejects_non_commands() {
        assert_eq!(parse("bonjour"), None);
        assert_eq!(parse(""), None);
        assert_eq!(parse("/unknown"), None);
    }

    #[test]
    fn test_admin_help_includes_admin_commands() {
        assert!(help_text(true).contains("/activer"));
        assert!(!help_text(false).contains("/activer"));
    }

    #[test]
    fn test_admin_notification_contains_activation_command() {
        let text = payment_requested_admin_text("42", Plan::Week);
        assert!(text.contains("/activer 42 semaine"));
        assert!(text.contains("1000f"));
    }
}
