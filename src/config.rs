//! Configuration and paths

use std::path::PathBuf;
use std::time::Duration;

/// All configurable paths and constants
#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,
    pub data_dir: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub users_file: PathBuf,
    pub sessions_file: PathBuf,
    /// Directory holding the per-phone credential artifacts.
    pub credentials_dir: PathBuf,
    /// External relay client binary, one process per linked phone number.
    pub relay_client: PathBuf,
    pub bot_token: String,
    pub admin_id: String,
    pub http_port: u16,
    pub watchdog_interval_secs: u64,
    pub teardown_grace_ms: u64,
    /// Age after which a pending payment request no longer blocks
    /// re-requesting the same plan. None keeps pending requests forever.
    pub payment_request_ttl_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().expect("Could not find home directory");
        let data_dir = home.join(".tipbot");

        Self {
            state_dir: data_dir.join("state"),
            logs_dir: data_dir.join("logs"),
            users_file: data_dir.join("state/users.json"),
            sessions_file: data_dir.join("state/sessions.json"),
            credentials_dir: data_dir.join("credentials"),
            relay_client: PathBuf::from("/usr/local/bin/relay-client"),
            bot_token: std::env::var("BOT_TOKEN").unwrap_or_default(),
            admin_id: std::env::var("ADMIN_ID").unwrap_or_default(),
            http_port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(10000),
            watchdog_interval_secs: 60,
            teardown_grace_ms: 3000,
            payment_request_ttl_secs: None,
            data_dir,
            home,
        }
    }
}

impl Config {
    /// Create config for testing with custom paths
    pub fn for_test(temp_dir: &std::path::Path) -> Self {
        Self {
            home: temp_dir.to_path_buf(),
            data_dir: temp_dir.join("tipbot"),
            state_dir: temp_dir.join("state"),
            logs_dir: temp_dir.join("logs"),
            users_file: temp_dir.join("state/users.json"),
            sessions_file: temp_dir.join("state/sessions.json"),
            credentials_dir: temp_dir.join("credentials"),
            relay_client: PathBuf::from("/bin/true"),
            bot_token: "test-token".to_string(),
            admin_id: "1".to_string(),
            http_port: 0,
            watchdog_interval_secs: 60,
            teardown_grace_ms: 200,
            payment_request_ttl_secs: None,
        }
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    pub fn payment_request_ttl(&self) -> Option<Duration> {
        self.payment_request_ttl_secs.map(Duration::from_secs)
    }

    /// Credential artifact path for a normalized phone number.
    pub fn credential_path(&self, phone: &str) -> PathBuf {
        self.credentials_dir.join(format!("relay_{}.session", phone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.users_file.to_string_lossy().contains("users.json"));
        assert!(config
            .sessions_file
            .to_string_lossy()
            .contains("sessions.json"));
    }

    #[test]
    fn test_test_config() {
        let temp = std::env::temp_dir();
        let config = Config::for_test(&temp);
        assert_eq!(config.home, temp);
        assert_eq!(config.admin_id, "1");
    }

    #[test]
    fn test_credential_path() {
        let temp = std::env::temp_dir();
        let config = Config::for_test(&temp);
        let path = config.credential_path("33612345678");
        assert!(path
            .to_string_lossy()
            .ends_with("credentials/relay_33612345678.session"));
    }
}
