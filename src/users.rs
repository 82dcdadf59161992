//! User records - persistent JSON storage for license state

use crate::error::{Error, Result};
use crate::store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

/// Subscription plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plan {
    #[serde(rename = "semaine")]
    Week,
    #[serde(rename = "mois")]
    Month,
}

impl Plan {
    pub fn duration(self) -> chrono::Duration {
        match self {
            Plan::Week => chrono::Duration::days(7),
            Plan::Month => chrono::Duration::days(30),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Plan::Week => "semaine",
            Plan::Month => "mois",
        }
    }

    pub fn price(self) -> &'static str {
        match self {
            Plan::Week => "1000f",
            Plan::Month => "3000f",
        }
    }
}

impl FromStr for Plan {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "semaine" => Ok(Plan::Week),
            "mois" => Ok(Plan::Month),
            other => Err(Error::InvalidPlan(other.to_string())),
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// License status of a user record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Unregistered,
    Inactive,
    Active,
    Expired,
    PaymentRequested,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Unregistered => "unregistered",
            UserStatus::Inactive => "inactive",
            UserStatus::Active => "active",
            UserStatus::Expired => "expired",
            UserStatus::PaymentRequested => "payment_requested",
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record per end user, created on first contact and never deleted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub status: UserStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_plan: Option<Plan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_requested_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            status: UserStatus::Unregistered,
            plan: None,
            license_key: None,
            expires_at: None,
            requested_plan: None,
            payment_requested_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persistent store mapping user id to license record.
///
/// Sole writer for user records; every mutation is persisted as a whole
/// snapshot before the mutating call returns.
pub struct UserStore {
    path: PathBuf,
    data: HashMap<String, UserRecord>,
}

impl UserStore {
    pub fn new(path: &std::path::Path) -> Self {
        Self {
            path: path.to_path_buf(),
            data: HashMap::new(),
        }
    }

    /// Load the store from disk. A missing file is an empty store.
    pub fn load(&mut self) -> Result<usize> {
        self.data = store::load_json(&self.path)?;
        Ok(self.data.len())
    }

    pub async fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.data)?;
        store::save_json(&self.path, json).await
    }

    pub fn get(&self, user_id: &str) -> Option<&UserRecord> {
        self.data.get(user_id)
    }

    pub fn get_mut(&mut self, user_id: &str) -> Option<&mut UserRecord> {
        self.data.get_mut(user_id)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.data.contains_key(user_id)
    }

    /// Insert a fresh record. Existing records are left untouched.
    pub fn insert_new(&mut self, user_id: &str) -> bool {
        if self.data.contains_key(user_id) {
            return false;
        }
        self.data
            .insert(user_id.to_string(), UserRecord::new(user_id));
        true
    }

    pub fn all(&self) -> &HashMap<String, UserRecord> {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_plan_parse() {
        assert_eq!("semaine".parse::<Plan>().unwrap(), Plan::Week);
        assert_eq!("mois".parse::<Plan>().unwrap(), Plan::Month);
        assert!(matches!(
            "annee".parse::<Plan>(),
            Err(Error::InvalidPlan(_))
        ));
        assert!(matches!("".parse::<Plan>(), Err(Error::InvalidPlan(_))));
        // Case-sensitive, like the command surface
        assert!("Semaine".parse::<Plan>().is_err());
    }

    #[test]
    fn test_plan_duration() {
        assert_eq!(Plan::Week.duration(), chrono::Duration::days(7));
        assert_eq!(Plan::Month.duration(), chrono::Duration::days(30));
    }

    #[test]
    fn test_new_record_is_unregistered() {
        let record = UserRecord::new("42");
        assert_eq!(record.status, UserStatus::Unregistered);
        assert!(record.plan.is_none());
        assert!(record.license_key.is_none());
        assert!(record.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_store_persist_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("users.json");

        let mut store = UserStore::new(&path);
        assert_eq!(store.load().unwrap(), 0);

        store.insert_new("42");
        store.get_mut("42").unwrap().status = UserStatus::Inactive;
        store.save().await.unwrap();

        let mut store2 = UserStore::new(&path);
        assert_eq!(store2.load().unwrap(), 1);
        assert_eq!(store2.get("42").unwrap().status, UserStatus::Inactive);
    }

    #[test]
    fn test_insert_new_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut store = UserStore::new(&temp.path().join("users.json"));

        assert!(store.insert_new("42"));
        store.get_mut("42").unwrap().status = UserStatus::Active;

        // Second insert must not clobber the record
        assert!(!store.insert_new("42"));
        assert_eq!(store.get("42").unwrap().status, UserStatus::Active);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_record_serialization_skips_absent_fields() {
        let record = UserRecord::new("42");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("unregistered"));
        assert!(!json.contains("license_key"));
        assert!(!json.contains("requested_plan"));

        let parsed: UserRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.user_id, "42");
        assert_eq!(parsed.status, UserStatus::Unregistered);
    }

    #[test]
    fn test_plan_serde_uses_french_names() {
        let json = serde_json::to_string(&Plan::Week).unwrap();
        assert_eq!(json, "\"semaine\"");
        let plan: Plan = serde_json::from_str("\"mois\"").unwrap();
        assert_eq!(plan, Plan::Month);
    }
}
