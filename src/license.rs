//! License state machine and access checks
//!
//! All user-record mutation funnels through here; the store persists a full
//! snapshot before any mutating call returns, so a crash after a successful
//! call never loses the change.

use crate::error::{Error, Result};
use crate::users::{Plan, UserRecord, UserStatus, UserStore};
use chrono::{DateTime, Utc};
use rand::RngCore;

pub struct LicenseManager {
    store: UserStore,
}

impl LicenseManager {
    pub fn new(store: UserStore) -> Self {
        Self { store }
    }

    /// Create a record with status `unregistered` if absent.
    ///
    /// Idempotent: returns false (and persists nothing) when the user
    /// already exists.
    pub async fn register_new_user(&mut self, user_id: &str) -> Result<bool> {
        if !self.store.insert_new(user_id) {
            return Ok(false);
        }
        self.store.save().await?;
        Ok(true)
    }

    /// First-contact transition `unregistered -> inactive`. No-op for any
    /// other status.
    pub async fn mark_contacted(&mut self, user_id: &str) -> Result<()> {
        let Some(record) = self.store.get_mut(user_id) else {
            return Ok(());
        };
        if record.status != UserStatus::Unregistered {
            return Ok(());
        }
        record.status = UserStatus::Inactive;
        record.updated_at = Utc::now();
        self.store.save().await?;
        Ok(())
    }

    /// True iff the record exists, is active, and the expiry is strictly in
    /// the future. Pure read: a lapsed record stays `active` on disk and is
    /// only reported as expired.
    pub fn check_access(&self, user_id: &str) -> bool {
        match self.store.get(user_id) {
            Some(record) => {
                record.status == UserStatus::Active
                    && record.expires_at.is_some_and(|at| at > Utc::now())
            }
            None => false,
        }
    }

    /// Activate a plan for a user. Re-activation extends from now, not from
    /// the previous expiry.
    pub async fn activate(
        &mut self,
        user_id: &str,
        plan: Plan,
    ) -> Result<(String, DateTime<Utc>)> {
        let record = self
            .store
            .get_mut(user_id)
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;

        let license_key = generate_license_key();
        let expires_at = Utc::now() + plan.duration();

        record.status = UserStatus::Active;
        record.plan = Some(plan);
        record.license_key = Some(license_key.clone());
        record.expires_at = Some(expires_at);
        record.requested_plan = None;
        record.payment_requested_at = None;
        record.updated_at = Utc::now();

        self.store.save().await?;
        Ok((license_key, expires_at))
    }

    /// Effective status: reports `expired` for a lapsed active record
    /// without mutating it.
    pub fn status_of(&self, user_id: &str) -> Option<UserStatus> {
        let record = self.store.get(user_id)?;
        if record.status == UserStatus::Active
            && record.expires_at.is_some_and(|at| at <= Utc::now())
        {
            return Some(UserStatus::Expired);
        }
        Some(record.status)
    }

    pub fn info_of(&self, user_id: &str) -> Option<&UserRecord> {
        self.store.get(user_id)
    }

    /// (total, currently-active) user counts for status reporting.
    pub fn user_counts(&self) -> (usize, usize) {
        let active = self
            .store
            .all()
            .keys()
            .filter(|id| self.check_access(id))
            .count();
        (self.store.len(), active)
    }

    pub(crate) fn store(&self) -> &UserStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut UserStore {
        &mut self.store
    }
}

/// Fresh opaque license key. Must be unpredictable: CSPRNG bytes only,
/// never derived from time or user ids.
fn generate_license_key() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("TIP-{}", hex::encode_upper(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> LicenseManager {
        let mut store = UserStore::new(&temp.path().join("users.json"));
        store.load().unwrap();
        LicenseManager::new(store)
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut licenses = manager(&temp);

        assert!(licenses.register_new_user("42").await.unwrap());
        assert!(!licenses.register_new_user("42").await.unwrap());
        assert_eq!(licenses.status_of("42"), Some(UserStatus::Unregistered));
    }

    #[tokio::test]
    async fn test_mark_contacted_only_moves_unregistered() {
        let temp = TempDir::new().unwrap();
        let mut licenses = manager(&temp);

        licenses.register_new_user("42").await.unwrap();
        licenses.mark_contacted("42").await.unwrap();
        assert_eq!(licenses.status_of("42"), Some(UserStatus::Inactive));

        licenses.activate("42", Plan::Week).await.unwrap();
        licenses.mark_contacted("42").await.unwrap();
        assert_eq!(licenses.status_of("42"), Some(UserStatus::Active));
    }

    #[tokio::test]
    async fn test_check_access_truth_table() {
        let temp = TempDir::new().unwrap();
        let mut licenses = manager(&temp);

        // Missing record
        assert!(!licenses.check_access("42"));

        // Registered but never activated
        licenses.register_new_user("42").await.unwrap();
        assert!(!licenses.check_access("42"));

        // Active with future expiry
        licenses.activate("42", Plan::Week).await.unwrap();
        assert!(licenses.check_access("42"));
    }

    #[tokio::test]
    async fn test_access_expires_lazily_without_mutation() {
        let temp = TempDir::new().unwrap();
        let mut licenses = manager(&temp);

        licenses.register_new_user("42").await.unwrap();
        licenses.activate("42", Plan::Week).await.unwrap();

        // Rewind the stored expiry past now; no status-mutating call runs.
        licenses.store_mut().get_mut("42").unwrap().expires_at =
            Some(Utc::now() - chrono::Duration::seconds(1));

        assert!(!licenses.check_access("42"));
        assert_eq!(licenses.status_of("42"), Some(UserStatus::Expired));
        // The stored status itself is untouched
        assert_eq!(
            licenses.info_of("42").unwrap().status,
            UserStatus::Active
        );
    }

    #[tokio::test]
    async fn test_activate_week_sets_expiry_seven_days_out() {
        let temp = TempDir::new().unwrap();
        let mut licenses = manager(&temp);
        licenses.register_new_user("42").await.unwrap();

        let before = Utc::now();
        let (key, expires) = licenses.activate("42", Plan::Week).await.unwrap();
        let after = Utc::now();

        assert!(!key.is_empty());
        assert!(expires >= before + chrono::Duration::days(7));
        assert!(expires <= after + chrono::Duration::days(7));
        assert!(licenses.check_access("42"));
    }

    #[tokio::test]
    async fn test_reactivation_extends_from_now_not_old_expiry() {
        let temp = TempDir::new().unwrap();
        let mut licenses = manager(&temp);
        licenses.register_new_user("42").await.unwrap();

        licenses.activate("42", Plan::Month).await.unwrap();
        let (_, second_expiry) = licenses.activate("42", Plan::Week).await.unwrap();

        // No stacking: ~7 days out, not ~37
        assert!(second_expiry <= Utc::now() + chrono::Duration::days(8));
    }

    #[tokio::test]
    async fn test_activate_unknown_user_fails() {
        let temp = TempDir::new().unwrap();
        let mut licenses = manager(&temp);

        let result = licenses.activate("999", Plan::Week).await;
        assert!(matches!(result, Err(Error::UserNotFound(_))));
    }

    #[tokio::test]
    async fn test_activate_clears_payment_request_fields() {
        let temp = TempDir::new().unwrap();
        let mut licenses = manager(&temp);
        licenses.register_new_user("42").await.unwrap();

        {
            let record = licenses.store_mut().get_mut("42").unwrap();
            record.status = UserStatus::PaymentRequested;
            record.requested_plan = Some(Plan::Month);
            record.payment_requested_at = Some(Utc::now());
        }

        licenses.activate("42", Plan::Month).await.unwrap();
        let record = licenses.info_of("42").unwrap();
        assert!(record.requested_plan.is_none());
        assert!(record.payment_requested_at.is_none());
        assert_eq!(record.status, UserStatus::Active);
    }

    #[tokio::test]
    async fn test_activation_persists_before_returning() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("users.json");
        let mut store = UserStore::new(&path);
        store.load().unwrap();
        let mut licenses = LicenseManager::new(store);

        licenses.register_new_user("42").await.unwrap();
        licenses.activate("42", Plan::Week).await.unwrap();

        // A fresh load observes the activation
        let mut store2 = UserStore::new(&path);
        store2.load().unwrap();
        let licenses2 = LicenseManager::new(store2);
        assert!(licenses2.check_access("42"));
    }

    #[test]
    fn test_license_keys_are_distinct_and_well_formed() {
        let a = generate_license_key();
        let b = generate_license_key();
        assert_ne!(a, b);
        assert!(a.starts_with("TIP-"));
        assert_eq!(a.len(), "TIP-".len() + 16);
        assert!(a["TIP-".len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_user_counts() {
        let temp = TempDir::new().unwrap();
        let mut licenses = manager(&temp);

        licenses.register_new_user("1").await.unwrap();
        licenses.register_new_user("2").await.unwrap();
        licenses.register_new_user("3").await.unwrap();
        licenses.activate("2", Plan::Week).await.unwrap();

        assert_eq!(licenses.user_counts(), (3, 1));
    }
}
