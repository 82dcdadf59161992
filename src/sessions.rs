//! Relay session registry - persistent JSON storage for per-phone descriptors

use crate::error::{Error, Result};
use crate::store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Normalize a phone number to bare digits (no leading '+' or separators).
pub fn normalize_phone(raw: &str) -> Result<String> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidPhone(raw.to_string()));
    }
    if !(6..=15).contains(&digits.len()) {
        return Err(Error::InvalidPhone(raw.to_string()));
    }

    Ok(digits)
}

/// Descriptor for one secondary phone-bound relay connection.
///
/// The live protocol handle is never part of this; it lives in the
/// supervisor's in-memory map and is gone after a process restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub phone_number: String,
    pub connected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistent registry mapping phone number to session descriptor
pub struct SessionRegistry {
    registry_path: PathBuf,
    data: HashMap<String, SessionDescriptor>,
}

impl SessionRegistry {
    pub fn new(path: &std::path::Path) -> Self {
        Self {
            registry_path: path.to_path_buf(),
            data: HashMap::new(),
        }
    }

    /// Load registry from disk. A missing file is an empty registry.
    pub fn load(&mut self) -> Result<usize> {
        self.data = store::load_json(&self.registry_path)?;
        Ok(self.data.len())
    }

    /// Save registry to disk atomically
    pub async fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.data)?;
        store::save_json(&self.registry_path, json).await
    }

    /// Register or update a descriptor for a linked phone number.
    pub async fn register(&mut self, phone: &str, connected: bool) -> Result<SessionDescriptor> {
        let phone = normalize_phone(phone)?;
        let now = Utc::now();

        let created_at = self
            .data
            .get(&phone)
            .map(|d| d.created_at)
            .unwrap_or(now);

        let descriptor = SessionDescriptor {
            phone_number: phone.clone(),
            connected,
            created_at,
            updated_at: now,
        };

        self.data.insert(phone, descriptor.clone());
        self.save().await?;

        Ok(descriptor)
    }

    /// Flip the persisted connectivity flag for a phone number.
    pub async fn mark_connected(&mut self, phone: &str, connected: bool) -> Result<()> {
        let descriptor = self
            .data
            .get_mut(phone)
            .ok_or_else(|| Error::SessionNotFound(phone.to_string()))?;
        descriptor.connected = connected;
        descriptor.updated_at = Utc::now();
        self.save().await?;
        Ok(())
    }

    pub fn get(&self, phone: &str) -> Option<&SessionDescriptor> {
        self.data.get(phone)
    }

    pub fn all(&self) -> &HashMap<String, SessionDescriptor> {
        &self.data
    }

    /// Phone numbers whose last persisted state was connected.
    pub fn connected_phones(&self) -> Vec<String> {
        let mut phones: Vec<String> = self
            .data
            .values()
            .filter(|d| d.connected)
            .map(|d| d.phone_number.clone())
            .collect();
        phones.sort();
        phones
    }

    pub async fn remove(&mut self, phone: &str) -> Result<Option<SessionDescriptor>> {
        let removed = self.data.remove(phone);
        if removed.is_some() {
            self.save().await?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
