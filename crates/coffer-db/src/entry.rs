//! Entries: credential records with attributes, attachments, and history
//!
//! Tracked mutations are bracketed by `begin_update`/`end_update`. The
//! bracket snapshots field state on entry; setters mutate live fields (a
//! read inside the bracket sees in-progress values); on exit the snapshot
//! is pushed onto history only if something tracked actually changed, so
//! no-op edits never bloat history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use coffer_core::config::HistoryConfig;
use coffer_core::{CofferError, CofferResult};

/// A custom key/value attribute. Protected values are sensitive: they are
/// persisted, but excluded from plain-text listings and never logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
    pub protected: bool,
}

/// Creation/modification timestamps for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInfo {
    pub created: SystemTime,
    pub modified: SystemTime,
}

impl TimeInfo {
    pub fn now() -> Self {
        let now = SystemTime::now();
        Self {
            created: now,
            modified: now,
        }
    }
}

impl Default for TimeInfo {
    fn default() -> Self {
        Self::now()
    }
}

/// Immutable prior state of an entry, captured by the update bracket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub saved_at: SystemTime,
    pub title: String,
    pub username: String,
    pub password: String,
    pub url: String,
    pub notes: String,
    pub attributes: Vec<Attribute>,
    #[serde(with = "b64_map")]
    pub attachments: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    uuid: Uuid,
    title: String,
    username: String,
    password: String,
    url: String,
    notes: String,
    attributes: Vec<Attribute>,
    #[serde(with = "b64_map")]
    attachments: BTreeMap<String, Vec<u8>>,
    history: Vec<HistorySnapshot>,
    times: TimeInfo,
    #[serde(skip)]
    pending: Option<HistorySnapshot>,
}

impl Entry {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            title: title.into(),
            username: String::new(),
            password: String::new(),
            url: String::new(),
            notes: String::new(),
            attributes: Vec::new(),
            attachments: BTreeMap::new(),
            history: Vec::new(),
            times: TimeInfo::now(),
            pending: None,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn times(&self) -> TimeInfo {
        self.times
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = username.into();
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub fn set_notes(&mut self, notes: impl Into<String>) {
        self.notes = notes.into();
    }

    // ── Attributes ───────────────────────────────────────────────────────

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.key == key)
    }

    /// Insert or update an attribute. Keys are unique; updating an
    /// existing key keeps its position in the sequence.
    pub fn set_attribute(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        protected: bool,
    ) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|a| a.key == key) {
            Some(existing) => {
                existing.value = value;
                existing.protected = protected;
            }
            None => self.attributes.push(Attribute {
                key,
                value,
                protected,
            }),
        }
    }

    pub fn remove_attribute(&mut self, key: &str) -> CofferResult<()> {
        let before = self.attributes.len();
        self.attributes.retain(|a| a.key != key);
        if self.attributes.len() == before {
            return Err(CofferError::NotFound(format!("attribute {key}")));
        }
        Ok(())
    }

    // ── Attachments ──────────────────────────────────────────────────────

    pub fn attachment_names(&self) -> impl Iterator<Item = &str> {
        self.attachments.keys().map(String::as_str)
    }

    pub fn attachment(&self, name: &str) -> CofferResult<&[u8]> {
        self.attachments
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| CofferError::NotFound(format!("attachment {name}")))
    }

    pub fn set_attachment(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.attachments.insert(name.into(), data);
    }

    pub fn remove_attachment(&mut self, name: &str) -> CofferResult<()> {
        self.attachments
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CofferError::NotFound(format!("attachment {name}")))
    }

    // ── Update bracket ───────────────────────────────────────────────────

    /// Open an update bracket, snapshotting tracked state.
    ///
    /// Brackets do not nest: a second `begin_update` before `end_update`
    /// is a programming error and panics, because history capture is not
    /// reentrant.
    pub fn begin_update(&mut self) {
        assert!(
            self.pending.is_none(),
            "begin_update called while an update is already open"
        );
        self.pending = Some(self.snapshot());
    }

    /// Close the bracket. If any tracked field changed since
    /// `begin_update`, the snapshot is appended to history and the
    /// modification timestamp advances. Returns whether a snapshot was
    /// recorded.
    pub fn end_update(&mut self) -> bool {
        let snapshot = self
            .pending
            .take()
            .expect("end_update called without begin_update");
        let changed = self.differs_from(&snapshot);
        if changed {
            self.history.push(snapshot);
            self.times.modified = SystemTime::now();
        }
        changed
    }

    pub fn history(&self) -> &[HistorySnapshot] {
        &self.history
    }

    /// Apply the retention policy, dropping the oldest snapshots first.
    /// Returns the number removed. This is the only way history shrinks.
    pub fn prune_history(&mut self, policy: &HistoryConfig) -> usize {
        let before = self.history.len();

        if policy.max_age_days > 0 {
            let cutoff = SystemTime::now() - Duration::from_secs(policy.max_age_days * 86_400);
            self.history.retain(|s| s.saved_at >= cutoff);
        }

        if policy.max_items > 0 && self.history.len() > policy.max_items {
            let excess = self.history.len() - policy.max_items;
            self.history.drain(..excess);
        }

        before - self.history.len()
    }

    fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            saved_at: SystemTime::now(),
            title: self.title.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            url: self.url.clone(),
            notes: self.notes.clone(),
            attributes: self.attributes.clone(),
            attachments: self.attachments.clone(),
        }
    }

    fn differs_from(&self, snapshot: &HistorySnapshot) -> bool {
        self.title != snapshot.title
            || self.username != snapshot.username
            || self.password != snapshot.password
            || self.url != snapshot.url
            || self.notes != snapshot.notes
            || self.attributes != snapshot.attributes
            || self.attachments != snapshot.attachments
    }
}

/// Attachment blobs serialize as base64 strings rather than JSON byte
/// arrays.
mod b64_map {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded: BTreeMap<&str, String> = map
            .iter()
            .map(|(k, v)| (k.as_str(), STANDARD.encode(v)))
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(k, v)| {
                STANDARD
                    .decode(&v)
                    .map(|bytes| (k, bytes))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_bracket_records_nothing() {
        let mut entry = Entry::new("Gmail");
        entry.begin_update();
        entry.end_update();
        assert!(entry.history().is_empty());
    }

    #[test]
    fn test_single_change_records_exactly_one_snapshot() {
        let mut entry = Entry::new("Gmail");
        entry.begin_update();
        entry.set_username("me");
        let changed = entry.end_update();

        assert!(changed);
        assert_eq!(entry.history().len(), 1);
        // the snapshot holds the state before the edit
        assert_eq!(entry.history()[0].username, "");
        assert_eq!(entry.username(), "me");
    }

    #[test]
    fn test_set_back_to_original_is_noop() {
        let mut entry = Entry::new("Gmail");
        entry.set_username("me");

        entry.begin_update();
        entry.set_username("other");
        entry.set_username("me");
        assert!(!entry.end_update());
        assert!(entry.history().is_empty());
    }

    #[test]
    fn test_reads_inside_bracket_see_in_progress_values() {
        let mut entry = Entry::new("Gmail");
        entry.begin_update();
        entry.set_title("Mail");
        assert_eq!(entry.title(), "Mail");
        entry.end_update();
    }

    #[test]
    #[should_panic(expected = "already open")]
    fn test_overlapping_brackets_panic() {
        let mut entry = Entry::new("Gmail");
        entry.begin_update();
        entry.begin_update();
    }

    #[test]
    fn test_attribute_keys_unique_and_ordered() {
        let mut entry = Entry::new("e");
        entry.set_attribute("first", "1", false);
        entry.set_attribute("second", "2", true);
        entry.set_attribute("first", "updated", false);

        assert_eq!(entry.attributes().len(), 2);
        assert_eq!(entry.attributes()[0].key, "first");
        assert_eq!(entry.attributes()[0].value, "updated");
        assert!(entry.attributes()[1].protected);
    }

    #[test]
    fn test_attachment_roundtrip_and_missing() {
        let mut entry = Entry::new("e");
        entry.set_attachment("id_rsa", b"key material".to_vec());

        assert_eq!(entry.attachment("id_rsa").unwrap(), b"key material");
        assert!(matches!(
            entry.attachment("missing"),
            Err(CofferError::NotFound(_))
        ));
    }

    #[test]
    fn test_attachment_survives_serde() {
        let mut entry = Entry::new("e");
        entry.set_attachment("blob", vec![0, 159, 146, 150]);

        let json = serde_json::to_string(&entry).unwrap();
        let back: Entry = serde_json::from_str(&json).unwrap();

        assert_eq!(back.attachment("blob").unwrap(), &[0, 159, 146, 150]);
    }

    #[test]
    fn test_prune_by_count_drops_oldest() {
        let mut entry = Entry::new("e");
        for i in 0..5 {
            entry.begin_update();
            entry.set_notes(format!("rev {i}"));
            entry.end_update();
        }
        assert_eq!(entry.history().len(), 5);

        let removed = entry.prune_history(&HistoryConfig {
            max_items: 2,
            max_age_days: 0,
        });

        assert_eq!(removed, 3);
        assert_eq!(entry.history().len(), 2);
        // newest snapshots survive
        assert_eq!(entry.history()[1].notes, "rev 3");
    }

    #[test]
    fn test_prune_unlimited_keeps_everything() {
        let mut entry = Entry::new("e");
        for i in 0..3 {
            entry.begin_update();
            entry.set_notes(format!("rev {i}"));
            entry.end_update();
        }

        let removed = entry.prune_history(&HistoryConfig {
            max_items: 0,
            max_age_days: 0,
        });

        assert_eq!(removed, 0);
        assert_eq!(entry.history().len(), 3);
    }
}
