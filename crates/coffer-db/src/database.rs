//! Database lifecycle: unlock, mutate, seal, save
//!
//! A `Database` value *is* the unlocked state — the node tree plus the
//! key and KDF configuration. The locked state is just the container
//! file on disk; `unlock` turns one into the other and `save` goes the
//! opposite way. `set_key` and `change_kdf` only mark the database
//! dirty; nothing touches disk except `save`/`save_as`.

use std::io::Write;
use std::path::Path;

use coffer_core::config::HistoryConfig;
use coffer_core::{CofferError, CofferResult};
use coffer_crypto::{seal, unseal, CompositeKey, KdfEngine, KdfParams};

use crate::container::{self, EnvelopeHeader};
use crate::entry::Entry;
use crate::group::Group;

pub struct Database {
    root: Group,
    key: Option<CompositeKey>,
    kdf: KdfEngine,
    dirty: bool,
}

impl Database {
    /// A fresh database with an empty root group and default KDF cost.
    /// No key is set yet; saving requires `set_key` first.
    pub fn new() -> Self {
        Self {
            root: Group::new("Root"),
            key: None,
            // Defaults are within bounds, so this cannot fail.
            kdf: KdfEngine::new(KdfParams::default()).expect("default KDF params are valid"),
            dirty: true,
        }
    }

    pub fn root(&self) -> &Group {
        &self.root
    }

    /// Mutable access to the tree. The caller is responsible for
    /// bracketed entry updates; any structural change should be followed
    /// by `mark_dirty`.
    pub fn root_mut(&mut self) -> &mut Group {
        &mut self.root
    }

    pub fn kdf(&self) -> &KdfEngine {
        &self.kdf
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Attach the composite key. Rejects an empty key before it can ever
    /// seal anything.
    pub fn set_key(&mut self, key: CompositeKey) -> CofferResult<()> {
        if key.is_empty() {
            return Err(CofferError::NoKey);
        }
        self.key = Some(key);
        self.dirty = true;
        Ok(())
    }

    /// Swap in a new KDF configuration. The salt is regenerated — a KDF
    /// is never reused across configurations — and the composite key is
    /// untouched.
    pub fn change_kdf(&mut self, mut kdf: KdfEngine) {
        kdf.regenerate_salt();
        self.kdf = kdf;
        self.dirty = true;
    }

    // ── Unlock ───────────────────────────────────────────────────────────

    /// Open a sealed container: derive the key from `key` using the
    /// parameters stored in the header, unseal, and materialize the tree.
    ///
    /// Errors keep the taxonomy callers need for reporting: `NoKey` for
    /// an empty composite key, `Auth` when derivation succeeds but the
    /// tag does not verify (wrong password or key file), `CorruptFile`
    /// for structural damage, including damage only detectable after
    /// authentication.
    pub fn unlock(path: &Path, key: CompositeKey) -> CofferResult<Database> {
        if key.is_empty() {
            return Err(CofferError::NoKey);
        }

        let bytes = std::fs::read(path)?;
        let (header, header_bytes, sealed) = container::disassemble(&bytes)?;

        let params = header.kdf_params()?;
        let kdf = KdfEngine::new(params)
            .map_err(|e| CofferError::CorruptFile(format!("stored KDF parameters: {e}")))?;

        let raw = key.raw_key()?;
        let master = kdf.transform(&raw)?;
        let plaintext = unseal(sealed, &master, header_bytes)?;

        // Authenticated but unparseable: the file was damaged after
        // sealing round-tripped, or written by a buggy producer.
        let root: Group = serde_json::from_slice(&plaintext)
            .map_err(|e| CofferError::CorruptFile(format!("malformed node tree: {e}")))?;

        tracing::info!(path = %path.display(), "database unlocked");
        Ok(Database {
            root,
            key: Some(key),
            kdf,
            dirty: false,
        })
    }

    // ── Save ─────────────────────────────────────────────────────────────

    /// Seal the current tree and write it to `path`.
    ///
    /// With `atomic`, the container is written to a temporary file in the
    /// destination directory, flushed and fsynced, and only then renamed
    /// over the target — a failure at any point leaves the original file
    /// byte-for-byte intact. With `backup`, an existing target is first
    /// copied to `<path>.bak`.
    pub fn save(&mut self, path: &Path, atomic: bool, backup: bool) -> CofferResult<()> {
        let container = self.seal_container()?;

        if backup && path.exists() {
            let backup_path = path.with_extension("bak");
            std::fs::copy(path, &backup_path)?;
            tracing::debug!(backup = %backup_path.display(), "backup written");
        }

        if atomic {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let mut tmp = tempfile::NamedTempFile::new_in(dir.unwrap_or(Path::new(".")))?;
            tmp.write_all(&container)?;
            tmp.flush()?;
            tmp.as_file().sync_all()?;
            tmp.persist(path).map_err(|e| CofferError::Io(e.error))?;
        } else {
            std::fs::write(path, &container)?;
        }

        self.dirty = false;
        tracing::info!(path = %path.display(), "database saved");
        Ok(())
    }

    /// Like `save`, but refuses to clobber an existing file unless
    /// `overwrite` is set.
    pub fn save_as(
        &mut self,
        path: &Path,
        overwrite: bool,
        atomic: bool,
        backup: bool,
    ) -> CofferResult<()> {
        if !overwrite && path.exists() {
            return Err(CofferError::Conflict(format!(
                "file already exists: {}",
                path.display()
            )));
        }
        self.save(path, atomic, backup)
    }

    fn seal_container(&self) -> CofferResult<Vec<u8>> {
        let key = self.key.as_ref().ok_or(CofferError::NoKey)?;
        if key.is_empty() {
            return Err(CofferError::NoKey);
        }

        let plaintext = serde_json::to_vec(&self.root)
            .map_err(|e| CofferError::Validation(format!("tree serialization: {e}")))?;

        let header = EnvelopeHeader::new(self.kdf.params());
        let header_bytes = container::encode_header(&header)?;

        let raw = key.raw_key()?;
        let master = self.kdf.transform(&raw)?;
        let sealed = seal(&plaintext, &master, &header_bytes)?;

        Ok(container::assemble(&header_bytes, &sealed))
    }

    // ── Tree lookups ─────────────────────────────────────────────────────

    pub fn group(&self, path: &str) -> CofferResult<&Group> {
        self.root
            .find_group_by_path(path)
            .ok_or_else(|| CofferError::NotFound(format!("group {path}")))
    }

    pub fn group_mut(&mut self, path: &str) -> CofferResult<&mut Group> {
        self.root
            .find_group_by_path_mut(path)
            .ok_or_else(|| CofferError::NotFound(format!("group {path}")))
    }

    pub fn entry(&self, path: &str) -> CofferResult<&Entry> {
        self.root
            .find_entry_by_path(path)
            .ok_or_else(|| CofferError::NotFound(format!("entry {path}")))
    }

    pub fn entry_mut(&mut self, path: &str) -> CofferResult<&mut Entry> {
        if self.root.find_entry_by_path(path).is_none() {
            return Err(CofferError::NotFound(format!("entry {path}")));
        }
        self.dirty = true;
        self.root
            .find_entry_by_path_mut(path)
            .ok_or_else(|| CofferError::NotFound(format!("entry {path}")))
    }

    // ── Structural mutations ─────────────────────────────────────────────

    /// Create a group at `path`, whose parent must already exist.
    pub fn create_group(&mut self, path: &str) -> CofferResult<uuid::Uuid> {
        if self.root.find_group_by_path(path).is_some() {
            return Err(CofferError::Conflict(format!("group {path}")));
        }
        let (parent_path, name) = split_parent(path)?;
        let parent = self.group_mut(parent_path)?;
        let group = Group::new(name);
        let uuid = group.uuid();
        parent.add_group(group);
        self.dirty = true;
        Ok(uuid)
    }

    /// Add an entry under the group at `group_path`. Entry titles are
    /// paths' last components, so duplicates within a group are refused.
    pub fn create_entry(&mut self, group_path: &str, entry: Entry) -> CofferResult<uuid::Uuid> {
        let group = self.group_mut(group_path)?;
        if group.entries().iter().any(|e| e.title() == entry.title()) {
            return Err(CofferError::Conflict(format!(
                "entry {}/{}",
                group_path.trim_matches('/'),
                entry.title()
            )));
        }
        let uuid = entry.uuid();
        group.add_entry(entry);
        self.dirty = true;
        Ok(uuid)
    }

    /// Move the group at `src_path` under `dst_parent_path`. Both child
    /// sequences are updated in one call; every precondition is checked
    /// before anything is detached, so a failure leaves the tree as it
    /// was. Moving a group into its own subtree is a cycle and is
    /// rejected.
    pub fn move_group(&mut self, src_path: &str, dst_parent_path: &str) -> CofferResult<()> {
        let src = normalize(src_path);
        let dst = normalize(dst_parent_path);
        if src.is_empty() {
            return Err(CofferError::Validation("cannot move the root group".into()));
        }
        if dst == src || dst.starts_with(&format!("{src}/")) {
            return Err(CofferError::Validation(format!(
                "cannot move {src} into its own subtree"
            )));
        }

        let (parent_path, name) = split_parent(&src)?;
        self.group(&src)?;
        let dst_group = self.group(&dst)?;
        if dst_group.groups().iter().any(|g| g.name() == name) {
            return Err(CofferError::Conflict(format!("group {dst}/{name}")));
        }

        let detached = self
            .group_mut(parent_path)?
            .remove_group_at(name)
            .ok_or_else(|| CofferError::NotFound(format!("group {src}")))?;
        self.group_mut(&dst)?.add_group(detached);
        self.dirty = true;
        Ok(())
    }

    /// Move the entry at `src_path` under the group at `dst_group_path`.
    pub fn move_entry(&mut self, src_path: &str, dst_group_path: &str) -> CofferResult<()> {
        let src = normalize(src_path);
        let (parent_path, title) = split_parent(&src)?;
        self.entry(&src)?;
        let dst_group = self.group(dst_group_path)?;
        if dst_group.entries().iter().any(|e| e.title() == title) {
            return Err(CofferError::Conflict(format!(
                "entry {}/{title}",
                normalize(dst_group_path)
            )));
        }

        let detached = self
            .group_mut(parent_path)?
            .remove_entry_at(title)
            .ok_or_else(|| CofferError::NotFound(format!("entry {src}")))?;
        self.group_mut(dst_group_path)?.add_entry(detached);
        self.dirty = true;
        Ok(())
    }

    /// Delete the group at `path` and its whole subtree.
    pub fn delete_group(&mut self, path: &str) -> CofferResult<Group> {
        let normalized = normalize(path);
        if normalized.is_empty() {
            return Err(CofferError::Validation(
                "cannot delete the root group".into(),
            ));
        }
        let (parent_path, name) = split_parent(&normalized)?;
        let removed = self
            .group_mut(parent_path)?
            .remove_group_at(name)
            .ok_or_else(|| CofferError::NotFound(format!("group {normalized}")))?;
        self.dirty = true;
        Ok(removed)
    }

    pub fn delete_entry(&mut self, path: &str) -> CofferResult<Entry> {
        let normalized = normalize(path);
        let (parent_path, title) = split_parent(&normalized)?;
        let removed = self
            .group_mut(parent_path)?
            .remove_entry_at(title)
            .ok_or_else(|| CofferError::NotFound(format!("entry {normalized}")))?;
        self.dirty = true;
        Ok(removed)
    }

    // ── Search and maintenance ───────────────────────────────────────────

    /// Resolve an entry's tree path from its uuid. Uuids are stable
    /// across renames and moves, so this is how path-agnostic callers
    /// (the broker) address entries.
    pub fn entry_path_by_uuid(&self, uuid: uuid::Uuid) -> Option<String> {
        self.root
            .entry_paths()
            .into_iter()
            .find(|(_, entry)| entry.uuid() == uuid)
            .map(|(path, _)| path)
    }

    /// Case-insensitive substring search over entry paths, sorted.
    pub fn locate(&self, term: &str) -> Vec<String> {
        let needle = term.to_lowercase();
        let mut matches: Vec<String> = self
            .root
            .entry_paths()
            .into_iter()
            .filter(|(path, _)| path.to_lowercase().contains(&needle))
            .map(|(path, _)| path)
            .collect();
        matches.sort();
        matches
    }

    /// Apply the history retention policy across every entry. Returns
    /// the number of snapshots removed.
    pub fn prune_history(&mut self, policy: &HistoryConfig) -> usize {
        let removed = prune_group(&mut self.root, policy);
        if removed > 0 {
            self.dirty = true;
            tracing::info!(removed, "history pruned");
        }
        removed
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

fn prune_group(group: &mut Group, policy: &HistoryConfig) -> usize {
    let mut removed = 0;
    for entry in group.entries_mut() {
        removed += entry.prune_history(policy);
    }
    for child in group.groups_mut() {
        removed += prune_group(child, policy);
    }
    removed
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Split a normalized, non-empty path into (parent path, last component).
fn split_parent(path: &str) -> CofferResult<(&str, &str)> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(CofferError::Validation("empty path".into()));
    }
    Ok(match trimmed.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", trimmed),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db() -> Database {
        let mut db = Database::new();
        db.create_group("Email").unwrap();
        db.create_group("Email/Work").unwrap();
        db.create_entry("Email", Entry::new("Gmail")).unwrap();
        db
    }

    #[test]
    fn test_create_group_requires_parent() {
        let mut db = Database::new();
        let result = db.create_group("Missing/Child");
        assert!(matches!(result, Err(CofferError::NotFound(_))));
    }

    #[test]
    fn test_create_duplicate_group_conflicts() {
        let mut db = sample_db();
        assert!(matches!(
            db.create_group("Email"),
            Err(CofferError::Conflict(_))
        ));
    }

    #[test]
    fn test_create_duplicate_entry_conflicts() {
        let mut db = sample_db();
        assert!(matches!(
            db.create_entry("Email", Entry::new("Gmail")),
            Err(CofferError::Conflict(_))
        ));
    }

    #[test]
    fn test_move_group_updates_both_parents() {
        let mut db = sample_db();
        db.create_group("Archive").unwrap();
        db.move_group("Email/Work", "Archive").unwrap();

        assert!(db.group("Archive/Work").is_ok());
        assert!(db.group("Email/Work").is_err());
    }

    #[test]
    fn test_move_group_into_own_subtree_rejected() {
        let mut db = sample_db();
        let result = db.move_group("Email", "Email/Work");
        assert!(matches!(result, Err(CofferError::Validation(_))));
        // tree unchanged
        assert!(db.group("Email/Work").is_ok());
    }

    #[test]
    fn test_move_root_rejected() {
        let mut db = sample_db();
        assert!(matches!(
            db.move_group("/", "Email"),
            Err(CofferError::Validation(_))
        ));
    }

    #[test]
    fn test_move_entry() {
        let mut db = sample_db();
        db.move_entry("Email/Gmail", "Email/Work").unwrap();
        assert!(db.entry("Email/Work/Gmail").is_ok());
        assert!(db.entry("Email/Gmail").is_err());
    }

    #[test]
    fn test_delete_group_removes_subtree() {
        let mut db = sample_db();
        db.delete_group("Email").unwrap();
        assert!(db.group("Email").is_err());
        assert!(db.entry("Email/Gmail").is_err());
    }

    #[test]
    fn test_delete_root_rejected() {
        let mut db = sample_db();
        assert!(matches!(
            db.delete_group("/"),
            Err(CofferError::Validation(_))
        ));
    }

    #[test]
    fn test_locate_is_case_insensitive_and_sorted() {
        let mut db = sample_db();
        db.create_entry("Email/Work", Entry::new("Gitlab")).unwrap();

        let hits = db.locate("g");
        assert_eq!(hits, vec!["Email/Gmail", "Email/Work/Gitlab"]);
        assert_eq!(db.locate("GMAIL"), vec!["Email/Gmail"]);
        assert!(db.locate("zzz").is_empty());
    }

    #[test]
    fn test_set_key_rejects_empty() {
        let mut db = Database::new();
        assert!(matches!(
            db.set_key(CompositeKey::new()),
            Err(CofferError::NoKey)
        ));
    }

    #[test]
    fn test_change_kdf_regenerates_salt_and_dirties() {
        let mut db = sample_db();
        let engine = KdfEngine::new(KdfParams::new(1024, 2, 1)).unwrap();
        let salt_before = engine.params().salt;

        db.change_kdf(engine);

        assert_ne!(db.kdf().params().salt, salt_before);
        assert_eq!(db.kdf().params().time_cost, 2);
        assert!(db.is_dirty());
    }
}
