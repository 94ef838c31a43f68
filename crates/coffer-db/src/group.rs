//! Groups: the owned credential tree
//!
//! A group owns its child groups and entries outright; there is no parent
//! back-pointer. Reparenting and deletion go through the Database, which
//! resolves both endpoints by path and splices the owned subtree — that
//! keeps "exactly one owner per node" a property of the types rather
//! than an invariant to police.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use uuid::Uuid;

use crate::entry::{Entry, TimeInfo};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    uuid: Uuid,
    name: String,
    groups: Vec<Group>,
    entries: Vec<Entry>,
    times: TimeInfo,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            groups: Vec::new(),
            entries: Vec::new(),
            times: TimeInfo::now(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename in place; the uuid is stable across renames.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn times(&self) -> TimeInfo {
        self.times
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries.iter_mut()
    }

    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut Group> {
        self.groups.iter_mut()
    }

    pub fn add_group(&mut self, group: Group) {
        self.groups.push(group);
    }

    pub fn add_entry(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    // ── Path resolution ──────────────────────────────────────────────────
    //
    // Paths are `/`-separated, matched case-sensitively component by
    // component. The first exact structural match wins; a failed
    // component fails the whole lookup — no partial or fuzzy matching.

    /// Resolve a group path relative to this group. `"/"` (or the empty
    /// path) resolves to this group itself.
    pub fn find_group_by_path(&self, path: &str) -> Option<&Group> {
        let mut current = self;
        for component in split_path(path) {
            current = current.groups.iter().find(|g| g.name == component)?;
        }
        Some(current)
    }

    pub fn find_group_by_path_mut(&mut self, path: &str) -> Option<&mut Group> {
        let mut current = self;
        for component in split_path(path) {
            current = current.groups.iter_mut().find(|g| g.name == component)?;
        }
        Some(current)
    }

    /// Resolve an entry path: every component but the last names a group,
    /// the last names an entry title within it.
    pub fn find_entry_by_path(&self, path: &str) -> Option<&Entry> {
        let (parent, title) = split_entry_path(path)?;
        let group = self.find_group_by_path(parent)?;
        group.entries.iter().find(|e| e.title() == title)
    }

    pub fn find_entry_by_path_mut(&mut self, path: &str) -> Option<&mut Entry> {
        let (parent, title) = split_entry_path(path)?;
        let group = self.find_group_by_path_mut(parent)?;
        group.entries.iter_mut().find(|e| e.title() == title)
    }

    pub fn remove_group_at(&mut self, name: &str) -> Option<Group> {
        let idx = self.groups.iter().position(|g| g.name == name)?;
        Some(self.groups.remove(idx))
    }

    pub fn remove_entry_at(&mut self, title: &str) -> Option<Entry> {
        let idx = self.entries.iter().position(|e| e.title() == title)?;
        Some(self.entries.remove(idx))
    }

    // ── Listing ──────────────────────────────────────────────────────────

    /// Render this group's contents for display.
    ///
    /// Non-recursive shows direct children only; recursive walks the full
    /// subtree. `flatten` switches from an indented tree to one
    /// path-per-line. Group lines carry a trailing `/`.
    pub fn print(&self, recursive: bool, flatten: bool) -> String {
        let mut out = String::new();
        if flatten {
            self.print_flat(&mut out, "", recursive);
        } else {
            self.print_tree(&mut out, 0, recursive);
        }
        out
    }

    fn print_tree(&self, out: &mut String, depth: usize, recursive: bool) {
        for group in &self.groups {
            let _ = writeln!(out, "{}{}/", "  ".repeat(depth), group.name);
            if recursive {
                group.print_tree(out, depth + 1, recursive);
            }
        }
        for entry in &self.entries {
            let _ = writeln!(out, "{}{}", "  ".repeat(depth), entry.title());
        }
    }

    fn print_flat(&self, out: &mut String, prefix: &str, recursive: bool) {
        for group in &self.groups {
            let path = format!("{prefix}{}/", group.name);
            let _ = writeln!(out, "{path}");
            if recursive {
                group.print_flat(out, &path, recursive);
            }
        }
        for entry in &self.entries {
            let _ = writeln!(out, "{prefix}{}", entry.title());
        }
    }

    /// Collect `(path, &Entry)` pairs for the whole subtree, with paths
    /// relative to this group.
    pub fn entry_paths(&self) -> Vec<(String, &Entry)> {
        let mut acc = Vec::new();
        self.collect_entry_paths("", &mut acc);
        acc
    }

    fn collect_entry_paths<'a>(&'a self, prefix: &str, acc: &mut Vec<(String, &'a Entry)>) {
        for entry in &self.entries {
            acc.push((format!("{prefix}{}", entry.title()), entry));
        }
        for group in &self.groups {
            group.collect_entry_paths(&format!("{prefix}{}/", group.name), acc);
        }
    }
}

/// Split a group path into components, treating `/`, `""`, and
/// surrounding slashes uniformly: `"/A/B/"` → `["A", "B"]`.
fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Split an entry path into (parent group path, entry title). Fails on
/// paths with no final component.
fn split_entry_path(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    Some(match trimmed.rsplit_once('/') {
        Some((parent, title)) => (parent, title),
        None => ("", trimmed),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Group {
        let mut root = Group::new("Root");
        let mut email = Group::new("Email");
        let mut work = Group::new("Work");

        let mut gmail = Entry::new("Gmail");
        gmail.set_username("me");
        email.add_entry(gmail);

        work.add_entry(Entry::new("VPN"));
        email.add_group(work);
        root.add_group(email);
        root.add_entry(Entry::new("Toplevel"));
        root
    }

    #[test]
    fn test_root_path_resolves_to_self() {
        let root = sample_tree();
        assert_eq!(root.find_group_by_path("/").unwrap().uuid(), root.uuid());
        assert_eq!(root.find_group_by_path("").unwrap().uuid(), root.uuid());
    }

    #[test]
    fn test_nested_group_resolution() {
        let root = sample_tree();
        let work = root.find_group_by_path("Email/Work").unwrap();
        assert_eq!(work.name(), "Work");
        // leading/trailing slashes are tolerated
        assert!(root.find_group_by_path("/Email/Work/").is_some());
    }

    #[test]
    fn test_partial_match_is_not_found() {
        let root = sample_tree();
        assert!(root.find_group_by_path("Email/Missing").is_none());
        assert!(root.find_group_by_path("email").is_none(), "case-sensitive");
    }

    #[test]
    fn test_entry_resolution() {
        let root = sample_tree();
        let gmail = root.find_entry_by_path("Email/Gmail").unwrap();
        assert_eq!(gmail.username(), "me");

        assert!(root.find_entry_by_path("Toplevel").is_some());
        assert!(root.find_entry_by_path("Email/Absent").is_none());
        assert!(root.find_entry_by_path("/").is_none());
    }

    #[test]
    fn test_print_non_recursive_shows_direct_children() {
        let root = sample_tree();
        let listing = root.print(false, false);
        assert_eq!(listing, "Email/\nToplevel\n");
    }

    #[test]
    fn test_print_recursive_tree_indents() {
        let root = sample_tree();
        let listing = root.print(true, false);
        assert_eq!(
            listing,
            "Email/\n  Work/\n    VPN\n  Gmail\nToplevel\n"
        );
    }

    #[test]
    fn test_print_recursive_flat_emits_paths() {
        let root = sample_tree();
        let listing = root.print(true, true);
        assert_eq!(
            listing,
            "Email/\nEmail/Work/\nEmail/Work/VPN\nEmail/Gmail\nToplevel\n"
        );
    }

    #[test]
    fn test_entry_paths_covers_subtree() {
        let root = sample_tree();
        let paths: Vec<String> = root.entry_paths().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["Toplevel", "Email/Gmail", "Email/Work/VPN"]);
    }
}
