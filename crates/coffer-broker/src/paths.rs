//! Object path grammar
//!
//! ```text
//! /coffer/service                         the service root
//! /coffer/collection/{uuid}               one registered database
//! /coffer/collection/{uuid}/{uuid}        one entry within it
//! ```
//!
//! Paths are stable: a collection keeps its path for the lifetime of its
//! registration, an item for the lifetime of its entry.

use uuid::Uuid;

pub const SERVICE_PATH: &str = "/coffer/service";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Service,
    Collection,
    Item,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedPath {
    pub kind: PathKind,
    pub collection: Option<Uuid>,
    pub item: Option<Uuid>,
}

/// Parse an object path. Returns `None` for anything outside the
/// grammar — the dispatcher turns that into a not-found rejection.
pub fn parse_path(path: &str) -> Option<ParsedPath> {
    if path == SERVICE_PATH {
        return Some(ParsedPath {
            kind: PathKind::Service,
            collection: None,
            item: None,
        });
    }

    let rest = path.strip_prefix("/coffer/collection/")?;
    let mut segments = rest.split('/');
    let collection = Uuid::parse_str(segments.next()?).ok()?;
    match segments.next() {
        None => Some(ParsedPath {
            kind: PathKind::Collection,
            collection: Some(collection),
            item: None,
        }),
        Some(item_segment) => {
            let item = Uuid::parse_str(item_segment).ok()?;
            if segments.next().is_some() {
                return None;
            }
            Some(ParsedPath {
                kind: PathKind::Item,
                collection: Some(collection),
                item: Some(item),
            })
        }
    }
}

pub fn collection_path(collection: Uuid) -> String {
    format!("/coffer/collection/{collection}")
}

pub fn item_path(collection: Uuid, item: Uuid) -> String {
    format!("/coffer/collection/{collection}/{item}")
}
