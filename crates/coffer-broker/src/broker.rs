//! Broker state and the dispatch pipeline
//!
//! The broker owns the client registry, the collection registry (the
//! path table), the static method table, and the event channel. Each
//! registered database is wrapped in a mutex: the tree has a single
//! logical writer, and the mutex is what serializes concurrent callers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::SystemTime;

use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use coffer_core::config::BrokerConfig;
use coffer_core::{CofferError, CofferResult};
use coffer_db::Database;

use crate::dispatch::{rewrite_property_request, DispatchTable};
use crate::paths::{collection_path, item_path, parse_path, ParsedPath, PathKind};
use crate::wire::{self, WireType};

pub const IFACE_SERVICE: &str = "coffer.Service";
pub const IFACE_COLLECTION: &str = "coffer.Collection";
pub const IFACE_ITEM: &str = "coffer.Item";

/// One connected caller, keyed by its connection address. Created on
/// first dispatch, destroyed on disconnect; all of a caller's session
/// state hangs off this record.
#[derive(Debug)]
pub struct Client {
    pub address: String,
    pub connected_at: SystemTime,
}

/// The calling context handed to every handler. Explicit on purpose:
/// nested code learns who is calling from this value, not from any
/// ambient per-thread state.
pub struct CallCtx {
    pub client: Arc<Client>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    CollectionCreated { path: String },
    CollectionDeleted { path: String },
    ItemDeleted { path: String },
}

struct CollectionRecord {
    label: String,
    db: Arc<Mutex<Database>>,
}

pub struct Broker {
    collections: RwLock<HashMap<Uuid, CollectionRecord>>,
    clients: RwLock<HashMap<String, Arc<Client>>>,
    table: DispatchTable,
    events: broadcast::Sender<BrokerEvent>,
}

impl Broker {
    pub fn new(config: &BrokerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            collections: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
            table: build_table(),
            events,
        }
    }

    /// Subscribe to object lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }

    // ── Client sessions ──────────────────────────────────────────────────

    /// Look up the session for `address`, creating it on first contact.
    pub fn connect_client(&self, address: &str) -> Arc<Client> {
        if let Some(client) = lock_read(&self.clients).get(address) {
            return client.clone();
        }
        let client = Arc::new(Client {
            address: address.to_string(),
            connected_at: SystemTime::now(),
        });
        lock_write(&self.clients).insert(address.to_string(), client.clone());
        tracing::debug!(address, "client connected");
        client
    }

    /// Drop the session for `address` and everything it holds.
    pub fn disconnect_client(&self, address: &str) -> bool {
        let removed = lock_write(&self.clients).remove(address).is_some();
        if removed {
            tracing::debug!(address, "client disconnected");
        }
        removed
    }

    pub fn clients(&self) -> Vec<Arc<Client>> {
        lock_read(&self.clients).values().cloned().collect()
    }

    // ── Object registration ──────────────────────────────────────────────

    /// Expose a database under a fresh collection path.
    pub fn register_collection(&self, label: impl Into<String>, db: Database) -> String {
        let id = Uuid::new_v4();
        let path = collection_path(id);
        lock_write(&self.collections).insert(
            id,
            CollectionRecord {
                label: label.into(),
                db: Arc::new(Mutex::new(db)),
            },
        );
        tracing::info!(path, "collection registered");
        self.emit(BrokerEvent::CollectionCreated { path: path.clone() });
        path
    }

    /// Remove a collection object; its path stops resolving and
    /// subscribers are notified of the deletion.
    pub fn unregister_collection(&self, path: &str) -> CofferResult<()> {
        let parsed = parse_path(path)
            .filter(|p| p.kind == PathKind::Collection)
            .ok_or_else(|| CofferError::NotFound(format!("object {path}")))?;
        let id = collection_id(&parsed)?;
        if lock_write(&self.collections).remove(&id).is_none() {
            return Err(CofferError::NotFound(format!("object {path}")));
        }
        tracing::info!(path, "collection unregistered");
        self.emit(BrokerEvent::CollectionDeleted {
            path: path.to_string(),
        });
        Ok(())
    }

    // ── Dispatch ─────────────────────────────────────────────────────────

    /// The full method-delivery pipeline. Every rejection — unknown
    /// path, unsupported interface, unknown member, argument-shape
    /// mismatch — happens before the handler runs, so a call is either
    /// fully applied or not at all.
    pub fn dispatch(
        &self,
        caller: &str,
        path: &str,
        interface: &str,
        member: &str,
        args: &[Value],
    ) -> CofferResult<Value> {
        let client = self.connect_client(caller);
        let ctx = CallCtx { client };

        let parsed =
            parse_path(path).ok_or_else(|| CofferError::NotFound(format!("object {path}")))?;

        if supported_interface(parsed.kind) != interface {
            return Err(CofferError::Broker(format!(
                "object {path} does not implement {interface}"
            )));
        }

        self.check_object_exists(&parsed, path)?;

        let call = match rewrite_property_request(member, args)? {
            Some((property_member, property_args)) => (property_member, property_args),
            None => (member.to_string(), args.to_vec()),
        };
        let (member, args) = (&call.0, call.1.as_slice());

        let spec = self.table.lookup(interface, member)?;
        wire::check_args(member, &spec.args, args)?;

        tracing::debug!(caller = %ctx.client.address, path, member, "dispatching");
        (spec.handler)(self, &ctx, &parsed, args)
    }

    fn check_object_exists(&self, parsed: &ParsedPath, path: &str) -> CofferResult<()> {
        match parsed.kind {
            PathKind::Service => Ok(()),
            PathKind::Collection => {
                self.collection_db(parsed)?;
                Ok(())
            }
            PathKind::Item => {
                let db = self.collection_db(parsed)?;
                let item = item_id(parsed)?;
                let db = lock_mutex(&db);
                db.entry_path_by_uuid(item)
                    .map(|_| ())
                    .ok_or_else(|| CofferError::NotFound(format!("object {path}")))
            }
        }
    }

    fn collection_db(&self, parsed: &ParsedPath) -> CofferResult<Arc<Mutex<Database>>> {
        let id = collection_id(parsed)?;
        lock_read(&self.collections)
            .get(&id)
            .map(|record| record.db.clone())
            .ok_or_else(|| CofferError::NotFound(format!("object {}", collection_path(id))))
    }

    fn emit(&self, event: BrokerEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

fn collection_id(parsed: &ParsedPath) -> CofferResult<Uuid> {
    parsed
        .collection
        .ok_or_else(|| CofferError::Broker("collection path without an id".into()))
}

fn item_id(parsed: &ParsedPath) -> CofferResult<Uuid> {
    parsed
        .item
        .ok_or_else(|| CofferError::Broker("item path without an id".into()))
}

fn supported_interface(kind: PathKind) -> &'static str {
    match kind {
        PathKind::Service => IFACE_SERVICE,
        PathKind::Collection => IFACE_COLLECTION,
        PathKind::Item => IFACE_ITEM,
    }
}

// Lock helpers: a poisoned lock means another thread panicked while
// holding broker state, which is a fail-fast condition.
fn lock_read<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockReadGuard<'a, T> {
    lock.read().expect("broker lock poisoned")
}

fn lock_write<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockWriteGuard<'a, T> {
    lock.write().expect("broker lock poisoned")
}

fn lock_mutex<'a, T>(lock: &'a Mutex<T>) -> MutexGuard<'a, T> {
    lock.lock().expect("database lock poisoned")
}

// ── Method table ─────────────────────────────────────────────────────────

fn build_table() -> DispatchTable {
    let mut table = DispatchTable::new();

    // coffer.Service
    table.register(IFACE_SERVICE, "ListCollections", vec![], Box::new(service_list));
    table.register(IFACE_SERVICE, "Get:Collections", vec![], Box::new(service_list));

    // coffer.Collection
    table.register(IFACE_COLLECTION, "ListEntries", vec![], Box::new(collection_list));
    table.register(
        IFACE_COLLECTION,
        "SearchEntries",
        vec![WireType::Str],
        Box::new(collection_search),
    );
    table.register(
        IFACE_COLLECTION,
        "CreateEntry",
        vec![WireType::Str, WireType::Str],
        Box::new(collection_create_entry),
    );
    table.register(IFACE_COLLECTION, "GetAll", vec![], Box::new(collection_get_all));
    table.register(IFACE_COLLECTION, "Get:Label", vec![], Box::new(collection_get_label));
    table.register(
        IFACE_COLLECTION,
        "Set:Label",
        vec![WireType::Str],
        Box::new(collection_set_label),
    );

    // coffer.Item
    table.register(IFACE_ITEM, "GetSecret", vec![], Box::new(item_get_secret));
    table.register(IFACE_ITEM, "GetAttributes", vec![], Box::new(item_get_attributes));
    table.register(
        IFACE_ITEM,
        "SetAttribute",
        vec![WireType::Str, WireType::Str, WireType::Bool],
        Box::new(item_set_attribute),
    );
    table.register(IFACE_ITEM, "Delete", vec![], Box::new(item_delete));
    table.register(IFACE_ITEM, "GetAll", vec![], Box::new(item_get_attributes));
    table.register(IFACE_ITEM, "Get:Title", vec![], Box::new(item_get_title));

    table
}

fn service_list(
    broker: &Broker,
    _ctx: &CallCtx,
    _parsed: &ParsedPath,
    _args: &[Value],
) -> CofferResult<Value> {
    let mut paths: Vec<String> = lock_read(&broker.collections)
        .keys()
        .map(|id| collection_path(*id))
        .collect();
    paths.sort();
    Ok(json!(paths))
}

fn collection_list(
    broker: &Broker,
    _ctx: &CallCtx,
    parsed: &ParsedPath,
    _args: &[Value],
) -> CofferResult<Value> {
    let collection = collection_id(parsed)?;
    let db = broker.collection_db(parsed)?;
    let db = lock_mutex(&db);
    let mut items: Vec<(String, String)> = db
        .root()
        .entry_paths()
        .into_iter()
        .map(|(path, entry)| (path, item_path(collection, entry.uuid())))
        .collect();
    items.sort();
    Ok(json!(items
        .into_iter()
        .map(|(_, object)| object)
        .collect::<Vec<_>>()))
}

fn collection_search(
    broker: &Broker,
    _ctx: &CallCtx,
    parsed: &ParsedPath,
    args: &[Value],
) -> CofferResult<Value> {
    let term = wire::str_arg(args, 0)?.to_lowercase();
    let collection = collection_id(parsed)?;
    let db = broker.collection_db(parsed)?;
    let db = lock_mutex(&db);
    let mut hits: Vec<(String, String)> = db
        .root()
        .entry_paths()
        .into_iter()
        .filter(|(path, _)| path.to_lowercase().contains(&term))
        .map(|(path, entry)| (path, item_path(collection, entry.uuid())))
        .collect();
    hits.sort();
    Ok(json!(hits
        .into_iter()
        .map(|(_, object)| object)
        .collect::<Vec<_>>()))
}

fn collection_create_entry(
    broker: &Broker,
    ctx: &CallCtx,
    parsed: &ParsedPath,
    args: &[Value],
) -> CofferResult<Value> {
    let group_path = wire::str_arg(args, 0)?;
    let title = wire::str_arg(args, 1)?;
    let collection = collection_id(parsed)?;

    let db = broker.collection_db(parsed)?;
    let mut db = lock_mutex(&db);
    let uuid = db.create_entry(group_path, coffer_db::Entry::new(title))?;

    tracing::info!(caller = %ctx.client.address, title, "entry created via broker");
    Ok(json!(item_path(collection, uuid)))
}

fn collection_get_all(
    broker: &Broker,
    _ctx: &CallCtx,
    parsed: &ParsedPath,
    _args: &[Value],
) -> CofferResult<Value> {
    let id = collection_id(parsed)?;
    let collections = lock_read(&broker.collections);
    let record = collections
        .get(&id)
        .ok_or_else(|| CofferError::NotFound(format!("object {}", collection_path(id))))?;
    let entry_count = lock_mutex(&record.db).root().entry_paths().len();
    Ok(json!({
        "Label": record.label,
        "EntryCount": entry_count,
    }))
}

fn collection_get_label(
    broker: &Broker,
    _ctx: &CallCtx,
    parsed: &ParsedPath,
    _args: &[Value],
) -> CofferResult<Value> {
    let id = collection_id(parsed)?;
    let collections = lock_read(&broker.collections);
    let record = collections
        .get(&id)
        .ok_or_else(|| CofferError::NotFound(format!("object {}", collection_path(id))))?;
    Ok(json!(record.label))
}

fn collection_set_label(
    broker: &Broker,
    _ctx: &CallCtx,
    parsed: &ParsedPath,
    args: &[Value],
) -> CofferResult<Value> {
    let label = wire::str_arg(args, 0)?;
    let id = collection_id(parsed)?;
    let mut collections = lock_write(&broker.collections);
    let record = collections
        .get_mut(&id)
        .ok_or_else(|| CofferError::NotFound(format!("object {}", collection_path(id))))?;
    record.label = label.to_string();
    Ok(Value::Null)
}

fn item_get_secret(
    broker: &Broker,
    _ctx: &CallCtx,
    parsed: &ParsedPath,
    _args: &[Value],
) -> CofferResult<Value> {
    with_item(broker, parsed, |_path, entry| Ok(json!(entry.password())))
}

fn item_get_title(
    broker: &Broker,
    _ctx: &CallCtx,
    parsed: &ParsedPath,
    _args: &[Value],
) -> CofferResult<Value> {
    with_item(broker, parsed, |_path, entry| Ok(json!(entry.title())))
}

/// Attribute view of an item. Protected custom attributes are excluded
/// entirely — their values travel only through `GetSecret`-grade calls.
fn item_get_attributes(
    broker: &Broker,
    _ctx: &CallCtx,
    parsed: &ParsedPath,
    _args: &[Value],
) -> CofferResult<Value> {
    with_item(broker, parsed, |_path, entry| {
        let mut map = Map::new();
        map.insert("Title".into(), json!(entry.title()));
        map.insert("Username".into(), json!(entry.username()));
        map.insert("Url".into(), json!(entry.url()));
        map.insert("Notes".into(), json!(entry.notes()));
        for attr in entry.attributes().iter().filter(|a| !a.protected) {
            map.insert(attr.key.clone(), json!(attr.value));
        }
        Ok(Value::Object(map))
    })
}

fn item_set_attribute(
    broker: &Broker,
    _ctx: &CallCtx,
    parsed: &ParsedPath,
    args: &[Value],
) -> CofferResult<Value> {
    let key = wire::str_arg(args, 0)?.to_string();
    let value = wire::str_arg(args, 1)?.to_string();
    let protected = wire::bool_arg(args, 2)?;

    let item = item_id(parsed)?;
    let db = broker.collection_db(parsed)?;
    let mut db = lock_mutex(&db);
    let path = db
        .entry_path_by_uuid(item)
        .ok_or_else(|| CofferError::NotFound(format!("item {item}")))?;
    let entry = db.entry_mut(&path)?;
    entry.begin_update();
    entry.set_attribute(key, value, protected);
    entry.end_update();
    Ok(Value::Null)
}

fn item_delete(
    broker: &Broker,
    ctx: &CallCtx,
    parsed: &ParsedPath,
    _args: &[Value],
) -> CofferResult<Value> {
    let collection = collection_id(parsed)?;
    let item = item_id(parsed)?;

    let db = broker.collection_db(parsed)?;
    {
        let mut db = lock_mutex(&db);
        let path = db
            .entry_path_by_uuid(item)
            .ok_or_else(|| CofferError::NotFound(format!("item {item}")))?;
        db.delete_entry(&path)?;
    }

    let object = item_path(collection, item);
    tracing::info!(caller = %ctx.client.address, path = %object, "entry deleted via broker");
    broker.emit(BrokerEvent::ItemDeleted { path: object });
    Ok(Value::Null)
}

fn with_item<T>(
    broker: &Broker,
    parsed: &ParsedPath,
    f: impl FnOnce(&str, &coffer_db::Entry) -> CofferResult<T>,
) -> CofferResult<T> {
    let item = item_id(parsed)?;
    let db = broker.collection_db(parsed)?;
    let db = lock_mutex(&db);
    let path = db
        .entry_path_by_uuid(item)
        .ok_or_else(|| CofferError::NotFound(format!("item {item}")))?;
    let entry = db.entry(&path)?;
    f(&path, entry)
}
