use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encode error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type SubscriptionId = u64;

type Callback = Arc<dyn Fn(Option<Value>) + Send + Sync>;

struct Subscriber {
    segments: Vec<String>,
    callback: Callback,
}

/// Path-addressed JSON tree with change subscriptions.
///
/// Paths are `/`-separated segments ("credentials/u1/password"); the empty path
/// addresses the whole tree. Writes replace the addressed subtree, creating
/// intermediate objects as needed; a null write removes it. Subscribers fire
/// once with the current value on registration and then after every write at,
/// above, or below their path.
pub struct TreeStore {
    dir: Option<PathBuf>,
    root: RwLock<Value>,
    subs: RwLock<HashMap<SubscriptionId, Subscriber>>,
    next_sub: AtomicU64,
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect()
}

fn node_at<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut cur = root;
    for seg in segments {
        cur = cur.as_object()?.get(seg)?;
    }
    Some(cur)
}

/// True when a write at `written` is observable from a subscription at `watched`
/// (one path is a prefix of the other, or they are equal).
fn paths_related(watched: &[String], written: &[String]) -> bool {
    let n = watched.len().min(written.len());
    watched[..n] == written[..n]
}

impl TreeStore {
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            root: RwLock::new(Value::Object(Map::new())),
            subs: RwLock::new(HashMap::new()),
            next_sub: AtomicU64::new(1),
        }
    }

    /// Open a store rooted at `dir`, loading `snapshot.json` when present.
    /// A corrupt snapshot is logged and ignored so startup always succeeds.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let snap = dir.join("snapshot.json");
        let root = match std::fs::read(&snap) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(v) if v.is_object() => v,
                Ok(_) | Err(_) => {
                    tracing::warn!(path = %snap.display(), "ignoring unreadable store snapshot");
                    Value::Object(Map::new())
                }
            },
            Err(_) => Value::Object(Map::new()),
        };
        Ok(Self {
            dir: Some(dir),
            root: RwLock::new(root),
            subs: RwLock::new(HashMap::new()),
            next_sub: AtomicU64::new(1),
        })
    }

    fn snapshot_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join("snapshot.json"))
    }

    fn save_snapshot(&self, root: &Value) -> Result<(), StoreError> {
        let Some(path) = self.snapshot_path() else { return Ok(()); };
        let bytes = serde_json::to_vec_pretty(root)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }

    /// One-shot read of the subtree at `path`; `None` when the path is absent.
    pub fn read_once(&self, path: &str) -> Option<Value> {
        let segments = split_path(path);
        let root = self.root.read();
        node_at(&root, &segments).cloned()
    }

    /// Replace (`Some`) or delete (`None`) the subtree at `path`, persist the
    /// snapshot, then notify affected subscribers. Last write wins; there is no
    /// merging and no transaction. The in-memory tree is authoritative: when
    /// snapshot persistence fails the mutation stays applied and subscribers
    /// are still notified; the returned error reports the persistence failure.
    pub fn write(&self, path: &str, value: Option<Value>) -> Result<(), StoreError> {
        let segments = split_path(path);
        let saved = {
            let mut root = self.root.write();
            match value {
                Some(v) => set_node(&mut root, &segments, v),
                None => remove_node(&mut root, &segments),
            }
            self.save_snapshot(&root)
        };
        if let Err(e) = &saved {
            tracing::warn!("snapshot save failed, in-memory state kept: {e}");
        }
        self.notify(&segments);
        saved
    }

    /// Register `callback` for changes at `path`. Fires immediately with the
    /// current value, matching the realtime-database onValue contract.
    pub fn subscribe<F>(&self, path: &str, callback: F) -> SubscriptionId
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        let segments = split_path(path);
        let cb: Callback = Arc::new(callback);
        let id = self.next_sub.fetch_add(1, Ordering::Relaxed);
        let current = self.read_once(path);
        self.subs.write().insert(id, Subscriber { segments, callback: cb.clone() });
        cb(current);
        id
    }

    /// Drop a subscription. Unknown ids are ignored so teardown paths can call
    /// this exactly once without tracking registration success.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subs.write().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.read().len()
    }

    fn notify(&self, written: &[String]) {
        // Snapshot the interested callbacks and their values, then invoke them
        // with no locks held so a callback may re-enter the store.
        let pending: Vec<(Callback, Option<Value>)> = {
            let root = self.root.read();
            let subs = self.subs.read();
            subs.values()
                .filter(|s| paths_related(&s.segments, written))
                .map(|s| (s.callback.clone(), node_at(&root, &s.segments).cloned()))
                .collect()
        };
        for (cb, val) in pending {
            cb(val);
        }
    }
}

fn set_node(root: &mut Value, segments: &[String], value: Value) {
    if segments.is_empty() {
        *root = value;
        return;
    }
    let mut cur = root;
    for seg in &segments[..segments.len() - 1] {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        let map = cur.as_object_mut().unwrap();
        cur = map.entry(seg.clone()).or_insert_with(|| Value::Object(Map::new()));
    }
    if !cur.is_object() {
        *cur = Value::Object(Map::new());
    }
    cur.as_object_mut()
        .unwrap()
        .insert(segments[segments.len() - 1].clone(), value);
}

fn remove_node(root: &mut Value, segments: &[String]) {
    if segments.is_empty() {
        *root = Value::Object(Map::new());
        return;
    }
    let mut cur = root;
    for seg in &segments[..segments.len() - 1] {
        match cur.as_object_mut().and_then(|m| m.get_mut(seg)) {
            Some(next) => cur = next,
            None => return,
        }
    }
    if let Some(map) = cur.as_object_mut() {
        map.remove(&segments[segments.len() - 1]);
    }
}
