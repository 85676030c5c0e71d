use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, trace};

use super::{ResourceStore, StoreError};
use crate::children::{ChildKind, ChildObject, ObjectKey};
use crate::crd::{TestCluster, TestClusterStatus, decode_request};
use crate::templates::Manifest;

const EVENT_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WatchKind {
    Request,
    Child(ChildKind),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    Applied { kind: WatchKind, key: ObjectKey },
    Deleted { kind: WatchKind, key: ObjectKey },
}

type Slot = (WatchKind, ObjectKey);

/// Store operations that can be made to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    CreateChild,
    RemoveOwnerReferences,
    DeleteRequest,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Slot, Value>,
    version: u64,
    uid_seq: u64,
    injected_conflicts: usize,
    /// Calls to let through, then calls to fail.
    injected_failures: HashMap<StoreOp, (usize, usize)>,
}

fn uid_of(obj: &Value) -> Option<&str> {
    obj.pointer("/metadata/uid").and_then(Value::as_str)
}

fn owner_uids(obj: &Value) -> Vec<String> {
    obj.pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .map(|refs| {
            refs.iter()
                .filter_map(|r| r.get("uid").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn resource_version(obj: &Value) -> Option<&str> {
    obj.pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
}

impl Inner {
    fn take_failure(&mut self, op: StoreOp) -> Result<(), StoreError> {
        let Some((pass, fail)) = self.injected_failures.get_mut(&op) else {
            return Ok(());
        };
        if *pass > 0 {
            *pass -= 1;
            return Ok(());
        }
        if *fail > 0 {
            *fail -= 1;
            return Err(StoreError::Unavailable(format!("injected {op:?} failure")));
        }
        Ok(())
    }

    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn next_uid(&mut self) -> String {
        self.uid_seq += 1;
        format!("uid-{:06}", self.uid_seq)
    }

    /// Stamp identity fields on a new object.
    fn admit(&mut self, mut obj: Value, namespace: &str) -> Value {
        let version = self.next_version();
        let uid = self.next_uid();
        if let Some(meta) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.insert("namespace".into(), json!(namespace));
            meta.insert("resourceVersion".into(), json!(version));
            meta.entry("uid").or_insert(json!(uid));
        }
        obj
    }

    fn touch(&mut self, slot: &Slot) -> Option<&mut Value> {
        let version = self.next_version();
        let obj = self.objects.get_mut(slot)?;
        if let Some(meta) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.insert("resourceVersion".into(), json!(version));
        }
        Some(obj)
    }

    fn live_uids(&self) -> HashSet<String> {
        self.objects
            .values()
            .filter_map(uid_of)
            .map(str::to_string)
            .collect()
    }

    /// Owner uid → objects that list it as an owner.
    fn dependents_index(&self) -> HashMap<String, Vec<Slot>> {
        let mut index: HashMap<String, Vec<Slot>> = HashMap::new();
        for (slot, obj) in &self.objects {
            for uid in owner_uids(obj) {
                index.entry(uid).or_default().push(slot.clone());
            }
        }
        index
    }

    fn is_orphan(&self, obj: &Value, live: &HashSet<String>) -> bool {
        let owners = owner_uids(obj);
        !owners.is_empty() && owners.iter().all(|u| !live.contains(u))
    }

    /// Remove `root` and every dependent left without a live owner.
    fn remove_cascading(&mut self, root: Slot) -> Vec<Slot> {
        let mut removed = Vec::new();
        let mut queue = VecDeque::from([root]);
        while let Some(slot) = queue.pop_front() {
            let Some(obj) = self.objects.remove(&slot) else {
                continue;
            };
            removed.push(slot);
            let Some(uid) = uid_of(&obj) else {
                continue;
            };
            let index = self.dependents_index();
            let live = self.live_uids();
            for dep in index.get(uid).into_iter().flatten() {
                if let Some(dep_obj) = self.objects.get(dep) {
                    if self.is_orphan(dep_obj, &live) {
                        queue.push_back(dep.clone());
                    }
                }
            }
        }
        removed
    }
}

/// In-process [`ResourceStore`] with Kubernetes-like semantics: resource
/// versions, uids, owner-based garbage collection and a broadcast watch.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn watch(&self) -> BroadcastStream<StoreEvent> {
        BroadcastStream::new(self.subscribe())
    }

    fn emit(&self, event: StoreEvent) {
        trace!(?event, "store event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_deleted(&self, removed: Vec<Slot>) {
        for (kind, key) in removed {
            self.emit(StoreEvent::Deleted { kind, key });
        }
    }

    /// Insert a Request of any served version. Identity fields are assigned
    /// by the store.
    pub async fn insert_request<T: Serialize>(
        &self,
        request: &T,
    ) -> Result<TestCluster, StoreError> {
        let value = serde_json::to_value(request)?;
        let parsed = decode_request(value.clone())?;
        let key = parsed.key();
        let mut inner = self.inner.write().await;
        let slot = (WatchKind::Request, key.clone());
        if inner.objects.contains_key(&slot) {
            return Err(StoreError::AlreadyExists {
                kind: "TestCluster".into(),
                key,
            });
        }
        let stored = inner.admit(value, &key.namespace);
        let out = decode_request(stored.clone())?;
        inner.objects.insert(slot, stored);
        drop(inner);
        self.emit(StoreEvent::Applied {
            kind: WatchKind::Request,
            key,
        });
        Ok(out)
    }

    /// Insert an arbitrary child object (used for objects this operator did
    /// not create, e.g. with foreign or multiple owners).
    pub async fn insert_child(
        &self,
        kind: ChildKind,
        object: Value,
    ) -> Result<ChildObject, StoreError> {
        let decoded = ChildObject::from_value(kind, &object)?;
        let key = decoded.key().ok_or_else(|| {
            StoreError::InvalidObject(format!("{kind} without a name"))
        })?;
        let mut inner = self.inner.write().await;
        let slot = (WatchKind::Child(kind), key.clone());
        if inner.objects.contains_key(&slot) {
            return Err(StoreError::AlreadyExists {
                kind: kind.to_string(),
                key,
            });
        }
        let mut object = object;
        if let Some(obj) = object.as_object_mut() {
            obj.insert("apiVersion".into(), json!(kind.api_version()));
            obj.insert("kind".into(), json!(kind.kind()));
        }
        let stored = inner.admit(object, &key.namespace);
        let out = ChildObject::from_value(kind, &stored)?;
        inner.objects.insert(slot, stored);
        drop(inner);
        self.emit(StoreEvent::Applied {
            kind: WatchKind::Child(kind),
            key,
        });
        Ok(out)
    }

    /// Replace a child's `status`, as the external controller managing that
    /// resource would.
    pub async fn set_child_status(
        &self,
        kind: ChildKind,
        key: &ObjectKey,
        status: Value,
    ) -> Result<(), StoreError> {
        let slot = (WatchKind::Child(kind), key.clone());
        let mut inner = self.inner.write().await;
        let obj = inner.touch(&slot).ok_or_else(|| StoreError::NotFound {
            kind: kind.to_string(),
            key: key.clone(),
        })?;
        if let Some(map) = obj.as_object_mut() {
            map.insert("status".into(), status);
        }
        drop(inner);
        self.emit(StoreEvent::Applied {
            kind: WatchKind::Child(kind),
            key: key.clone(),
        });
        Ok(())
    }

    /// Set the deletion marker without removing the object (finalizer held).
    pub async fn mark_deleting(
        &self,
        kind: WatchKind,
        key: &ObjectKey,
    ) -> Result<(), StoreError> {
        let slot = (kind, key.clone());
        let mut inner = self.inner.write().await;
        let obj = inner.touch(&slot).ok_or_else(|| StoreError::NotFound {
            kind: format!("{kind:?}"),
            key: key.clone(),
        })?;
        if let Some(meta) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.insert(
                "deletionTimestamp".into(),
                json!(chrono::Utc::now().to_rfc3339()),
            );
        }
        drop(inner);
        self.emit(StoreEvent::Applied {
            kind,
            key: key.clone(),
        });
        Ok(())
    }

    /// Delete any object, collecting dependents. Returns the removed count.
    pub async fn delete(&self, kind: WatchKind, key: &ObjectKey) -> usize {
        let mut inner = self.inner.write().await;
        let removed = inner.remove_cascading((kind, key.clone()));
        drop(inner);
        let n = removed.len();
        self.emit_deleted(removed);
        n
    }

    /// Mark-and-sweep pass removing every object whose owners are all gone.
    pub async fn sweep(&self) -> usize {
        let mut inner = self.inner.write().await;
        let mut removed = Vec::new();
        loop {
            let live = inner.live_uids();
            let orphans: Vec<Slot> = inner
                .objects
                .iter()
                .filter(|(_, obj)| inner.is_orphan(obj, &live))
                .map(|(slot, _)| slot.clone())
                .collect();
            if orphans.is_empty() {
                break;
            }
            for slot in orphans {
                removed.extend(inner.remove_cascading(slot));
            }
        }
        drop(inner);
        let n = removed.len();
        if n > 0 {
            debug!(removed = n, "garbage collector sweep");
        }
        self.emit_deleted(removed);
        n
    }

    /// Fail the next `n` status writes with a conflict, bumping the stored
    /// version each time as a concurrent writer would.
    pub async fn inject_conflicts(&self, n: usize) {
        self.inner.write().await.injected_conflicts = n;
    }

    /// Fail the next `n` calls of `op` without touching any object.
    pub async fn inject_failures(&self, op: StoreOp, n: usize) {
        self.inject_failures_after(op, 0, n).await;
    }

    /// Let `pass` calls of `op` succeed, then fail the following `n`.
    pub async fn inject_failures_after(&self, op: StoreOp, pass: usize, n: usize) {
        self.inner
            .write()
            .await
            .injected_failures
            .insert(op, (pass, n));
    }

    pub async fn count(&self, kind: ChildKind) -> usize {
        self.inner
            .read()
            .await
            .objects
            .keys()
            .filter(|(k, _)| *k == WatchKind::Child(kind))
            .count()
    }

    pub async fn list_requests(&self) -> Vec<TestCluster> {
        self.inner
            .read()
            .await
            .objects
            .iter()
            .filter(|((k, _), _)| *k == WatchKind::Request)
            .filter_map(|(_, v)| decode_request(v.clone()).ok())
            .collect()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_request(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<TestCluster>, StoreError> {
        let inner = self.inner.read().await;
        match inner.objects.get(&(WatchKind::Request, key.clone())) {
            Some(v) => Ok(Some(decode_request(v.clone())?)),
            None => Ok(None),
        }
    }

    async fn update_request_status(
        &self,
        request: &TestCluster,
        status: &TestClusterStatus,
    ) -> Result<TestCluster, StoreError> {
        let key = request.key();
        let slot = (WatchKind::Request, key.clone());
        let mut inner = self.inner.write().await;
        if inner.injected_conflicts > 0 {
            inner.injected_conflicts -= 1;
            inner.touch(&slot);
            return Err(StoreError::Conflict { key });
        }
        let stored = inner.objects.get(&slot).ok_or_else(|| {
            StoreError::NotFound {
                kind: "TestCluster".into(),
                key: key.clone(),
            }
        })?;
        if resource_version(stored)
            != request.metadata.resource_version.as_deref()
        {
            return Err(StoreError::Conflict { key });
        }
        let mut current = decode_request(stored.clone())?;
        current.status = Some(status.clone());
        current.metadata.resource_version = Some(inner.next_version());
        let value = serde_json::to_value(&current)?;
        inner.objects.insert(slot, value);
        drop(inner);
        self.emit(StoreEvent::Applied {
            kind: WatchKind::Request,
            key,
        });
        Ok(current)
    }

    async fn delete_request(&self, key: &ObjectKey) -> Result<bool, StoreError> {
        self.inner.write().await.take_failure(StoreOp::DeleteRequest)?;
        Ok(self.delete(WatchKind::Request, key).await > 0)
    }

    async fn get_child(
        &self,
        kind: ChildKind,
        key: &ObjectKey,
    ) -> Result<Option<ChildObject>, StoreError> {
        let inner = self.inner.read().await;
        match inner.objects.get(&(WatchKind::Child(kind), key.clone())) {
            Some(v) => Ok(Some(ChildObject::from_value(kind, v)?)),
            None => Ok(None),
        }
    }

    async fn create_child(
        &self,
        manifest: &Manifest,
    ) -> Result<ChildObject, StoreError> {
        let key = manifest.key().ok_or_else(|| {
            StoreError::InvalidObject(format!(
                "{} manifest without a name",
                manifest.kind
            ))
        })?;
        let value = manifest.to_value()?;
        let mut inner = self.inner.write().await;
        inner.take_failure(StoreOp::CreateChild)?;
        let slot = (WatchKind::Child(manifest.kind), key.clone());
        if inner.objects.contains_key(&slot) {
            return Err(StoreError::AlreadyExists {
                kind: manifest.kind.to_string(),
                key,
            });
        }
        let stored = inner.admit(value, &key.namespace);
        let out = ChildObject::from_value(manifest.kind, &stored)?;
        inner.objects.insert(slot, stored);
        drop(inner);
        self.emit(StoreEvent::Applied {
            kind: WatchKind::Child(manifest.kind),
            key,
        });
        Ok(out)
    }

    async fn remove_owner_references(
        &self,
        kind: ChildKind,
        key: &ObjectKey,
    ) -> Result<(), StoreError> {
        let slot = (WatchKind::Child(kind), key.clone());
        let mut inner = self.inner.write().await;
        inner.take_failure(StoreOp::RemoveOwnerReferences)?;
        let Some(obj) = inner.touch(&slot) else {
            return Ok(());
        };
        if let Some(meta) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.remove("ownerReferences");
        }
        drop(inner);
        self.emit(StoreEvent::Applied {
            kind: WatchKind::Child(kind),
            key: key.clone(),
        });
        Ok(())
    }

    async fn list_children(
        &self,
        kind: ChildKind,
        namespace: &str,
    ) -> Result<Vec<ChildObject>, StoreError> {
        let inner = self.inner.read().await;
        inner
            .objects
            .iter()
            .filter(|((k, key), _)| {
                *k == WatchKind::Child(kind) && key.namespace == namespace
            })
            .map(|(_, v)| ChildObject::from_value(kind, v).map_err(Into::into))
            .collect()
    }
}
