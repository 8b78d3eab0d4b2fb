//! In-memory `ClusterStore` used by the tests of the reconcilers.
use crate::{
    Error, Result,
    store::{ClusterStore, ObjectKey, ResourceKind},
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType};
use serde_json::{Value, json};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreCall {
    Create(ObjectKey),
    Replace(ObjectKey),
    ReplaceStatus(ObjectKey),
    Delete(ObjectKey),
}

/// What was published through `publish_event`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub regarding: String,
    pub reason: String,
    pub action: String,
    pub note: Option<String>,
    pub warning: bool,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, Value>,
    calls: Vec<StoreCall>,
    events: Vec<RecordedEvent>,
    failing_deletes: BTreeSet<ObjectKey>,
    failing_creates: BTreeSet<ObjectKey>,
    api_groups: Vec<String>,
    version: u64,
}

/// Stores objects in a map and mimics the API server behaviours the operator relies on:
/// resourceVersion checks, finalizer gated deletion and AlreadyExists on duplicate creates.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Seed an object without recording a call
    pub fn insert(&self, key: ObjectKey, mut obj: Value) {
        let mut inner = self.lock();
        inner.version += 1;
        let version = inner.version.to_string();
        stamp(&mut obj, &key, &version);
        inner.objects.insert(key, obj);
    }

    pub fn object(&self, key: &ObjectKey) -> Option<Value> {
        self.lock().objects.get(key).cloned()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.lock().objects.contains_key(key)
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn created(&self) -> Vec<ObjectKey> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::Create(k) => Some(k),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().events.clone()
    }

    pub fn fail_delete(&self, key: ObjectKey) {
        self.lock().failing_deletes.insert(key);
    }

    pub fn heal_delete(&self, key: &ObjectKey) {
        self.lock().failing_deletes.remove(key);
    }

    pub fn fail_create(&self, key: ObjectKey) {
        self.lock().failing_creates.insert(key);
    }

    pub fn set_api_groups(&self, groups: &[&str]) {
        self.lock().api_groups = groups.iter().map(|g| g.to_string()).collect();
    }

    /// Remove every object whose controller owner is gone, like the garbage collector would
    pub fn collect_garbage(&self) {
        let mut inner = self.lock();
        let uids: BTreeSet<String> = inner
            .objects
            .values()
            .filter_map(|o| o["metadata"]["uid"].as_str().map(str::to_string))
            .collect();
        inner.objects.retain(|_, o| match o["metadata"]["ownerReferences"].as_array() {
            Some(owners) if !owners.is_empty() => owners
                .iter()
                .any(|r| r["uid"].as_str().is_some_and(|u| uids.contains(u))),
            _ => true,
        });
    }
}

fn stamp(obj: &mut Value, key: &ObjectKey, version: &str) {
    if !obj["metadata"].is_object() {
        obj["metadata"] = json!({});
    }
    let meta = &mut obj["metadata"];
    meta["name"] = json!(key.name);
    if let Some(ns) = &key.namespace {
        meta["namespace"] = json!(ns);
    }
    if meta["uid"].is_null() {
        meta["uid"] = json!(format!("uid-{}-{}", key.kind, key.name).to_lowercase());
    }
    meta["resourceVersion"] = json!(version);
}

fn finalizers(obj: &Value) -> usize {
    obj["metadata"]["finalizers"].as_array().map_or(0, Vec::len)
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>> {
        Ok(self.object(key))
    }

    async fn create(&self, key: &ObjectKey, obj: &Value) -> Result<Value> {
        let mut inner = self.lock();
        inner.calls.push(StoreCall::Create(key.clone()));
        if inner.failing_creates.contains(key) {
            return Err(Error::Other(format!("create of {key} refused")));
        }
        if inner.objects.contains_key(key) {
            return Err(Error::AlreadyExists(key.to_string()));
        }
        inner.version += 1;
        let version = inner.version.to_string();
        let mut obj = obj.clone();
        stamp(&mut obj, key, &version);
        inner.objects.insert(key.clone(), obj.clone());
        Ok(obj)
    }

    async fn replace(&self, key: &ObjectKey, obj: &Value) -> Result<Value> {
        let mut inner = self.lock();
        inner.calls.push(StoreCall::Replace(key.clone()));
        let current = inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        if !obj["metadata"]["resourceVersion"].is_null()
            && obj["metadata"]["resourceVersion"] != current["metadata"]["resourceVersion"]
        {
            return Err(Error::Conflict(key.to_string()));
        }
        let mut obj = obj.clone();
        obj["status"] = current["status"].clone();
        obj["metadata"]["deletionTimestamp"] = current["metadata"]["deletionTimestamp"].clone();
        if !obj["metadata"]["deletionTimestamp"].is_null() && finalizers(&obj) == 0 {
            inner.objects.remove(key);
            return Ok(obj);
        }
        inner.version += 1;
        let version = inner.version.to_string();
        stamp(&mut obj, key, &version);
        inner.objects.insert(key.clone(), obj.clone());
        Ok(obj)
    }

    async fn replace_status(&self, key: &ObjectKey, obj: &Value) -> Result<Value> {
        let mut inner = self.lock();
        inner.calls.push(StoreCall::ReplaceStatus(key.clone()));
        let mut current = inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        if !obj["metadata"]["resourceVersion"].is_null()
            && obj["metadata"]["resourceVersion"] != current["metadata"]["resourceVersion"]
        {
            return Err(Error::Conflict(key.to_string()));
        }
        current["status"] = obj["status"].clone();
        inner.version += 1;
        let version = inner.version.to_string();
        stamp(&mut current, key, &version);
        inner.objects.insert(key.clone(), current.clone());
        Ok(current)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool> {
        let mut inner = self.lock();
        inner.calls.push(StoreCall::Delete(key.clone()));
        if inner.failing_deletes.contains(key) {
            return Err(Error::Other(format!("delete of {key} refused")));
        }
        let Some(mut obj) = inner.objects.get(key).cloned() else {
            return Ok(false);
        };
        if finalizers(&obj) > 0 {
            obj["metadata"]["deletionTimestamp"] = json!("2020-01-01T00:00:00Z");
            inner.objects.insert(key.clone(), obj);
        } else {
            inner.objects.remove(key);
        }
        Ok(true)
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>> {
        let inner = self.lock();
        Ok(inner
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .filter(|(k, _)| namespace.is_none() || k.namespace.as_deref() == namespace)
            .filter(|(_, o)| {
                labels
                    .iter()
                    .all(|(lk, lv)| o["metadata"]["labels"][lk].as_str() == Some(lv.as_str()))
            })
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn api_groups(&self) -> Result<Vec<String>> {
        Ok(self.lock().api_groups.clone())
    }

    async fn publish_event(&self, regarding: &ObjectReference, event: Event) -> Result<()> {
        self.lock().events.push(RecordedEvent {
            regarding: regarding.name.clone().unwrap_or_default(),
            reason: event.reason,
            action: event.action,
            note: event.note,
            warning: matches!(event.type_, EventType::Warning),
        });
        Ok(())
    }
}
