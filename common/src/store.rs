use crate::{Codewind, Error, Keycloak, Result};
use async_trait::async_trait;
use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{ConfigMap, ObjectReference, PersistentVolumeClaim, Pod, Secret, Service, ServiceAccount},
        networking::v1::Ingress,
        rbac::v1::{ClusterRole, ClusterRoleBinding, RoleBinding},
        storage::v1::StorageClass,
    },
};
use kube::{
    api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, PostParams},
    client::Client,
    runtime::events::{Event, Recorder, Reporter},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{collections::BTreeMap, fmt};

/// The closed set of object kinds the operator reads or writes
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    ClusterRole,
    ClusterRoleBinding,
    RoleBinding,
    ServiceAccount,
    PersistentVolumeClaim,
    Deployment,
    Service,
    Secret,
    Ingress,
    Route,
    ConfigMap,
    StorageClass,
    Pod,
    Codewind,
    Keycloak,
}

impl ResourceKind {
    pub fn api_resource(self) -> ApiResource {
        match self {
            ResourceKind::ClusterRole => ApiResource::erase::<ClusterRole>(&()),
            ResourceKind::ClusterRoleBinding => ApiResource::erase::<ClusterRoleBinding>(&()),
            ResourceKind::RoleBinding => ApiResource::erase::<RoleBinding>(&()),
            ResourceKind::ServiceAccount => ApiResource::erase::<ServiceAccount>(&()),
            ResourceKind::PersistentVolumeClaim => ApiResource::erase::<PersistentVolumeClaim>(&()),
            ResourceKind::Deployment => ApiResource::erase::<Deployment>(&()),
            ResourceKind::Service => ApiResource::erase::<Service>(&()),
            ResourceKind::Secret => ApiResource::erase::<Secret>(&()),
            ResourceKind::Ingress => ApiResource::erase::<Ingress>(&()),
            ResourceKind::Route => ApiResource {
                group: "route.openshift.io".to_string(),
                version: "v1".to_string(),
                api_version: "route.openshift.io/v1".to_string(),
                kind: "Route".to_string(),
                plural: "routes".to_string(),
            },
            ResourceKind::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            ResourceKind::StorageClass => ApiResource::erase::<StorageClass>(&()),
            ResourceKind::Pod => ApiResource::erase::<Pod>(&()),
            ResourceKind::Codewind => ApiResource::erase::<Codewind>(&()),
            ResourceKind::Keycloak => ApiResource::erase::<Keycloak>(&()),
        }
    }

    pub fn is_namespaced(self) -> bool {
        !matches!(
            self,
            ResourceKind::ClusterRole | ResourceKind::ClusterRoleBinding | ResourceKind::StorageClass
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Address of one object: kind, namespace (namespaced kinds only) and name
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(kind: ResourceKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster(kind: ResourceKind, name: &str) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {ns}/{}", self.kind, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Access to the cluster objects, errors are classified as `NotFound`, `AlreadyExists`,
/// `Conflict` or anything else.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>>;
    /// Create an object, `Error::AlreadyExists` when another writer was faster
    async fn create(&self, key: &ObjectKey, obj: &Value) -> Result<Value>;
    /// Replace an object, guarded by the resourceVersion it carries
    async fn replace(&self, key: &ObjectKey, obj: &Value) -> Result<Value>;
    /// Replace the status subresource of an object
    async fn replace_status(&self, key: &ObjectKey, obj: &Value) -> Result<Value>;
    /// Delete an object, `false` when it was already gone
    async fn delete(&self, key: &ObjectKey) -> Result<bool>;
    /// List the objects of a kind carrying all the given labels
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>>;
    /// Names of the API groups served by the cluster
    async fn api_groups(&self) -> Result<Vec<String>>;
    /// Record an event about an object
    async fn publish_event(&self, regarding: &ObjectReference, event: Event) -> Result<()>;
}

pub async fn get_as<K: DeserializeOwned>(store: &dyn ClusterStore, key: &ObjectKey) -> Result<Option<K>> {
    match store.get(key).await? {
        Some(v) => Ok(Some(serde_json::from_value(v)?)),
        None => Ok(None),
    }
}

pub async fn list_as<K: DeserializeOwned>(
    store: &dyn ClusterStore,
    kind: ResourceKind,
    namespace: Option<&str>,
    labels: &BTreeMap<String, String>,
) -> Result<Vec<K>> {
    store
        .list(kind, namespace, labels)
        .await?
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(Error::SerializationError))
        .collect()
}

/// `ClusterStore` talking to the kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    reporter: Reporter,
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client, reporter: Reporter) -> Self {
        Self { client, reporter }
    }

    fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        match namespace {
            Some(ns) if kind.is_namespaced() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn classify(key: &ObjectKey, e: kube::Error) -> Error {
        match e {
            kube::Error::Api(ae) if ae.code == 404 => Error::NotFound(key.to_string()),
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Error::AlreadyExists(key.to_string())
            }
            kube::Error::Api(ae) if ae.code == 409 => Error::Conflict(key.to_string()),
            other => Error::KubeError(other),
        }
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>> {
        let api = self.api(key.kind, key.namespace.as_deref());
        match api.get_opt(&key.name).await.map_err(|e| Self::classify(key, e))? {
            Some(obj) => Ok(Some(serde_json::to_value(obj)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, key: &ObjectKey, obj: &Value) -> Result<Value> {
        let api = self.api(key.kind, key.namespace.as_deref());
        let data: DynamicObject = serde_json::from_value(obj.clone())?;
        let created = api
            .create(&PostParams::default(), &data)
            .await
            .map_err(|e| Self::classify(key, e))?;
        Ok(serde_json::to_value(created)?)
    }

    async fn replace(&self, key: &ObjectKey, obj: &Value) -> Result<Value> {
        let api = self.api(key.kind, key.namespace.as_deref());
        let data: DynamicObject = serde_json::from_value(obj.clone())?;
        let replaced = api
            .replace(&key.name, &PostParams::default(), &data)
            .await
            .map_err(|e| Self::classify(key, e))?;
        Ok(serde_json::to_value(replaced)?)
    }

    async fn replace_status(&self, key: &ObjectKey, obj: &Value) -> Result<Value> {
        let api = self.api(key.kind, key.namespace.as_deref());
        let replaced = api
            .replace_status(&key.name, &PostParams::default(), serde_json::to_vec(obj)?)
            .await
            .map_err(|e| Self::classify(key, e))?;
        Ok(serde_json::to_value(replaced)?)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool> {
        let api = self.api(key.kind, key.namespace.as_deref());
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(Self::classify(key, e)),
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>> {
        let api = self.api(kind, namespace);
        let selector = labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let list = api.list(&ListParams::default().labels(&selector)).await?;
        list.items
            .into_iter()
            .map(|o| serde_json::to_value(o).map_err(Error::SerializationError))
            .collect()
    }

    async fn api_groups(&self) -> Result<Vec<String>> {
        let groups = self.client.list_api_groups().await?;
        Ok(groups.groups.into_iter().map(|g| g.name).collect())
    }

    async fn publish_event(&self, regarding: &ObjectReference, event: Event) -> Result<()> {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), regarding.clone());
        recorder.publish(event).await?;
        Ok(())
    }
}
