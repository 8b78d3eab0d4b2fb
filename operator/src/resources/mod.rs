//! Pure builders of the objects the operator creates.
//!
//! Manifests are written as json the way they read in kubernetes documentation, then
//! parsed into their k8s-openapi type so a typo in a field name fails the build step.
use crate::{Error, Result};
use common::store::ClusterStore;
use k8s_openapi::{
    ByteString,
    api::{
        core::v1::{PersistentVolumeClaim, Secret, Service, ServiceAccount},
        networking::v1::Ingress,
    },
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeMap;

pub mod keycloak;
pub mod rbac;
pub mod tls;
pub mod workspace;

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";

/// Flavour of cluster, decides how public hosts are exposed
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum Platform {
    Kubernetes,
    OpenShift,
}

impl Platform {
    pub fn from_api_groups(groups: &[String]) -> Self {
        if groups.iter().any(|g| g == "route.openshift.io") {
            Platform::OpenShift
        } else {
            Platform::Kubernetes
        }
    }

    /// Ask the cluster which API groups it serves
    pub async fn detect(store: &dyn ClusterStore) -> Result<Self> {
        Ok(Self::from_api_groups(&store.api_groups().await?))
    }

    pub fn is_openshift(self) -> bool {
        self == Platform::OpenShift
    }
}

pub(crate) fn parse<K: DeserializeOwned>(what: &str, value: Value) -> Result<K> {
    serde_json::from_value(value).map_err(|e| Error::Build(what.to_string(), e.to_string()))
}

/// Controller owner reference so the garbage collector reclaims the child with its owner
pub fn owner_reference<K: Resource<DynamicType = ()>>(owner: &K) -> Result<OwnerReference> {
    owner.controller_owner_ref(&()).ok_or_else(|| {
        Error::Build(
            format!("owner reference of {}", owner.meta().name.clone().unwrap_or_default()),
            "the owner has no uid yet".to_string(),
        )
    })
}

/// Namespace, labels and owner shared by the children of one custom resource
#[derive(Clone, Debug)]
pub struct ChildMeta {
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub owner: OwnerReference,
}

impl ChildMeta {
    pub fn new(namespace: &str, labels: BTreeMap<String, String>, owner: OwnerReference) -> Self {
        Self {
            namespace: namespace.to_string(),
            labels,
            owner,
        }
    }

    #[must_use]
    pub fn with_labels(&self, labels: BTreeMap<String, String>) -> Self {
        Self {
            labels,
            ..self.clone()
        }
    }

    pub fn metadata(&self, name: &str) -> Value {
        json!({
            "name": name,
            "namespace": self.namespace,
            "labels": self.labels,
            "ownerReferences": [self.owner],
        })
    }

    pub fn metadata_with_annotations(&self, name: &str, annotations: &BTreeMap<String, String>) -> Value {
        let mut meta = self.metadata(name);
        meta["annotations"] = json!(annotations);
        meta
    }
}

pub fn labels(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub fn service_account(meta: &ChildMeta, name: &str) -> Result<ServiceAccount> {
    parse(
        name,
        json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": meta.metadata(name),
        }),
    )
}

pub fn pvc(meta: &ChildMeta, name: &str, access_mode: &str, size: &str, class: Option<&str>) -> Result<PersistentVolumeClaim> {
    let mut spec = json!({
        "accessModes": [access_mode],
        "resources": { "requests": { "storage": size } },
    });
    if let Some(class) = class {
        spec["storageClassName"] = json!(class);
    }
    parse(
        name,
        json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": meta.metadata(name),
            "spec": spec,
        }),
    )
}

pub fn service(meta: &ChildMeta, name: &str, port: i32, port_name: &str) -> Result<Service> {
    parse(
        name,
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": meta.metadata(name),
            "spec": {
                "selector": meta.labels,
                "ports": [{ "port": port, "name": port_name }],
            },
        }),
    )
}

pub fn secret(meta: &ChildMeta, name: &str, entries: &[(&str, &str)]) -> Result<Secret> {
    let mut secret: Secret = parse(
        name,
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": meta.metadata(name),
            "type": "Opaque",
        }),
    )?;
    secret.data = Some(
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
            .collect(),
    );
    Ok(secret)
}

/// Read one entry of a secret, from `data` or from a not yet converted `stringData`
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(v) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return String::from_utf8(v.0.clone()).ok();
    }
    secret.string_data.as_ref().and_then(|d| d.get(key)).cloned()
}

pub fn tls_secret(meta: &ChildMeta, name: &str, host: &str, organization: &str) -> Result<Secret> {
    let cert = tls::self_signed(host, organization)?;
    let mut secret = secret(meta, name, &[(TLS_CERT_KEY, &cert.cert_pem), (TLS_KEY_KEY, &cert.key_pem)])?;
    secret.type_ = Some("kubernetes.io/tls".to_string());
    Ok(secret)
}

/// Nginx ingress terminating TLS with `tls_secret` in front of a service port
pub fn ingress(
    meta: &ChildMeta,
    name: &str,
    host: &str,
    tls_secret: &str,
    service: &str,
    port: i32,
    annotations: &BTreeMap<String, String>,
) -> Result<Ingress> {
    parse(
        name,
        json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "metadata": meta.metadata_with_annotations(name, annotations),
            "spec": {
                "tls": [{ "hosts": [host], "secretName": tls_secret }],
                "rules": [{
                    "host": host,
                    "http": { "paths": [{
                        "path": "/",
                        "pathType": "Prefix",
                        "backend": { "service": { "name": service, "port": { "number": port } } },
                    }]},
                }],
            },
        }),
    )
}

/// OpenShift route, `termination` is either `passthrough` or `edge`
pub fn route(meta: &ChildMeta, name: &str, host: &str, service: &str, port: i32, termination: &str) -> Value {
    json!({
        "apiVersion": "route.openshift.io/v1",
        "kind": "Route",
        "metadata": meta.metadata(name),
        "spec": {
            "host": host,
            "port": { "targetPort": port },
            "tls": {
                "insecureEdgeTerminationPolicy": "Redirect",
                "termination": termination,
            },
            "to": { "kind": "Service", "name": service, "weight": 100 },
        },
    })
}
