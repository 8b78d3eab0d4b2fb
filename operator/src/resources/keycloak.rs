//! Children of a `Keycloak` instance.
use super::{ChildMeta, labels, parse};
use crate::Result;
use common::{
    Keycloak,
    config::OperatorConfig,
    names::{self, KeycloakNames},
};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{PersistentVolumeClaim, Secret, Service, ServiceAccount},
    networking::v1::Ingress,
};
use kube::ResourceExt;
use serde_json::{Value, json};

/// Label set the workspace controller looks for to find a running instance
pub fn pod_selector(instance: &str) -> std::collections::BTreeMap<String, String> {
    labels(&[("app", names::PREFIX_KEYCLOAK), ("authName", instance)])
}

#[derive(Clone, Debug)]
pub struct KeycloakResources {
    pub names: KeycloakNames,
    pub namespace: String,
    pub ingress_domain: String,
    pub storage_size: String,
    meta: ChildMeta,
}

impl KeycloakResources {
    pub fn new(kc: &Keycloak, config: &OperatorConfig) -> Result<Self> {
        let names = KeycloakNames::new(&kc.name_any());
        let namespace = kc.namespace().unwrap_or_default();
        let mut lbls = pod_selector(&names.instance);
        lbls.insert("codewindWorkspace".to_string(), kc.spec.workspace_id.clone());
        let meta = ChildMeta::new(&namespace, lbls, super::owner_reference(kc)?);
        Ok(Self {
            storage_size: kc
                .spec
                .storage_size
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| config.storage_keycloak_size.clone()),
            ingress_domain: config.ingress_domain.clone(),
            names,
            namespace,
            meta,
        })
    }

    pub fn host(&self) -> String {
        self.names.host(&self.ingress_domain)
    }

    pub fn url(&self) -> String {
        self.names.url(&self.ingress_domain)
    }

    pub fn service_account(&self) -> Result<ServiceAccount> {
        super::service_account(&self.meta, &self.names.service_account)
    }

    /// Admin account of the instance, read back by the workspace registration
    pub fn user_secret(&self, username: &str, password: &str) -> Result<Secret> {
        super::secret(&self.meta, &self.names.user_secret, &[
            (names::ADMIN_USER_KEY, username),
            (names::ADMIN_PASSWORD_KEY, password),
        ])
    }

    pub fn tls_secret(&self) -> Result<Secret> {
        super::tls_secret(&self.meta, &self.names.tls_secret, &self.host(), &self.names.cert_title)
    }

    pub fn pvc(&self, storage_class: Option<&str>) -> Result<PersistentVolumeClaim> {
        super::pvc(&self.meta, &self.names.pvc, "ReadWriteOnce", &self.storage_size, storage_class)
    }

    pub fn deployment(&self) -> Result<Deployment> {
        let n = &self.names;
        let admin = |name: &str, key: &str| {
            json!({ "name": name, "valueFrom": { "secretKeyRef": { "name": n.user_secret, "key": key } } })
        };
        parse(
            &n.deployment,
            json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": self.meta.metadata(&n.deployment),
                "spec": {
                    "replicas": 1,
                    "selector": { "matchLabels": self.meta.labels },
                    "template": {
                        "metadata": { "labels": self.meta.labels },
                        "spec": {
                            "serviceAccountName": n.service_account,
                            "volumes": [
                                { "name": "keycloak-data", "persistentVolumeClaim": { "claimName": n.pvc } },
                            ],
                            "containers": [{
                                "name": names::PREFIX_KEYCLOAK,
                                "image": format!("{}:{}", names::KEYCLOAK_IMAGE, names::IMAGE_TAG),
                                "imagePullPolicy": "Always",
                                "volumeMounts": [
                                    { "name": "keycloak-data", "mountPath": "/opt/jboss/keycloak/standalone/data" },
                                ],
                                "env": [
                                    admin("KEYCLOAK_USER", names::ADMIN_USER_KEY),
                                    admin("KEYCLOAK_PASSWORD", names::ADMIN_PASSWORD_KEY),
                                    { "name": "PROXY_ADDRESS_FORWARDING", "value": "true" },
                                    { "name": "DB_VENDOR", "value": "h2" },
                                ],
                                "ports": [{ "containerPort": names::KEYCLOAK_PORT }],
                            }],
                        },
                    },
                },
            }),
        )
    }

    pub fn service(&self) -> Result<Service> {
        super::service(&self.meta, &self.names.service, names::KEYCLOAK_PORT, "keycloak-http")
    }

    pub fn ingress(&self) -> Result<Ingress> {
        let annotations = labels(&[
            ("nginx.ingress.kubernetes.io/rewrite-target", "/"),
            ("ingress.bluemix.net/redirect-to-https", "True"),
            ("nginx.ingress.kubernetes.io/backend-protocol", "HTTP"),
            ("kubernetes.io/ingress.class", "nginx"),
            ("nginx.ingress.kubernetes.io/force-ssl-redirect", "true"),
        ]);
        super::ingress(
            &self.meta,
            &self.names.ingress,
            &self.host(),
            &self.names.tls_secret,
            &self.names.service,
            names::KEYCLOAK_PORT,
            &annotations,
        )
    }

    pub fn route(&self) -> Value {
        super::route(
            &self.meta,
            &self.names.ingress,
            &self.host(),
            &self.names.service,
            names::KEYCLOAK_PORT,
            "edge",
        )
    }
}
