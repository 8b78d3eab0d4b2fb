//! Children of a `Codewind` workspace.
use super::{ChildMeta, Platform, labels, parse, rbac};
use crate::Result;
use common::{
    Codewind,
    config::OperatorConfig,
    names::{self, KeycloakNames, WorkspaceNames},
};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{PersistentVolumeClaim, Secret, Service, ServiceAccount},
    networking::v1::Ingress,
    rbac::v1::{ClusterRoleBinding, RoleBinding},
};
use kube::ResourceExt;
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Everything needed to build the children of one workspace
#[derive(Clone, Debug)]
pub struct WorkspaceResources {
    pub names: WorkspaceNames,
    pub namespace: String,
    pub ingress_domain: String,
    pub realm: String,
    pub auth_host: String,
    pub auth_url: String,
    pub storage_size: String,
    pub log_level: String,
    pub platform: Platform,
    owner_uid: String,
    meta: ChildMeta,
}

fn env(name: &str, value: &str) -> Value {
    json!({ "name": name, "value": value })
}

fn env_secret(name: &str, secret: &str, key: &str) -> Value {
    json!({ "name": name, "valueFrom": { "secretKeyRef": { "name": secret, "key": key } } })
}

fn component_labels(app: &str, workspace_id: &str) -> BTreeMap<String, String> {
    labels(&[("app", app), ("codewindWorkspace", workspace_id)])
}

impl WorkspaceResources {
    pub fn new(cw: &Codewind, config: &OperatorConfig, platform: Platform) -> Result<Self> {
        let names = WorkspaceNames::new(&cw.workspace_id());
        let keycloak = KeycloakNames::new(&cw.spec.keycloak_deployment);
        let namespace = cw.namespace().unwrap_or_default();
        let ingress_domain = cw
            .spec
            .ingress_domain
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| config.ingress_domain.clone());
        let storage_size = cw
            .spec
            .storage_size
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| config.storage_codewind_size.clone());
        let meta = ChildMeta::new(
            &namespace,
            labels(&[
                ("app", &names.service_account),
                ("codewind_cr", &names.workspace_id),
                ("codewindWorkspace", &names.workspace_id),
            ]),
            super::owner_reference(cw)?,
        );
        Ok(Self {
            auth_host: keycloak.host(&config.ingress_domain),
            auth_url: keycloak.url(&config.ingress_domain),
            realm: config.default_realm.clone(),
            log_level: cw.log_level(),
            owner_uid: cw.uid().unwrap_or_default(),
            names,
            namespace,
            ingress_domain,
            storage_size,
            platform,
            meta,
        })
    }

    fn component(&self, app: &str) -> ChildMeta {
        self.meta.with_labels(component_labels(app, &self.names.workspace_id))
    }

    pub fn gatekeeper_host(&self) -> String {
        self.names.gatekeeper_host(&self.ingress_domain)
    }

    pub fn gatekeeper_url(&self) -> String {
        self.names.gatekeeper_url(&self.ingress_domain)
    }

    pub fn service_account(&self) -> Result<ServiceAccount> {
        super::service_account(&self.meta, &self.names.service_account)
    }

    pub fn role_binding(&self) -> Result<RoleBinding> {
        rbac::role_binding(&self.meta, &self.names.role_binding, &self.names.service_account)
    }

    pub fn tekton_binding(&self) -> Result<ClusterRoleBinding> {
        rbac::cluster_role_binding(
            &self.meta,
            &self.names.tekton_binding,
            names::TEKTON_CLUSTER_ROLE,
            &self.names.service_account,
        )
    }

    pub fn odo_binding(&self) -> Result<ClusterRoleBinding> {
        rbac::cluster_role_binding(
            &self.meta,
            &self.names.odo_binding,
            names::ODO_CLUSTER_ROLE,
            &self.names.service_account,
        )
    }

    pub fn pvc(&self, storage_class: Option<&str>) -> Result<PersistentVolumeClaim> {
        super::pvc(
            &self.component(names::PREFIX_PFE),
            &self.names.pvc,
            "ReadWriteMany",
            &self.storage_size,
            storage_class,
        )
    }

    fn deployment(&self, meta: &ChildMeta, name: &str, pod: Value) -> Result<Deployment> {
        parse(
            name,
            json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": meta.metadata(name),
                "spec": {
                    "replicas": 1,
                    "selector": { "matchLabels": meta.labels },
                    "template": {
                        "metadata": { "labels": meta.labels },
                        "spec": pod,
                    },
                },
            }),
        )
    }

    pub fn pfe_deployment(&self) -> Result<Deployment> {
        let n = &self.names;
        let env = vec![
            env("TEKTON_PIPELINE", "tekton-pipelines"),
            env("IN_K8", "true"),
            env("PORTAL_HTTPS", "true"),
            env("KUBE_NAMESPACE", &self.namespace),
            env("TILLER_NAMESPACE", &self.namespace),
            env("CHE_WORKSPACE_ID", &n.workspace_id),
            env("PVC_NAME", &n.pvc),
            env("SERVICE_NAME", &n.pfe),
            env("SERVICE_ACCOUNT_NAME", &n.service_account),
            env("HOST_WORKSPACE_DIRECTORY", "/projects"),
            env("CONTAINER_WORKSPACE_DIRECTORY", "/codewind-workspace"),
            env("CODEWIND_VERSION", names::IMAGE_TAG),
            env("OWNER_REF_NAME", &n.service_account),
            env("OWNER_REF_UID", &self.owner_uid),
            env("CODEWIND_PERFORMANCE_SERVICE", &n.performance),
            env("CHE_INGRESS_HOST", &self.gatekeeper_host()),
            env("INGRESS_PREFIX", &format!("{}.{}", self.namespace, self.ingress_domain)),
            env("ON_OPENSHIFT", &self.platform.is_openshift().to_string()),
            env("CODEWIND_AUTH_REALM", &self.realm),
            env("CODEWIND_AUTH_HOST", &self.auth_host),
            env("LOG_LEVEL", &self.log_level),
        ];
        let pod = json!({
            "serviceAccountName": n.service_account,
            "volumes": [
                { "name": "shared-workspace", "persistentVolumeClaim": { "claimName": n.pvc } },
                { "name": "buildah-volume", "emptyDir": {} },
            ],
            "containers": [{
                "name": names::PREFIX_PFE,
                "image": format!("{}:{}", names::PFE_IMAGE, names::IMAGE_TAG),
                "imagePullPolicy": "Always",
                "securityContext": { "privileged": true },
                "volumeMounts": [
                    { "name": "shared-workspace", "mountPath": "/codewind-workspace", "subPath": format!("{}/projects", n.workspace_id) },
                    { "name": "buildah-volume", "mountPath": "/var/lib/containers" },
                ],
                "env": env,
                "ports": [{ "containerPort": names::PFE_PORT }],
            }],
        });
        self.deployment(&self.component(names::PREFIX_PFE), &n.pfe, pod)
    }

    pub fn pfe_service(&self) -> Result<Service> {
        super::service(&self.component(names::PREFIX_PFE), &self.names.pfe, names::PFE_PORT, "codewind-http")
    }

    pub fn performance_deployment(&self) -> Result<Deployment> {
        let pod = json!({
            "serviceAccountName": self.names.service_account,
            "containers": [{
                "name": names::PREFIX_PERFORMANCE,
                "image": format!("{}:{}", names::PERFORMANCE_IMAGE, names::IMAGE_TAG),
                "imagePullPolicy": "Always",
                "env": [
                    env("IN_K8", "true"),
                    env("PORTAL_HTTPS", "false"),
                    env("CODEWIND_INGRESS", &self.gatekeeper_host()),
                ],
                "ports": [{ "containerPort": names::PERFORMANCE_PORT }],
            }],
        });
        self.deployment(
            &self.component(names::PREFIX_PERFORMANCE),
            &self.names.performance,
            pod,
        )
    }

    pub fn performance_service(&self) -> Result<Service> {
        super::service(
            &self.component(names::PREFIX_PERFORMANCE),
            &self.names.performance,
            names::PERFORMANCE_PORT,
            &format!("{}-http", names::PREFIX_PERFORMANCE),
        )
    }

    pub fn client_secret(&self, value: &str) -> Result<Secret> {
        super::secret(
            &self.component(names::PREFIX_GATEKEEPER),
            &self.names.client_secret,
            &[(names::CLIENT_SECRET_KEY, value)],
        )
    }

    pub fn session_secret(&self, value: &str) -> Result<Secret> {
        super::secret(
            &self.component(names::PREFIX_GATEKEEPER),
            &self.names.session_secret,
            &[(names::SESSION_SECRET_KEY, value)],
        )
    }

    pub fn tls_secret(&self) -> Result<Secret> {
        super::tls_secret(
            &self.component(names::PREFIX_GATEKEEPER),
            &self.names.tls_secret,
            &self.gatekeeper_host(),
            &self.names.cert_title,
        )
    }

    pub fn gatekeeper_deployment(&self) -> Result<Deployment> {
        let n = &self.names;
        let pod = json!({
            "serviceAccountName": n.service_account,
            "containers": [{
                "name": names::PREFIX_GATEKEEPER,
                "image": format!("{}:{}", names::GATEKEEPER_IMAGE, names::IMAGE_TAG),
                "imagePullPolicy": "Always",
                "env": [
                    env("AUTH_URL", &self.auth_url),
                    env("CLIENT_ID", &n.client_id),
                    env("REALM", &self.realm),
                    env("ENABLE_AUTH", "1"),
                    env("GATEKEEPER_HOST", &self.gatekeeper_host()),
                    env("WORKSPACE_SERVICE", &n.workspace_service_env()),
                    env("WORKSPACE_ID", &n.workspace_id),
                    env("ACCESS_ROLE", &n.access_role),
                    env_secret("CLIENT_SECRET", &n.client_secret, names::CLIENT_SECRET_KEY),
                    env_secret("SESSION_SECRET", &n.session_secret, names::SESSION_SECRET_KEY),
                    env("PORTAL_HTTPS", "true"),
                ],
                "ports": [{ "containerPort": names::GATEKEEPER_PORT }],
            }],
        });
        self.deployment(&self.component(names::PREFIX_GATEKEEPER), &n.gatekeeper, pod)
    }

    pub fn gatekeeper_service(&self) -> Result<Service> {
        super::service(
            &self.component(names::PREFIX_GATEKEEPER),
            &self.names.gatekeeper,
            names::GATEKEEPER_PORT,
            &format!("{}-http", names::PREFIX_GATEKEEPER),
        )
    }

    pub fn ingress(&self) -> Result<Ingress> {
        let n = &self.names;
        let annotations = labels(&[
            ("nginx.ingress.kubernetes.io/rewrite-target", "/"),
            ("ingress.bluemix.net/redirect-to-https", "True"),
            ("ingress.bluemix.net/ssl-services", &format!("ssl-service={}", n.gatekeeper)),
            ("nginx.ingress.kubernetes.io/backend-protocol", "HTTPS"),
            ("kubernetes.io/ingress.class", "nginx"),
            ("nginx.ingress.kubernetes.io/force-ssl-redirect", "true"),
        ]);
        super::ingress(
            &self.component(names::PREFIX_GATEKEEPER),
            &n.gatekeeper,
            &self.gatekeeper_host(),
            &n.tls_secret,
            &n.gatekeeper,
            names::GATEKEEPER_PORT,
            &annotations,
        )
    }

    pub fn route(&self) -> Value {
        super::route(
            &self.component(names::PREFIX_GATEKEEPER),
            &self.names.gatekeeper,
            &self.gatekeeper_host(),
            &self.names.gatekeeper,
            names::GATEKEEPER_PORT,
            "passthrough",
        )
    }
}
