//! Shared test data and fakes of the reconciler tests.
use crate::{
    Context, Metrics, Platform,
    backoff::Backoff,
    manager::Diagnostics,
    resources::keycloak::pod_selector,
};
use async_trait::async_trait;
use common::{
    Codewind, CodewindSpec, Keycloak, KeycloakSpec,
    config::{OPERATOR_CONFIG_MAP, OperatorConfig, OperatorSettings},
    identity::{self, AdminCredentials, IdentityError, IdentityProvisioner, ProvisionRequest},
    names::{ADMIN_PASSWORD_KEY, ADMIN_USER_KEY},
    store::{ObjectKey, ResourceKind},
    storemock::MemoryStore,
};
use k8s_openapi::ByteString;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

pub const NS: &str = "codewind";
pub const DOMAIN: &str = "apps.example.com";
pub const CLIENT_SECRET: &str = "client-secret-of-ws1";

pub fn config() -> OperatorConfig {
    OperatorConfig {
        ingress_domain: DOMAIN.to_string(),
        storage_codewind_size: "10Gi".to_string(),
        storage_keycloak_size: "1Gi".to_string(),
        default_realm: "codewind".to_string(),
    }
}

pub fn codewind(workspace_id: &str, keycloak: &str, username: &str) -> Codewind {
    let mut cw = Codewind::new(workspace_id, CodewindSpec {
        keycloak_deployment: keycloak.to_string(),
        username: username.to_string(),
        ..CodewindSpec::default()
    });
    cw.metadata.namespace = Some(NS.to_string());
    cw.metadata.uid = Some(format!("uid-codewind-{workspace_id}"));
    cw
}

pub fn keycloak(name: &str) -> Keycloak {
    let mut kc = Keycloak::new(name, KeycloakSpec {
        workspace_id: "ws1".to_string(),
        deployment_ref: name.to_string(),
        storage_size: None,
    });
    kc.metadata.namespace = Some(NS.to_string());
    kc.metadata.uid = Some(format!("uid-keycloak-{name}"));
    kc
}

/// Store a workspace and return it as stored
pub fn seed_codewind(store: &MemoryStore, cw: Codewind) -> Codewind {
    let key = ObjectKey::namespaced(ResourceKind::Codewind, NS, &cw.metadata.name.clone().unwrap_or_default());
    store.insert(key.clone(), serde_json::to_value(&cw).unwrap());
    serde_json::from_value(store.object(&key).unwrap()).unwrap()
}

pub fn seed_keycloak(store: &MemoryStore, kc: Keycloak) -> Keycloak {
    let key = ObjectKey::namespaced(ResourceKind::Keycloak, NS, &kc.metadata.name.clone().unwrap_or_default());
    store.insert(key.clone(), serde_json::to_value(&kc).unwrap());
    serde_json::from_value(store.object(&key).unwrap()).unwrap()
}

pub fn seed_operator_config(store: &MemoryStore) {
    store.insert(
        ObjectKey::namespaced(ResourceKind::ConfigMap, NS, OPERATOR_CONFIG_MAP),
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "data": {
                "ingressDomain": DOMAIN,
                "storageCodewindSize": "10Gi",
                "storageKeycloakSize": "1Gi",
                "defaultRealm": "codewind",
            },
        }),
    );
}

pub fn seed_keycloak_pod(store: &MemoryStore, instance: &str) {
    store.insert(
        ObjectKey::namespaced(ResourceKind::Pod, NS, &format!("codewind-keycloak-{instance}-0")),
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "labels": pod_selector(instance) },
            "status": { "phase": "Running" },
        }),
    );
}

pub fn seed_admin_secret(store: &MemoryStore, instance: &str) {
    let secret = k8s_openapi::api::core::v1::Secret {
        data: Some(
            [(ADMIN_USER_KEY, "admin"), (ADMIN_PASSWORD_KEY, "admin")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    };
    store.insert(
        ObjectKey::namespaced(ResourceKind::Secret, NS, &format!("secret-keycloak-user-{instance}")),
        serde_json::to_value(&secret).unwrap(),
    );
}

#[derive(Default)]
struct FakeState {
    provisions: usize,
    realms: usize,
    failure: Option<IdentityError>,
    rotated: Option<String>,
}

/// Counts the registrations instead of talking to Keycloak
#[derive(Default)]
pub struct FakeProvisioner {
    state: Mutex<FakeState>,
}

impl FakeProvisioner {
    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn provisions(&self) -> usize {
        self.state().provisions
    }

    pub fn realms(&self) -> usize {
        self.state().realms
    }

    pub fn fail_with(&self, e: IdentityError) {
        self.state().failure = Some(e);
    }

    pub fn succeed(&self) {
        self.state().failure = None;
    }

    pub fn rotate_to(&self, secret: &str) {
        self.state().rotated = Some(secret.to_string());
    }
}

#[async_trait]
impl IdentityProvisioner for FakeProvisioner {
    async fn provision(&self, _req: &ProvisionRequest) -> identity::Result<String> {
        let mut state = self.state();
        state.provisions += 1;
        match &state.failure {
            Some(e) => Err(e.clone()),
            None => Ok(CLIENT_SECRET.to_string()),
        }
    }

    async fn ensure_default_realm(&self, _auth_url: &str, _realm: &str, _admin: &AdminCredentials) -> identity::Result<()> {
        self.state().realms += 1;
        Ok(())
    }

    async fn rotate_client_secret(&self, _req: &ProvisionRequest, current: &str) -> identity::Result<String> {
        Ok(self.state().rotated.clone().unwrap_or_else(|| current.to_string()))
    }
}

pub fn test_context_on(store: Arc<MemoryStore>, provisioner: Arc<FakeProvisioner>, platform: Platform) -> Arc<Context> {
    Arc::new(Context {
        store,
        provisioner,
        settings: OperatorSettings {
            namespace: NS.to_string(),
            ..OperatorSettings::default()
        },
        platform,
        diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
        metrics: Metrics::default(),
        backoff: Arc::new(Backoff::default()),
    })
}

pub fn test_context(store: Arc<MemoryStore>, provisioner: Arc<FakeProvisioner>) -> Arc<Context> {
    test_context_on(store, provisioner, Platform::Kubernetes)
}

/// Store with the operator config, a running `kc1` instance and its admin secret
pub fn workspace_env_on(platform: Platform) -> (Arc<MemoryStore>, Arc<FakeProvisioner>, Arc<Context>) {
    let store = Arc::new(MemoryStore::new());
    seed_operator_config(&store);
    seed_keycloak_pod(&store, "kc1");
    seed_admin_secret(&store, "kc1");
    let provisioner = Arc::new(FakeProvisioner::default());
    let ctx = test_context_on(store.clone(), provisioner.clone(), platform);
    (store, provisioner, ctx)
}

pub fn workspace_env() -> (Arc<MemoryStore>, Arc<FakeProvisioner>, Arc<Context>) {
    workspace_env_on(Platform::Kubernetes)
}
