//! Controller of `Keycloak` instances.
use crate::{
    Error, POD_WAIT, Reconciler, Result,
    engine::{self, Checklist, Child, Flow, Plan, StepId, Target, object_key},
    manager::Context,
    resources::{self, Platform, keycloak::{KeycloakResources, pod_selector}},
};
use async_trait::async_trait;
use chrono::Utc;
use common::{
    Keycloak, KeycloakStatus,
    config::OperatorConfig,
    identity::{AdminCredentials, IdentityProvisioner},
    keycloak::KeycloakPhase,
    names,
    store::{ClusterStore, ObjectKey, ResourceKind, get_as, list_as},
};
use k8s_openapi::api::core::v1::{ObjectReference, Pod, Secret};
use kube::{Resource, ResourceExt, runtime::controller::Action};
use std::sync::Arc;
use tracing::*;

const DEFAULT_ADMIN_USER: &str = "admin";
const DEFAULT_ADMIN_PASSWORD: &str = "admin";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeycloakStep {
    ServiceAccount,
    UserSecret,
    TlsSecret,
    Storage,
    Deployment,
    Service,
    Exposure,
    Status,
}

impl StepId for KeycloakStep {
    fn depends_on(self) -> &'static [Self] {
        use KeycloakStep::*;
        match self {
            ServiceAccount | UserSecret | TlsSecret | Storage => &[],
            Deployment => &[ServiceAccount, UserSecret, Storage],
            Service => &[Deployment],
            Exposure => &[Service, TlsSecret],
            Status => &[Exposure],
        }
    }
}

pub const KEYCLOAK_CHECKLIST: &[KeycloakStep] = &[
    KeycloakStep::ServiceAccount,
    KeycloakStep::UserSecret,
    KeycloakStep::TlsSecret,
    KeycloakStep::Storage,
    KeycloakStep::Deployment,
    KeycloakStep::Service,
    KeycloakStep::Exposure,
    KeycloakStep::Status,
];

/// Convergence of one Keycloak instance
pub struct KeycloakPlan {
    checklist: Checklist<KeycloakStep>,
    kc: Keycloak,
    key: ObjectKey,
    res: KeycloakResources,
    realm: String,
    platform: Platform,
    provisioner: Arc<dyn IdentityProvisioner>,
}

impl KeycloakPlan {
    pub fn new(
        kc: &Keycloak,
        config: &OperatorConfig,
        platform: Platform,
        provisioner: Arc<dyn IdentityProvisioner>,
    ) -> Result<Self> {
        Ok(Self {
            checklist: Checklist::new(KEYCLOAK_CHECKLIST)?,
            key: object_key(ResourceKind::Keycloak, kc),
            res: KeycloakResources::new(kc, config)?,
            realm: config.default_realm.clone(),
            kc: kc.clone(),
            platform,
            provisioner,
        })
    }

    fn namespaced(&self, kind: ResourceKind, name: &str) -> ObjectKey {
        ObjectKey::namespaced(kind, &self.res.namespace, name)
    }

    async fn write_status(&mut self, store: &dyn ClusterStore, status: KeycloakStatus) -> Result<()> {
        if self.kc.status.as_ref() == Some(&status) {
            return Ok(());
        }
        let mut updated = self.kc.clone();
        updated.status = Some(status);
        let stored = store.replace_status(&self.key, &serde_json::to_value(&updated)?).await?;
        self.kc = serde_json::from_value(stored)?;
        Ok(())
    }

    async fn admin_credentials(&self, store: &dyn ClusterStore) -> Result<AdminCredentials> {
        let key = self.namespaced(ResourceKind::Secret, &self.res.names.user_secret);
        let secret: Secret = get_as(store, &key)
            .await?
            .ok_or_else(|| Error::MissingCredentials(format!("{key} does not exist")))?;
        let read = |k: &str| {
            resources::secret_value(&secret, k)
                .ok_or_else(|| Error::MissingCredentials(format!("{key} has no {k}")))
        };
        Ok(AdminCredentials {
            username: read(names::ADMIN_USER_KEY)?,
            password: read(names::ADMIN_PASSWORD_KEY)?,
        })
    }

    async fn update_status(&mut self, store: &dyn ClusterStore) -> Result<Flow> {
        let pods: Vec<Pod> = list_as(
            store,
            ResourceKind::Pod,
            Some(&self.res.namespace),
            &pod_selector(&self.res.names.instance),
        )
        .await?;
        let running = pods
            .iter()
            .any(|p| p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running"));
        let mut status = self.kc.status.clone().unwrap_or_default();
        status.access_url = Some(self.res.url());
        if !running {
            status.phase = Some(KeycloakPhase::Provisioning);
            self.write_status(store, status).await?;
            return Ok(Flow::Requeue(POD_WAIT));
        }
        if status.default_realm.as_deref() != Some(self.realm.as_str()) {
            if status.phase != Some(KeycloakPhase::Running) {
                status.phase = Some(KeycloakPhase::Running);
                self.write_status(store, status.clone()).await?;
            }
            info!("creating realm {} in {}", self.realm, self.res.url());
            let admin = self.admin_credentials(store).await?;
            self.provisioner
                .ensure_default_realm(&self.res.url(), &self.realm, &admin)
                .await?;
            status.default_realm = Some(self.realm.clone());
        }
        status.phase = Some(KeycloakPhase::Ready);
        self.write_status(store, status).await?;
        Ok(Flow::Continue)
    }
}

#[async_trait]
impl Plan for KeycloakPlan {
    type Step = KeycloakStep;

    fn checklist(&self) -> &Checklist<KeycloakStep> {
        &self.checklist
    }

    fn target(&self, step: KeycloakStep) -> Option<Target> {
        let n = &self.res.names;
        Some(match step {
            KeycloakStep::ServiceAccount => Target::child(self.namespaced(ResourceKind::ServiceAccount, &n.service_account)),
            KeycloakStep::UserSecret => Target::child(self.namespaced(ResourceKind::Secret, &n.user_secret)),
            KeycloakStep::TlsSecret => Target::child(self.namespaced(ResourceKind::Secret, &n.tls_secret)),
            KeycloakStep::Storage => Target::child(self.namespaced(ResourceKind::PersistentVolumeClaim, &n.pvc)),
            KeycloakStep::Deployment => Target::gated(self.namespaced(ResourceKind::Deployment, &n.deployment)),
            KeycloakStep::Service => Target::child(self.namespaced(ResourceKind::Service, &n.service)),
            KeycloakStep::Exposure if self.platform.is_openshift() => {
                Target::child(self.namespaced(ResourceKind::Route, &n.ingress))
            }
            KeycloakStep::Exposure => Target::child(self.namespaced(ResourceKind::Ingress, &n.ingress)),
            KeycloakStep::Status => return None,
        })
    }

    async fn build(&mut self, step: KeycloakStep, store: &dyn ClusterStore) -> Result<Child> {
        Ok(match step {
            KeycloakStep::ServiceAccount => Child::ServiceAccount(self.res.service_account()?),
            KeycloakStep::UserSecret => {
                Child::Secret(self.res.user_secret(DEFAULT_ADMIN_USER, DEFAULT_ADMIN_PASSWORD)?)
            }
            KeycloakStep::TlsSecret => Child::Secret(self.res.tls_secret()?),
            KeycloakStep::Storage => {
                let class = ObjectKey::cluster(ResourceKind::StorageClass, names::KEYCLOAK_STORAGE_CLASS);
                let class = store.get(&class).await?.map(|_| names::KEYCLOAK_STORAGE_CLASS);
                Child::PersistentVolumeClaim(self.res.pvc(class)?)
            }
            KeycloakStep::Deployment => Child::Deployment(self.res.deployment()?),
            KeycloakStep::Service => Child::Service(self.res.service()?),
            KeycloakStep::Exposure if self.platform.is_openshift() => Child::Route(self.res.route()),
            KeycloakStep::Exposure => Child::Ingress(self.res.ingress()?),
            KeycloakStep::Status => {
                return Err(Error::Build(format!("{step:?}"), "not a child step".to_string()));
            }
        })
    }

    async fn run(&mut self, step: KeycloakStep, store: &dyn ClusterStore) -> Result<Flow> {
        match step {
            KeycloakStep::Status => self.update_status(store).await,
            _ => Ok(Flow::Continue),
        }
    }

    fn regarding(&self) -> ObjectReference {
        self.kc.object_ref(&())
    }
}

fn backoff_key(kc: &Keycloak) -> String {
    format!("keycloak/{}/{}", kc.namespace().unwrap_or_default(), kc.name_any())
}

#[async_trait]
impl Reconciler for Keycloak {
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action> {
        let store = ctx.store.as_ref();
        let config = OperatorConfig::load(store, &ctx.settings.namespace).await?;
        let mut plan = KeycloakPlan::new(self, &config, ctx.platform, ctx.provisioner.clone())?;
        let outcome = engine::converge(&mut plan, store).await?;
        Ok(match outcome.requeue {
            Some(delay) => Action::requeue(delay),
            None => Action::await_change(),
        })
    }

    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action> {
        // every child is owned, the garbage collector reclaims them
        ctx.backoff.reset(&backoff_key(self));
        Ok(Action::await_change())
    }
}

#[instrument(skip(ctx, kc), fields(namespace = %kc.namespace().unwrap_or_default(), name = %kc.name_any()))]
pub async fn reconcile(kc: Arc<Keycloak>, ctx: Arc<Context>) -> Result<Action> {
    let _measure = ctx.metrics.keycloak.count_and_measure();
    ctx.diagnostics.write().await.last_event = Utc::now();
    let action = if kc.meta().deletion_timestamp.is_some() {
        kc.cleanup(ctx.clone()).await?
    } else {
        kc.reconcile(ctx.clone()).await?
    };
    ctx.backoff.reset(&backoff_key(&kc));
    Ok(action)
}

#[must_use]
pub fn error_policy(kc: Arc<Keycloak>, error: &Error, ctx: Arc<Context>) -> Action {
    ctx.metrics.keycloak.reconcile_failure(kc.as_ref(), error);
    let delay = error
        .requeue_hint()
        .unwrap_or_else(|| ctx.backoff.next_delay(&backoff_key(&kc)));
    warn!(
        "reconcile failed for Keycloak '{}/{}', retrying in {delay:?}: {error}",
        kc.namespace().unwrap_or_default(),
        kc.name_any()
    );
    Action::requeue(delay)
}
