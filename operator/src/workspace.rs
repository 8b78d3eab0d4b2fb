//! Controller of `Codewind` workspaces.
use crate::{
    Error, Reconciler, Result,
    engine::{self, Checklist, Child, Flow, Plan, StepId, Target, object_key},
    finalizer,
    manager::Context,
    resources::{self, Platform, keycloak::pod_selector, rbac, workspace::WorkspaceResources},
};
use async_trait::async_trait;
use chrono::Utc;
use common::{
    Codewind, CodewindStatus, IdentityConfigStatus,
    config::OperatorConfig,
    identity::{AdminCredentials, IdentityProvisioner, ProvisionRequest},
    names::{self, KeycloakNames},
    passwordhandler,
    store::{ClusterStore, ObjectKey, ResourceKind, get_as, list_as},
};
use k8s_openapi::api::core::v1::{ObjectReference, Pod, Secret};
use kube::{Resource, ResourceExt, runtime::controller::Action};
use std::sync::Arc;
use tracing::*;

const SESSION_SECRET_LENGTH: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkspaceStep {
    IdentityProvider,
    ServiceAccount,
    CodewindRole,
    RoleBinding,
    TektonRole,
    TektonBinding,
    OdoRole,
    OdoBinding,
    Storage,
    PfeDeployment,
    PfeService,
    PerformanceDeployment,
    PerformanceService,
    IdentityClient,
    ClientSecret,
    RecordRegistration,
    SessionSecret,
    TlsSecret,
    GatekeeperDeployment,
    GatekeeperService,
    Exposure,
    PublishStatus,
}

impl StepId for WorkspaceStep {
    fn depends_on(self) -> &'static [Self] {
        use WorkspaceStep::*;
        match self {
            IdentityProvider | ServiceAccount | CodewindRole | TektonRole | OdoRole | Storage => &[],
            SessionSecret | TlsSecret => &[],
            RoleBinding => &[ServiceAccount, CodewindRole],
            TektonBinding => &[ServiceAccount, TektonRole],
            OdoBinding => &[ServiceAccount, OdoRole],
            PfeDeployment => &[IdentityProvider, RoleBinding, Storage],
            PfeService => &[PfeDeployment],
            PerformanceDeployment => &[ServiceAccount],
            PerformanceService => &[PerformanceDeployment],
            IdentityClient => &[IdentityProvider],
            ClientSecret => &[IdentityClient],
            RecordRegistration => &[ClientSecret],
            GatekeeperDeployment => &[ClientSecret, SessionSecret, TlsSecret, PfeService],
            GatekeeperService => &[GatekeeperDeployment],
            Exposure => &[GatekeeperService, TlsSecret],
            PublishStatus => &[Exposure, RecordRegistration],
        }
    }
}

pub const WORKSPACE_CHECKLIST: &[WorkspaceStep] = &[
    WorkspaceStep::IdentityProvider,
    WorkspaceStep::ServiceAccount,
    WorkspaceStep::CodewindRole,
    WorkspaceStep::RoleBinding,
    WorkspaceStep::TektonRole,
    WorkspaceStep::TektonBinding,
    WorkspaceStep::OdoRole,
    WorkspaceStep::OdoBinding,
    WorkspaceStep::Storage,
    WorkspaceStep::PfeDeployment,
    WorkspaceStep::PfeService,
    WorkspaceStep::PerformanceDeployment,
    WorkspaceStep::PerformanceService,
    WorkspaceStep::IdentityClient,
    WorkspaceStep::ClientSecret,
    WorkspaceStep::RecordRegistration,
    WorkspaceStep::SessionSecret,
    WorkspaceStep::TlsSecret,
    WorkspaceStep::GatekeeperDeployment,
    WorkspaceStep::GatekeeperService,
    WorkspaceStep::Exposure,
    WorkspaceStep::PublishStatus,
];

/// Convergence of one workspace
pub struct WorkspacePlan {
    checklist: Checklist<WorkspaceStep>,
    cw: Codewind,
    key: ObjectKey,
    res: WorkspaceResources,
    keycloak: KeycloakNames,
    provisioner: Arc<dyn IdentityProvisioner>,
    client_secret: Option<String>,
}

impl WorkspacePlan {
    pub fn new(
        cw: &Codewind,
        config: &OperatorConfig,
        platform: Platform,
        provisioner: Arc<dyn IdentityProvisioner>,
    ) -> Result<Self> {
        Ok(Self {
            checklist: Checklist::new(WORKSPACE_CHECKLIST)?,
            key: object_key(ResourceKind::Codewind, cw),
            res: WorkspaceResources::new(cw, config, platform)?,
            keycloak: KeycloakNames::new(&cw.spec.keycloak_deployment),
            cw: cw.clone(),
            provisioner,
            client_secret: None,
        })
    }

    fn namespaced(&self, kind: ResourceKind, name: &str) -> ObjectKey {
        ObjectKey::namespaced(kind, &self.res.namespace, name)
    }

    async fn require_running_identity_provider(&self, store: &dyn ClusterStore) -> Result<()> {
        let pods: Vec<Pod> = list_as(
            store,
            ResourceKind::Pod,
            Some(&self.res.namespace),
            &pod_selector(&self.keycloak.instance),
        )
        .await?;
        let running = pods
            .iter()
            .any(|p| p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running"));
        if running {
            Ok(())
        } else {
            debug!("no running pod for Keycloak {}", self.keycloak.instance);
            Err(Error::PodNotFound(self.keycloak.instance.clone()))
        }
    }

    async fn admin_credentials(&self, store: &dyn ClusterStore) -> Result<AdminCredentials> {
        let key = self.namespaced(ResourceKind::Secret, &self.keycloak.user_secret);
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

    async fn provision_request(&self, store: &dyn ClusterStore) -> Result<ProvisionRequest> {
        Ok(ProvisionRequest {
            workspace_id: self.res.names.workspace_id.clone(),
            auth_url: self.res.auth_url.clone(),
            realm: self.res.realm.clone(),
            admin: self.admin_credentials(store).await?,
            gatekeeper_url: self.res.gatekeeper_url(),
            dev_username: self.cw.spec.username.clone(),
            client_name: self.res.names.client_id.clone(),
            access_role: self.res.names.access_role.clone(),
        })
    }

    fn status(&self) -> CodewindStatus {
        self.cw.status.clone().unwrap_or_default()
    }

    /// Persist a new status, keeping the stored object for the next optimistic update
    async fn write_status(&mut self, store: &dyn ClusterStore, status: CodewindStatus) -> Result<()> {
        let mut updated = self.cw.clone();
        updated.status = Some(status);
        let stored = store.replace_status(&self.key, &serde_json::to_value(&updated)?).await?;
        self.cw = serde_json::from_value(stored)?;
        Ok(())
    }

    async fn register_identity(&mut self, store: &dyn ClusterStore) -> Result<()> {
        let secret_key = self.namespaced(ResourceKind::Secret, &self.res.names.client_secret);
        let stored: Option<Secret> = get_as(store, &secret_key).await?;
        let current = stored
            .as_ref()
            .and_then(|s| resources::secret_value(s, names::CLIENT_SECRET_KEY));

        if let (Some(IdentityConfigStatus::Ready), Some(current), Some(secret)) =
            (self.cw.identity_status(), current, stored)
        {
            return self.rotate_client_secret(store, &secret_key, secret, &current).await;
        }

        let req = self.provision_request(store).await?;
        info!("registering workspace {} into {}", self.res.names.workspace_id, req.auth_url);
        let mut status = self.status();
        if status.auth_url.as_deref() != Some(req.auth_url.as_str())
            || status.keycloak_status != Some(IdentityConfigStatus::Started)
        {
            status.auth_url = Some(req.auth_url.clone());
            status.keycloak_status = Some(IdentityConfigStatus::Started);
            self.write_status(store, status).await?;
        }

        let secret = self.provisioner.provision(&req).await?;
        self.client_secret = Some(secret);
        Ok(())
    }

    /// Offer the stored secret of a registered workspace to the rotation hook
    async fn rotate_client_secret(
        &self,
        store: &dyn ClusterStore,
        secret_key: &ObjectKey,
        mut secret: Secret,
        current: &str,
    ) -> Result<()> {
        let req = match self.provision_request(store).await {
            Ok(req) => req,
            Err(Error::MissingCredentials(reason)) => {
                debug!("{} stays registered, rotation skipped: {reason}", self.key);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let kept = self.provisioner.rotate_client_secret(&req, current).await?;
        if kept != current {
            info!("rotating the client secret of {}", self.key);
            secret.data = self.res.client_secret(&kept)?.data;
            store.replace(secret_key, &serde_json::to_value(&secret)?).await?;
        }
        Ok(())
    }

    /// Mark the registration complete once the client secret is stored
    async fn record_registration(&mut self, store: &dyn ClusterStore) -> Result<()> {
        if self.cw.identity_status() == Some(IdentityConfigStatus::Ready) {
            return Ok(());
        }
        let mut status = self.status();
        status.keycloak_status = Some(IdentityConfigStatus::Ready);
        self.write_status(store, status).await
    }

    async fn publish_status(&mut self, store: &dyn ClusterStore) -> Result<()> {
        let mut status = self.status();
        let access_url = self.res.gatekeeper_url();
        if status.access_url.as_deref() == Some(access_url.as_str())
            && status.auth_url.as_deref() == Some(self.res.auth_url.as_str())
        {
            return Ok(());
        }
        info!("{} is reachable on {access_url}", self.key);
        status.access_url = Some(access_url);
        status.auth_url = Some(self.res.auth_url.clone());
        self.write_status(store, status).await
    }
}

#[async_trait]
impl Plan for WorkspacePlan {
    type Step = WorkspaceStep;

    fn checklist(&self) -> &Checklist<WorkspaceStep> {
        &self.checklist
    }

    fn target(&self, step: WorkspaceStep) -> Option<Target> {
        use WorkspaceStep::*;
        let n = &self.res.names;
        Some(match step {
            IdentityProvider | IdentityClient | RecordRegistration | PublishStatus => return None,
            ServiceAccount => Target::child(self.namespaced(ResourceKind::ServiceAccount, &n.service_account)),
            CodewindRole => Target::child(ObjectKey::cluster(ResourceKind::ClusterRole, names::CODEWIND_CLUSTER_ROLE)),
            RoleBinding => Target::child(self.namespaced(ResourceKind::RoleBinding, &n.role_binding)),
            TektonRole => Target::child(ObjectKey::cluster(ResourceKind::ClusterRole, names::TEKTON_CLUSTER_ROLE)),
            TektonBinding => Target::child(ObjectKey::cluster(ResourceKind::ClusterRoleBinding, &n.tekton_binding)),
            OdoRole => Target::child(ObjectKey::cluster(ResourceKind::ClusterRole, names::ODO_CLUSTER_ROLE)),
            OdoBinding => Target::child(ObjectKey::cluster(ResourceKind::ClusterRoleBinding, &n.odo_binding)),
            Storage => Target::gated(self.namespaced(ResourceKind::PersistentVolumeClaim, &n.pvc)),
            PfeDeployment => Target::gated(self.namespaced(ResourceKind::Deployment, &n.pfe)),
            PfeService => Target::child(self.namespaced(ResourceKind::Service, &n.pfe)),
            PerformanceDeployment => Target::gated(self.namespaced(ResourceKind::Deployment, &n.performance)),
            PerformanceService => Target::child(self.namespaced(ResourceKind::Service, &n.performance)),
            ClientSecret => Target::child(self.namespaced(ResourceKind::Secret, &n.client_secret)),
            SessionSecret => Target::child(self.namespaced(ResourceKind::Secret, &n.session_secret)),
            TlsSecret => Target::child(self.namespaced(ResourceKind::Secret, &n.tls_secret)),
            GatekeeperDeployment => Target::gated(self.namespaced(ResourceKind::Deployment, &n.gatekeeper)),
            GatekeeperService => Target::child(self.namespaced(ResourceKind::Service, &n.gatekeeper)),
            Exposure if self.res.platform.is_openshift() => {
                Target::child(self.namespaced(ResourceKind::Route, &n.gatekeeper))
            }
            Exposure => Target::child(self.namespaced(ResourceKind::Ingress, &n.gatekeeper)),
        })
    }

    async fn build(&mut self, step: WorkspaceStep, store: &dyn ClusterStore) -> Result<Child> {
        use WorkspaceStep::*;
        Ok(match step {
            ServiceAccount => Child::ServiceAccount(self.res.service_account()?),
            CodewindRole => Child::ClusterRole(rbac::codewind_cluster_role()?),
            RoleBinding => Child::RoleBinding(self.res.role_binding()?),
            TektonRole => Child::ClusterRole(rbac::tekton_cluster_role()?),
            TektonBinding => Child::ClusterRoleBinding(self.res.tekton_binding()?),
            OdoRole => Child::ClusterRole(rbac::odo_cluster_role()?),
            OdoBinding => Child::ClusterRoleBinding(self.res.odo_binding()?),
            Storage => {
                let class = ObjectKey::cluster(ResourceKind::StorageClass, names::WORKSPACE_STORAGE_CLASS);
                let class = store.get(&class).await?.map(|_| names::WORKSPACE_STORAGE_CLASS);
                Child::PersistentVolumeClaim(self.res.pvc(class)?)
            }
            PfeDeployment => Child::Deployment(self.res.pfe_deployment()?),
            PfeService => Child::Service(self.res.pfe_service()?),
            PerformanceDeployment => Child::Deployment(self.res.performance_deployment()?),
            PerformanceService => Child::Service(self.res.performance_service()?),
            ClientSecret => {
                let value = self.client_secret.clone().ok_or_else(|| {
                    Error::Build(
                        self.res.names.client_secret.clone(),
                        "the workspace is not registered in Keycloak".to_string(),
                    )
                })?;
                Child::Secret(self.res.client_secret(&value)?)
            }
            SessionSecret => Child::Secret(
                self.res
                    .session_secret(&passwordhandler::generate(SESSION_SECRET_LENGTH))?,
            ),
            TlsSecret => Child::Secret(self.res.tls_secret()?),
            GatekeeperDeployment => Child::Deployment(self.res.gatekeeper_deployment()?),
            GatekeeperService => Child::Service(self.res.gatekeeper_service()?),
            Exposure if self.res.platform.is_openshift() => Child::Route(self.res.route()),
            Exposure => Child::Ingress(self.res.ingress()?),
            IdentityProvider | IdentityClient | RecordRegistration | PublishStatus => {
                return Err(Error::Build(format!("{step:?}"), "not a child step".to_string()));
            }
        })
    }

    async fn run(&mut self, step: WorkspaceStep, store: &dyn ClusterStore) -> Result<Flow> {
        match step {
            WorkspaceStep::IdentityProvider => self.require_running_identity_provider(store).await?,
            WorkspaceStep::IdentityClient => self.register_identity(store).await?,
            WorkspaceStep::RecordRegistration => self.record_registration(store).await?,
            WorkspaceStep::PublishStatus => self.publish_status(store).await?,
            _ => {}
        }
        Ok(Flow::Continue)
    }

    fn regarding(&self) -> ObjectReference {
        self.cw.object_ref(&())
    }
}

fn backoff_key(cw: &Codewind) -> String {
    format!("codewind/{}/{}", cw.namespace().unwrap_or_default(), cw.name_any())
}

#[async_trait]
impl Reconciler for Codewind {
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action> {
        let store = ctx.store.as_ref();
        let cw = finalizer::attach(store, self).await?;
        let config = OperatorConfig::load(store, &ctx.settings.namespace).await?;
        let mut plan = WorkspacePlan::new(&cw, &config, ctx.platform, ctx.provisioner.clone())?;
        let outcome = engine::converge(&mut plan, store).await?;
        Ok(match outcome.requeue {
            Some(delay) => Action::requeue(delay),
            None => {
                debug!("workspace {} converged", cw.name_any());
                Action::await_change()
            }
        })
    }

    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action> {
        finalizer::release(ctx.store.as_ref(), self).await?;
        ctx.backoff.reset(&backoff_key(self));
        Ok(Action::await_change())
    }
}

#[instrument(skip(ctx, cw), fields(namespace = %cw.namespace().unwrap_or_default(), name = %cw.name_any()))]
pub async fn reconcile(cw: Arc<Codewind>, ctx: Arc<Context>) -> Result<Action> {
    let _measure = ctx.metrics.codewind.count_and_measure();
    ctx.diagnostics.write().await.last_event = Utc::now();
    let action = if cw.is_deleting() {
        cw.cleanup(ctx.clone()).await?
    } else {
        cw.reconcile(ctx.clone()).await?
    };
    ctx.backoff.reset(&backoff_key(&cw));
    Ok(action)
}

#[must_use]
pub fn error_policy(cw: Arc<Codewind>, error: &Error, ctx: Arc<Context>) -> Action {
    ctx.metrics.codewind.reconcile_failure(cw.as_ref(), error);
    let delay = error
        .requeue_hint()
        .unwrap_or_else(|| ctx.backoff.next_delay(&backoff_key(&cw)));
    warn!(
        "reconcile failed for Codewind '{}/{}', retrying in {delay:?}: {error}",
        cw.namespace().unwrap_or_default(),
        cw.name_any()
    );
    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{POD_WAIT, engine::GATE_REQUEUE, fixtures};
    use common::{identity::IdentityError, storemock::MemoryStore};
    use std::time::Duration;

    fn ws_key(kind: ResourceKind, name: &str) -> ObjectKey {
        ObjectKey::namespaced(kind, fixtures::NS, name)
    }

    fn stored_codewind(store: &MemoryStore) -> Codewind {
        let value = store.object(&ws_key(ResourceKind::Codewind, "ws1")).unwrap();
        serde_json::from_value(value).unwrap()
    }

    /// Reconcile the stored object until it stops asking for a requeue
    async fn run_until_converged(ctx: &Arc<Context>, store: &MemoryStore) -> usize {
        for round in 1..=20 {
            let action = reconcile(Arc::new(stored_codewind(store)), ctx.clone()).await.unwrap();
            if action == Action::await_change() {
                return round;
            }
        }
        panic!("workspace did not converge");
    }

    #[test]
    fn test_workspace_checklist_is_valid() {
        let checklist = Checklist::new(WORKSPACE_CHECKLIST).unwrap();
        let pos = |s| checklist.position(s).unwrap();
        assert_eq!(pos(WorkspaceStep::IdentityProvider), 0);
        assert!(pos(WorkspaceStep::ClientSecret) < pos(WorkspaceStep::GatekeeperDeployment));
        assert!(pos(WorkspaceStep::Storage) < pos(WorkspaceStep::PfeDeployment));
        assert_eq!(pos(WorkspaceStep::RecordRegistration), pos(WorkspaceStep::ClientSecret) + 1);
    }

    #[tokio::test]
    async fn test_new_workspace_converges_step_by_step() {
        let (store, provisioner, ctx) = fixtures::workspace_env();
        fixtures::seed_codewind(&store, fixtures::codewind("ws1", "kc1", "developer"));

        let first = reconcile(Arc::new(stored_codewind(&store)), ctx.clone()).await.unwrap();
        assert_eq!(first, Action::requeue(GATE_REQUEUE));
        let created = store.created();
        assert!(created.contains(&ws_key(ResourceKind::ServiceAccount, "codewind-ws1")));
        assert!(created.contains(&ws_key(ResourceKind::PersistentVolumeClaim, "codewind-pfe-pvc-ws1")));
        assert!(!created.iter().any(|k| k.kind == ResourceKind::Deployment));

        store.clear_calls();
        let second = reconcile(Arc::new(stored_codewind(&store)), ctx.clone()).await.unwrap();
        assert_eq!(second, Action::requeue(GATE_REQUEUE));
        assert_eq!(store.created(), vec![ws_key(ResourceKind::Deployment, "codewind-pfe-ws1")]);

        run_until_converged(&ctx, &store).await;
        for (kind, name) in [
            (ResourceKind::Service, "codewind-pfe-ws1"),
            (ResourceKind::Deployment, "codewind-performance-ws1"),
            (ResourceKind::Service, "codewind-performance-ws1"),
            (ResourceKind::Secret, "secret-codewind-client-ws1"),
            (ResourceKind::Secret, "secret-codewind-session-ws1"),
            (ResourceKind::Secret, "secret-codewind-tls-ws1"),
            (ResourceKind::Deployment, "codewind-gatekeeper-ws1"),
            (ResourceKind::Service, "codewind-gatekeeper-ws1"),
            (ResourceKind::Ingress, "codewind-gatekeeper-ws1"),
        ] {
            assert!(store.contains(&ws_key(kind, name)), "{kind} {name} missing");
        }
        assert!(store.contains(&ObjectKey::cluster(
            ResourceKind::ClusterRoleBinding,
            "codewind-tekton-rolebinding-ws1"
        )));
        let status = stored_codewind(&store).status.unwrap();
        assert_eq!(
            status.access_url.as_deref(),
            Some("https://codewind-gatekeeper-ws1.apps.example.com")
        );
        assert_eq!(
            status.auth_url.as_deref(),
            Some("https://codewind-keycloak-kc1.apps.example.com")
        );
        assert_eq!(status.keycloak_status, Some(IdentityConfigStatus::Ready));
        assert_eq!(provisioner.provisions(), 1);
        let secret: Secret = get_as(&*store, &ws_key(ResourceKind::Secret, "secret-codewind-client-ws1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            resources::secret_value(&secret, names::CLIENT_SECRET_KEY).as_deref(),
            Some(fixtures::CLIENT_SECRET)
        );
    }

    #[tokio::test]
    async fn test_converged_workspace_creates_nothing() {
        let (store, provisioner, ctx) = fixtures::workspace_env();
        fixtures::seed_codewind(&store, fixtures::codewind("ws1", "kc1", "developer"));
        run_until_converged(&ctx, &store).await;
        store.clear_calls();
        for _ in 0..3 {
            let action = reconcile(Arc::new(stored_codewind(&store)), ctx.clone()).await.unwrap();
            assert_eq!(action, Action::await_change());
        }
        assert!(store.calls().is_empty(), "{:?}", store.calls());
        assert_eq!(provisioner.provisions(), 1);
    }

    #[tokio::test]
    async fn test_missing_identity_pod_creates_nothing() {
        let store = Arc::new(MemoryStore::new());
        fixtures::seed_operator_config(&store);
        fixtures::seed_admin_secret(&store, "kc1");
        let provisioner = Arc::new(fixtures::FakeProvisioner::default());
        let ctx = fixtures::test_context(store.clone(), provisioner);
        let cw = fixtures::seed_codewind(&store, fixtures::codewind("ws1", "kc1", "developer"));

        let err = reconcile(Arc::new(cw.clone()), ctx.clone()).await.unwrap_err();
        assert!(matches!(err, Error::PodNotFound(ref kc) if kc == "kc1"));
        assert_eq!(error_policy(Arc::new(cw), &err, ctx), Action::requeue(POD_WAIT));
        assert!(store.created().is_empty());
    }

    #[tokio::test]
    async fn test_failed_registration_is_retried_from_started() {
        let (store, provisioner, ctx) = fixtures::workspace_env();
        fixtures::seed_codewind(&store, fixtures::codewind("ws1", "kc1", "developer"));
        provisioner.fail_with(IdentityError::NotFound("user developer".to_string()));

        let mut err = None;
        for _ in 0..10 {
            if let Err(e) = reconcile(Arc::new(stored_codewind(&store)), ctx.clone()).await {
                err = Some(e);
                break;
            }
        }
        assert!(matches!(err, Some(Error::Identity(IdentityError::NotFound(_)))));
        let status = stored_codewind(&store).status.unwrap();
        assert_eq!(status.keycloak_status, Some(IdentityConfigStatus::Started));
        assert!(!store.contains(&ws_key(ResourceKind::Secret, "secret-codewind-client-ws1")));

        provisioner.succeed();
        run_until_converged(&ctx, &store).await;
        assert_eq!(
            stored_codewind(&store).identity_status(),
            Some(IdentityConfigStatus::Ready)
        );
        assert_eq!(provisioner.provisions(), 2);
    }

    #[tokio::test]
    async fn test_registration_waits_for_the_client_secret() {
        let (store, provisioner, ctx) = fixtures::workspace_env();
        fixtures::seed_codewind(&store, fixtures::codewind("ws1", "kc1", "developer"));
        let secret_key = ws_key(ResourceKind::Secret, "secret-codewind-client-ws1");
        store.fail_create(secret_key.clone());

        let mut failed = false;
        for _ in 0..10 {
            if reconcile(Arc::new(stored_codewind(&store)), ctx.clone()).await.is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed);
        assert_eq!(provisioner.provisions(), 1);
        assert!(!store.contains(&secret_key));
        assert_eq!(
            stored_codewind(&store).identity_status(),
            Some(IdentityConfigStatus::Started)
        );
    }

    #[tokio::test]
    async fn test_registered_workspace_survives_admin_secret_removal() {
        let (store, provisioner, ctx) = fixtures::workspace_env();
        fixtures::seed_codewind(&store, fixtures::codewind("ws1", "kc1", "developer"));
        run_until_converged(&ctx, &store).await;
        store
            .delete(&ws_key(ResourceKind::Secret, "secret-keycloak-user-kc1"))
            .await
            .unwrap();

        let action = reconcile(Arc::new(stored_codewind(&store)), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(provisioner.provisions(), 1);
        assert_eq!(
            stored_codewind(&store).identity_status(),
            Some(IdentityConfigStatus::Ready)
        );
    }

    #[tokio::test]
    async fn test_errors_back_off() {
        let (store, _provisioner, ctx) = fixtures::workspace_env();
        let cw = fixtures::seed_codewind(&store, fixtures::codewind("ws1", "kc1", "developer"));
        let err = Error::MissingCredentials("secret".to_string());
        let action = error_policy(Arc::new(cw.clone()), &err, ctx.clone());
        assert_ne!(action, Action::requeue(POD_WAIT));
        assert_eq!(ctx.backoff.failures(&backoff_key(&cw)), 1);
        error_policy(Arc::new(cw.clone()), &err, ctx.clone());
        assert_eq!(ctx.backoff.failures(&backoff_key(&cw)), 2);
        assert!(ctx.backoff.ceiling(1) <= Duration::from_secs(10));

        reconcile(Arc::new(stored_codewind(&store)), ctx.clone()).await.unwrap();
        assert_eq!(ctx.backoff.failures(&backoff_key(&cw)), 0);
    }

    #[tokio::test]
    async fn test_missing_config_stalls_the_workspace() {
        let store = Arc::new(MemoryStore::new());
        fixtures::seed_keycloak_pod(&store, "kc1");
        let ctx = fixtures::test_context(store.clone(), Arc::new(fixtures::FakeProvisioner::default()));
        fixtures::seed_codewind(&store, fixtures::codewind("ws1", "kc1", "developer"));
        let err = reconcile(Arc::new(stored_codewind(&store)), ctx).await.unwrap_err();
        assert!(matches!(err, Error::Common(common::Error::MissingConfig(_, _))));
        assert!(store.created().is_empty());
    }

    #[tokio::test]
    async fn test_openshift_uses_a_route() {
        let (store, _provisioner, ctx) = fixtures::workspace_env_on(Platform::OpenShift);
        fixtures::seed_codewind(&store, fixtures::codewind("ws1", "kc1", "developer"));
        run_until_converged(&ctx, &store).await;
        assert!(store.contains(&ws_key(ResourceKind::Route, "codewind-gatekeeper-ws1")));
        assert!(!store.contains(&ws_key(ResourceKind::Ingress, "codewind-gatekeeper-ws1")));
    }

    #[tokio::test]
    async fn test_deletion_leaves_no_children() {
        let (store, _provisioner, ctx) = fixtures::workspace_env();
        fixtures::seed_codewind(&store, fixtures::codewind("ws1", "kc1", "developer"));
        run_until_converged(&ctx, &store).await;
        let key = ws_key(ResourceKind::Codewind, "ws1");
        store.delete(&key).await.unwrap();
        assert!(store.contains(&key));

        let deleting = stored_codewind(&store);
        error_policy(Arc::new(deleting.clone()), &Error::MissingCredentials("secret".to_string()), ctx.clone());
        assert_eq!(ctx.backoff.failures(&backoff_key(&deleting)), 1);
        let action = deleting.cleanup(ctx.clone()).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(ctx.backoff.tracked(), 0);
        assert!(!store.contains(&key));
        store.collect_garbage();
        let left: Vec<ObjectKey> = store
            .keys()
            .into_iter()
            .filter(|k| k.name.contains("ws1"))
            .collect();
        assert!(left.is_empty(), "{left:?}");
    }

    #[tokio::test]
    async fn test_rotated_client_secret_is_stored() {
        let (store, provisioner, ctx) = fixtures::workspace_env();
        fixtures::seed_codewind(&store, fixtures::codewind("ws1", "kc1", "developer"));
        run_until_converged(&ctx, &store).await;
        provisioner.rotate_to("fresh-secret");
        reconcile(Arc::new(stored_codewind(&store)), ctx).await.unwrap();
        let secret: Secret = get_as(&*store, &ws_key(ResourceKind::Secret, "secret-codewind-client-ws1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            resources::secret_value(&secret, names::CLIENT_SECRET_KEY).as_deref(),
            Some("fresh-secret")
        );
        assert_eq!(provisioner.provisions(), 1);
    }
}
