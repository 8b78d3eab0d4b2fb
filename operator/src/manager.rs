use crate::{Error, Metrics, Result, backoff::Backoff, keycloak, resources::Platform, workspace};
use chrono::{DateTime, Utc};
use common::{
    Codewind, Keycloak,
    config::{OperatorSettings, ensure_config_map},
    context::get_reporter,
    httphandler::RestClient,
    identity::{IdentityProvisioner, KeycloakProvisioner, WaitPolicy},
    store::{ClusterStore, KubeStore},
};
use futures::{FutureExt, StreamExt, future::BoxFuture};
use k8s_openapi::api::{apps::v1::Deployment, core::v1::{Secret, Service}};
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{self, Controller},
        events::Reporter,
        watcher::Config,
    },
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::*;

// Context for our reconcilers
#[derive(Clone)]
pub struct Context {
    /// Cluster objects
    pub store: Arc<dyn ClusterStore>,
    /// Registration of workspaces into Keycloak
    pub provisioner: Arc<dyn IdentityProvisioner>,
    pub settings: OperatorSettings,
    pub platform: Platform,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
    /// Retry delays of failing objects
    pub backoff: Arc<Backoff>,
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    pub platform: Option<Platform>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            platform: None,
            reporter: "codewind-operator".into(),
        }
    }
}

/// Data owned by the Manager
#[derive(Clone, Default)]
pub struct Manager {
    /// Diagnostics populated by the reconcilers
    diagnostics: Arc<RwLock<Diagnostics>>,
    metrics: Metrics,
    settings: OperatorSettings,
}

/// Manager that owns a Controller for Codewind and Keycloak
impl Manager {
    /// Lifecycle initialization interface for app
    ///
    /// This returns a `Manager` that drives the two `Controller`s as futures to be awaited.
    /// It is up to `main` to wait for the controller streams.
    pub async fn new() -> Result<(Self, BoxFuture<'static, ()>, BoxFuture<'static, ()>)> {
        let client = Client::try_default().await.map_err(common::Error::KubeError)?;
        let settings = OperatorSettings::from_env(client.default_namespace())?;
        let reporter = get_reporter(&settings.pod_name);
        let store: Arc<dyn ClusterStore> = Arc::new(KubeStore::new(client.clone(), reporter.clone()));

        if ensure_config_map(store.as_ref(), &settings.namespace).await? {
            info!("created the default operator config map in {}", settings.namespace);
        }
        let platform = Platform::detect(store.as_ref()).await?;
        info!("running on {platform:?}");

        let rest = RestClient::new(settings.insecure_identity_tls)?;
        let provisioner = Arc::new(KeycloakProvisioner::new(Arc::new(rest), WaitPolicy {
            attempts: settings.wait_attempts,
            interval: settings.wait_interval,
            ..WaitPolicy::default()
        }));

        let manager = Manager {
            diagnostics: Arc::new(RwLock::new(Diagnostics {
                platform: Some(platform),
                reporter,
                ..Diagnostics::default()
            })),
            metrics: Metrics::default(),
            settings: settings.clone(),
        };
        let context = Arc::new(Context {
            store,
            provisioner,
            settings: settings.clone(),
            platform,
            diagnostics: manager.diagnostics.clone(),
            metrics: manager.metrics.clone(),
            backoff: Arc::new(Backoff::default()),
        });

        let workspaces = Api::<Codewind>::all(client.clone());
        let instances = Api::<Keycloak>::all(client.clone());
        // Ensure CRD is installed before loop-watching
        for check in [
            workspaces.list(&ListParams::default().limit(1)).await.map(|_| ()),
            instances.list(&ListParams::default().limit(1)).await.map(|_| ()),
        ] {
            check.map_err(|e| {
                error!("is the crd installed? please run: cargo run --bin crdgen | kubectl apply -f -");
                Error::Common(common::Error::KubeError(e))
            })?;
        }
        let config = controller::Config::default().concurrency(settings.concurrency);

        // All good. Start controllers and return their futures.
        let controller_cw = Controller::new(workspaces, Config::default().any_semantic())
            .with_config(config.clone())
            .owns(Api::<Deployment>::all(client.clone()), Config::default())
            .owns(Api::<Service>::all(client.clone()), Config::default())
            .owns(Api::<Secret>::all(client.clone()), Config::default())
            .run(workspace::reconcile, workspace::error_policy, context.clone())
            .filter_map(|x| async move { std::result::Result::ok(x) })
            .for_each(|_| futures::future::ready(()))
            .boxed();

        let controller_kc = Controller::new(instances, Config::default().any_semantic())
            .with_config(config)
            .owns(Api::<Deployment>::all(client.clone()), Config::default())
            .owns(Api::<Service>::all(client.clone()), Config::default())
            .owns(Api::<Secret>::all(client), Config::default())
            .run(keycloak::reconcile, keycloak::error_policy, context)
            .filter_map(|x| async move { std::result::Result::ok(x) })
            .for_each(|_| futures::future::ready(()))
            .boxed();

        Ok((manager, controller_cw, controller_kc))
    }

    /// Metrics getter
    #[must_use]
    pub fn metrics(&self) -> String {
        self.metrics.encode()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub fn listen_addr(&self) -> &str {
        &self.settings.listen_addr
    }
}
