//! Finalizer guarding the cluster scoped bindings of a workspace.
//!
//! Cluster role bindings cannot be owned by a namespaced `Codewind`, so the workspace
//! keeps a finalizer until they are deleted. The finalizer is removed only after every
//! binding is gone.
use crate::{Result, engine::object_key, events};
use common::{
    Codewind,
    names::WorkspaceNames,
    store::{ClusterStore, ObjectKey, ResourceKind},
};
use kube::{Resource, ResourceExt};
use tracing::*;

pub const FINALIZER: &str = "codewind.eclipse.org/crb-cleanup";

pub fn has_finalizer(cw: &Codewind) -> bool {
    cw.finalizers().iter().any(|f| f == FINALIZER)
}

/// Add the finalizer to a live workspace, returns the workspace as stored
pub async fn attach(store: &dyn ClusterStore, cw: &Codewind) -> Result<Codewind> {
    if cw.is_deleting() || has_finalizer(cw) {
        return Ok(cw.clone());
    }
    let mut updated = cw.clone();
    updated.finalizers_mut().push(FINALIZER.to_string());
    let key = object_key(ResourceKind::Codewind, cw);
    debug!("adding finalizer to {key}");
    let stored = store.replace(&key, &serde_json::to_value(&updated)?).await?;
    Ok(serde_json::from_value(stored)?)
}

/// Delete the cluster role bindings of a deleting workspace, then drop the finalizer
pub async fn release(store: &dyn ClusterStore, cw: &Codewind) -> Result<()> {
    if !cw.is_deleting() {
        return Ok(());
    }
    let names = WorkspaceNames::new(&cw.workspace_id());
    let regarding = cw.object_ref(&());
    for name in names.cluster_bindings() {
        let binding = ObjectKey::cluster(ResourceKind::ClusterRoleBinding, name);
        match store.delete(&binding).await {
            Ok(true) => {
                info!("deleted {binding}");
                events::publish(store, &regarding, events::from_delete(&regarding, &binding)).await;
            }
            Ok(false) => debug!("{binding} already absent"),
            Err(e) => {
                warn!("unable to delete {binding}, keeping the finalizer: {e}");
                let note = format!("Unable to delete {binding}: {e}");
                events::publish(
                    store,
                    &regarding,
                    events::from_failure(&regarding, "Releasing cluster role bindings", &note),
                )
                .await;
                return Err(e.into());
            }
        }
    }
    if !has_finalizer(cw) {
        return Ok(());
    }
    let mut updated = cw.clone();
    updated.finalizers_mut().retain(|f| f != FINALIZER);
    let key = object_key(ResourceKind::Codewind, cw);
    store.replace(&key, &serde_json::to_value(&updated)?).await?;
    info!("released {key}");
    Ok(())
}
