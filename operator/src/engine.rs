//! Convergence engine: walks an ordered checklist of ensure steps.
//!
//! A step either addresses one child object, created from its builder when absent and
//! left untouched when present, or runs custom logic. Completion of a child step is the
//! existence of the child, so an interrupted walk resumes where the cluster says it stopped.
use crate::{Error, Result, events};
use async_trait::async_trait;
use common::store::{ClusterStore, ObjectKey, ResourceKind};
use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{ObjectReference, PersistentVolumeClaim, Secret, Service, ServiceAccount},
        networking::v1::Ingress,
        rbac::v1::{ClusterRole, ClusterRoleBinding, RoleBinding},
    },
};
use kube::ResourceExt;
use serde_json::Value;
use std::{fmt::Debug, time::Duration};
use tracing::*;

/// Delay asked to the dispatch loop after a gated child was created
pub const GATE_REQUEUE: Duration = Duration::from_secs(1);

/// Identifier of one step of a checklist
pub trait StepId: Copy + Eq + Debug + Send + Sync + 'static {
    /// Steps that must come earlier in the checklist
    fn depends_on(self) -> &'static [Self];
}

/// Ordered list of steps where every dependency is listed before its dependents
#[derive(Clone, Debug)]
pub struct Checklist<S> {
    steps: Vec<S>,
}

impl<S: StepId> Checklist<S> {
    pub fn new(steps: &[S]) -> Result<Self> {
        for (pos, step) in steps.iter().enumerate() {
            if steps[..pos].contains(step) {
                return Err(Error::InvalidChecklist(format!("{step:?} is listed twice")));
            }
            for dep in step.depends_on() {
                if !steps[..pos].contains(dep) {
                    return Err(Error::InvalidChecklist(format!(
                        "{step:?} depends on {dep:?} which is not listed before it"
                    )));
                }
            }
        }
        Ok(Self { steps: steps.to_vec() })
    }

    pub fn steps(&self) -> &[S] {
        &self.steps
    }

    pub fn position(&self, step: S) -> Option<usize> {
        self.steps.iter().position(|s| *s == step)
    }
}

/// Address of a namespaced custom resource in the store
pub fn object_key<K: ResourceExt>(kind: ResourceKind, obj: &K) -> ObjectKey {
    ObjectKey::namespaced(kind, &obj.namespace().unwrap_or_default(), &obj.name_any())
}

/// Closed set of children the engine knows how to create
#[derive(Clone, Debug)]
pub enum Child {
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    RoleBinding(RoleBinding),
    ServiceAccount(ServiceAccount),
    PersistentVolumeClaim(PersistentVolumeClaim),
    Deployment(Deployment),
    Service(Service),
    Secret(Secret),
    Ingress(Ingress),
    Route(Value),
}

/// Outcome of ensuring one child
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ensured {
    Present,
    Created,
}

impl Child {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Child::ClusterRole(_) => ResourceKind::ClusterRole,
            Child::ClusterRoleBinding(_) => ResourceKind::ClusterRoleBinding,
            Child::RoleBinding(_) => ResourceKind::RoleBinding,
            Child::ServiceAccount(_) => ResourceKind::ServiceAccount,
            Child::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
            Child::Deployment(_) => ResourceKind::Deployment,
            Child::Service(_) => ResourceKind::Service,
            Child::Secret(_) => ResourceKind::Secret,
            Child::Ingress(_) => ResourceKind::Ingress,
            Child::Route(_) => ResourceKind::Route,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(match self {
            Child::ClusterRole(o) => serde_json::to_value(o)?,
            Child::ClusterRoleBinding(o) => serde_json::to_value(o)?,
            Child::RoleBinding(o) => serde_json::to_value(o)?,
            Child::ServiceAccount(o) => serde_json::to_value(o)?,
            Child::PersistentVolumeClaim(o) => serde_json::to_value(o)?,
            Child::Deployment(o) => serde_json::to_value(o)?,
            Child::Service(o) => serde_json::to_value(o)?,
            Child::Secret(o) => serde_json::to_value(o)?,
            Child::Ingress(o) => serde_json::to_value(o)?,
            Child::Route(o) => o.clone(),
        })
    }

    /// Create the child, losing a race against another writer counts as present
    pub async fn create(&self, store: &dyn ClusterStore, key: &ObjectKey) -> Result<Ensured> {
        if self.kind() != key.kind {
            return Err(Error::Build(
                key.to_string(),
                format!("builder produced a {}", self.kind()),
            ));
        }
        match store.create(key, &self.to_value()?).await {
            Ok(_) => Ok(Ensured::Created),
            Err(e) if e.is_already_exists() => {
                debug!("{key} was created concurrently");
                Ok(Ensured::Present)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Child addressed by a step. A gated child stops the walk once created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub key: ObjectKey,
    pub gate: bool,
}

impl Target {
    pub fn child(key: ObjectKey) -> Self {
        Self { key, gate: false }
    }

    pub fn gated(key: ObjectKey) -> Self {
        Self { key, gate: true }
    }
}

/// What a custom step asks of the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Requeue(Duration),
}

/// Resource specific half of a convergence
#[async_trait]
pub trait Plan: Send {
    type Step: StepId;

    fn checklist(&self) -> &Checklist<Self::Step>;

    /// Child addressed by a step, `None` for custom steps
    fn target(&self, step: Self::Step) -> Option<Target>;

    /// Desired object of a child step, only called when the child is absent
    async fn build(&mut self, step: Self::Step, store: &dyn ClusterStore) -> Result<Child>;

    /// Logic of a custom step
    async fn run(&mut self, _step: Self::Step, _store: &dyn ClusterStore) -> Result<Flow> {
        Ok(Flow::Continue)
    }

    /// Object the events are attached to
    fn regarding(&self) -> ObjectReference;
}

/// Result of one walk over the checklist
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Every step ran to the end of the checklist
    pub completed: bool,
    pub created: Vec<ObjectKey>,
    pub requeue: Option<Duration>,
}

/// Walk the checklist of `plan` until its end, a gate or a requeue request
pub async fn converge<P: Plan>(plan: &mut P, store: &dyn ClusterStore) -> Result<Outcome> {
    let mut outcome = Outcome::default();
    let regarding = plan.regarding();
    let steps = plan.checklist().steps().to_vec();
    for step in steps {
        match plan.target(step) {
            Some(target) => {
                if store.get(&target.key).await?.is_some() {
                    trace!("{step:?}: {} present", target.key);
                    continue;
                }
                let child = plan.build(step, store).await?;
                if child.create(store, &target.key).await? == Ensured::Created {
                    info!("{step:?}: created {}", target.key);
                    events::publish(store, &regarding, events::from_create(&regarding, &target.key)).await;
                    outcome.created.push(target.key.clone());
                    if target.gate {
                        outcome.requeue = Some(GATE_REQUEUE);
                        return Ok(outcome);
                    }
                }
            }
            None => {
                if let Flow::Requeue(delay) = plan.run(step, store).await? {
                    debug!("{step:?} asked for a requeue in {delay:?}");
                    outcome.requeue = Some(delay);
                    return Ok(outcome);
                }
            }
        }
    }
    outcome.completed = true;
    Ok(outcome)
}
