use common::store::{ClusterStore, ObjectKey};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType};
use tracing::*;

fn owner_name(regarding: &ObjectReference) -> String {
    format!(
        "`{}` {}",
        regarding.name.clone().unwrap_or_default(),
        regarding.kind.clone().unwrap_or_default()
    )
}

fn child_ref(child: &ObjectKey) -> ObjectReference {
    ObjectReference {
        kind: Some(child.kind.to_string()),
        name: Some(child.name.clone()),
        namespace: child.namespace.clone(),
        ..ObjectReference::default()
    }
}

#[must_use]
pub fn from_create(regarding: &ObjectReference, child: &ObjectKey) -> Event {
    Event {
        type_: EventType::Normal,
        reason: format!("Reconciling {}", owner_name(regarding)),
        note: Some(format!("Creating `{}` {} for {}", child.name, child.kind, owner_name(regarding))),
        action: format!("Creating `{}` {}", child.name, child.kind),
        secondary: Some(child_ref(child)),
    }
}

#[must_use]
pub fn from_delete(regarding: &ObjectReference, child: &ObjectKey) -> Event {
    Event {
        type_: EventType::Normal,
        reason: format!("Deleting {}", owner_name(regarding)),
        note: Some(format!("Deleting `{}` {} for {}", child.name, child.kind, owner_name(regarding))),
        action: format!("Deleting `{}` {}", child.name, child.kind),
        secondary: Some(child_ref(child)),
    }
}

#[must_use]
pub fn from_failure(regarding: &ObjectReference, action: &str, note: &str) -> Event {
    Event {
        type_: EventType::Warning,
        reason: format!("Failed on {}", owner_name(regarding)),
        note: Some(note.to_string()),
        action: action.to_string(),
        secondary: None,
    }
}

/// Publish an event, a failure is only logged
pub async fn publish(store: &dyn ClusterStore, regarding: &ObjectReference, event: Event) {
    if let Err(e) = store.publish_event(regarding, event).await {
        warn!("unable to publish event on {}: {e}", owner_name(regarding));
    }
}
