use async_trait::async_trait;
use common::identity::IdentityError;
use kube::runtime::controller::Action;
use std::{sync::Arc, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Common(#[from] common::Error),

    #[error("Identity provider error: {0}")]
    Identity(#[from] IdentityError),

    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("No running Keycloak pod for instance '{0}'")]
    PodNotFound(String),

    #[error("Keycloak credentials unavailable: {0}")]
    MissingCredentials(String),

    #[error("Invalid checklist: {0}")]
    InvalidChecklist(String),

    #[error("Unable to build {0}: {1}")]
    Build(String, String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Delay before retrying while the Keycloak pod is not running yet
pub const POD_WAIT: Duration = Duration::from_secs(10);

impl Error {
    #[must_use]
    pub fn metric_label(&self) -> String {
        match self {
            Error::Common(e) => e.metric_label(),
            Error::Identity(_) => "identity".to_string(),
            Error::SerializationError(_) => "serialization".to_string(),
            Error::PodNotFound(_) => "podnotfound".to_string(),
            Error::MissingCredentials(_) => "missingcredentials".to_string(),
            Error::InvalidChecklist(_) => "invalidchecklist".to_string(),
            Error::Build(_, _) => "build".to_string(),
        }
    }

    /// Fixed retry delay for conditions expected to resolve quickly, the backoff applies otherwise
    #[must_use]
    pub fn requeue_hint(&self) -> Option<Duration> {
        match self {
            Error::PodNotFound(_) => Some(POD_WAIT),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Reconciler {
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action>;
    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action>;
}

pub mod backoff;
pub mod engine;
pub mod events;
pub mod finalizer;
pub mod keycloak;
pub mod resources;
pub mod workspace;

/// State machinery for kube, as exposeable to actix
pub mod manager;
pub use manager::{Context, Manager};
pub use resources::Platform;

/// Generated type, for crdgen
pub use common::{Codewind, Keycloak};

/// Metrics
mod metrics;
pub use metrics::Metrics;

#[cfg(test)]
pub(crate) mod fixtures;
