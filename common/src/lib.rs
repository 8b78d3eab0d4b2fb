use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YamlError: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("K8s error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} was modified concurrently")]
    Conflict(String),

    #[error("Reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("Operator config map {0} is missing key {1}")]
    MissingConfig(String, String),

    #[error("Operator config map {0} is not usable: {1}")]
    InvalidConfig(String, String),

    #[error("Error: {0}")]
    Other(String),
}
impl Error {
    pub fn metric_label(&self) -> String {
        format!("{self:?}").to_lowercase()
    }

    /// True when a create lost a race against another writer.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::AlreadyExists(_) => true,
            Error::KubeError(kube::Error::Api(ae)) => ae.code == 409 && ae.reason == "AlreadyExists",
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod codewind;
pub mod config;
pub mod context;
pub mod httphandler;
pub mod httpmock;
pub mod identity;
pub mod keycloak;
pub mod names;
pub mod passwordhandler;
pub mod store;
pub mod storemock;
pub use codewind::{Codewind, CodewindSpec, CodewindStatus, IdentityConfigStatus};
pub use context::get_client_name;
pub use keycloak::{Keycloak, KeycloakSpec, KeycloakStatus};
