use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Describe a Codewind workspace deployment
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "Codewind",
    status = "CodewindStatus",
    shortname = "cw",
    group = "codewind.eclipse.org",
    version = "v1alpha1",
    namespaced
)]
#[kube(
    doc = "Custom resource representing a Codewind developer workspace",
    printcolumn = r#"
    {"name":"Username",     "type":"string", "description":"Workspace owner", "jsonPath":".spec.username"},
    {"name":"Namespace",    "type":"string", "description":"Deployment namespace", "jsonPath":".metadata.namespace"},
    {"name":"Age",          "type":"date",   "description":"Age", "jsonPath":".metadata.creationTimestamp"},
    {"name":"Keycloak",     "type":"string", "description":"Identity provider instance", "jsonPath":".spec.keycloakDeployment"},
    {"name":"Registration", "type":"string", "description":"Identity registration", "jsonPath":".status.keycloakStatus"},
    {"name":"AccessURL",    "type":"string", "description":"Public gateway", "jsonPath":".status.accessURL"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CodewindSpec {
    /// Name of the Keycloak instance guarding this workspace
    pub keycloak_deployment: String,
    /// Developer account granted access to the workspace
    pub username: String,
    /// Override of the operator wide ingress domain
    pub ingress_domain: Option<String>,
    /// Size of the workspace volume, default to the operator `storageCodewindSize`
    pub storage_size: Option<String>,
    /// Log level of the workspace backend, default to "info"
    pub log_level: Option<String>,
}

/// Progress of the identity registration of a workspace
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Copy, Debug, JsonSchema)]
pub enum IdentityConfigStatus {
    Started,
    #[serde(rename = "Complete")]
    Ready,
}

/// The status object of `Codewind`
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct CodewindStatus {
    /// Identity provider URL used by the workspace
    #[serde(rename = "authURL", skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    /// Public URL of the workspace gatekeeper
    #[serde(rename = "accessURL", skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,
    /// Identity registration progress, absent until it started
    #[serde(rename = "keycloakStatus", default, skip_serializing_if = "Option::is_none", with = "identity_status")]
    #[schemars(with = "Option<IdentityConfigStatus>")]
    pub keycloak_status: Option<IdentityConfigStatus>,
}

// An empty string is how an unset registration used to be stored.
mod identity_status {
    use super::IdentityConfigStatus;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<IdentityConfigStatus>, s: S) -> Result<S::Ok, S::Error> {
        value.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<IdentityConfigStatus>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        Ok(match raw.as_deref() {
            Some("Started") => Some(IdentityConfigStatus::Started),
            Some("Complete") => Some(IdentityConfigStatus::Ready),
            _ => None,
        })
    }
}

impl Codewind {
    /// The workspace identifier every child name derives from
    pub fn workspace_id(&self) -> String {
        self.name_any()
    }

    pub fn identity_status(&self) -> Option<IdentityConfigStatus> {
        self.status.as_ref().and_then(|s| s.keycloak_status)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn log_level(&self) -> String {
        self.spec
            .log_level
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "info".to_string())
    }
}
