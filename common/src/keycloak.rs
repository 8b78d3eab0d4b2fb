use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Describe a Keycloak instance shared by Codewind workspaces
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "Keycloak",
    status = "KeycloakStatus",
    shortname = "kc",
    group = "codewind.eclipse.org",
    version = "v1alpha1",
    namespaced
)]
#[kube(
    doc = "Custom resource representing a Keycloak identity provider for Codewind",
    printcolumn = r#"
    {"name":"Namespace", "type":"string", "description":"Deployment namespace", "jsonPath":".metadata.namespace"},
    {"name":"Age",       "type":"date",   "description":"Age", "jsonPath":".metadata.creationTimestamp"},
    {"name":"Phase",     "type":"string", "description":"Instance phase", "jsonPath":".status.phase"},
    {"name":"Realm",     "type":"string", "description":"Configured realm", "jsonPath":".status.defaultRealm"},
    {"name":"AccessURL", "type":"string", "description":"Public URL", "jsonPath":".status.accessURL"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakSpec {
    /// Workspace that requested this instance
    #[serde(rename = "workspaceID")]
    pub workspace_id: String,
    /// Deployment this instance is referenced as
    pub deployment_ref: String,
    /// Size of the Keycloak data volume, default to the operator `storageKeycloakSize`
    pub storage_size: Option<String>,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Copy, Debug, JsonSchema, Default)]
pub enum KeycloakPhase {
    #[default]
    Provisioning,
    Running,
    Ready,
}

/// The status object of `Keycloak`
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakStatus {
    pub phase: Option<KeycloakPhase>,
    #[serde(rename = "accessURL", skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,
    /// Realm provisioned at startup of the instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_realm: Option<String>,
}

impl Keycloak {
    pub fn default_realm(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.default_realm.as_deref())
    }
}
