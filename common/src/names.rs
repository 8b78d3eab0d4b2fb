//! Deterministic naming of every object the operator manages.
//!
//! A name is always a fixed prefix joined to the workspace (or Keycloak instance) name,
//! so two workspaces can never collide and a crashed reconcile finds its children again.

pub const PREFIX_PFE: &str = "codewind-pfe";
pub const PREFIX_PERFORMANCE: &str = "codewind-performance";
pub const PREFIX_GATEKEEPER: &str = "codewind-gatekeeper";
pub const PREFIX_KEYCLOAK: &str = "codewind-keycloak";

pub const VERSION: &str = "0.0.1";
pub const IMAGE_TAG: &str = "0.11.0";
pub const PFE_IMAGE: &str = "eclipse/codewind-pfe-amd64";
pub const PERFORMANCE_IMAGE: &str = "eclipse/codewind-performance-amd64";
pub const GATEKEEPER_IMAGE: &str = "eclipse/codewind-gatekeeper-amd64";
pub const KEYCLOAK_IMAGE: &str = "eclipse/codewind-keycloak-amd64";

pub const PFE_PORT: i32 = 9191;
pub const PERFORMANCE_PORT: i32 = 9095;
pub const GATEKEEPER_PORT: i32 = 9096;
pub const KEYCLOAK_PORT: i32 = 8080;

pub const CODEWIND_CLUSTER_ROLE: &str = "eclipse-codewind-0.0.1";
pub const TEKTON_CLUSTER_ROLE: &str = "codewind-tekton";
pub const ODO_CLUSTER_ROLE: &str = "codewind-odo";

pub const WORKSPACE_STORAGE_CLASS: &str = "ibmc-file-bronze";
pub const KEYCLOAK_STORAGE_CLASS: &str = "ibmc-file-bronze-gid";

pub const SESSION_SECRET_KEY: &str = "session_secret";
pub const CLIENT_SECRET_KEY: &str = "client_secret";
pub const ADMIN_USER_KEY: &str = "keycloak-admin-user";
pub const ADMIN_PASSWORD_KEY: &str = "keycloak-admin-password";

/// Names of the children of one `Codewind` workspace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkspaceNames {
    pub workspace_id: String,
    pub service_account: String,
    pub role_binding: String,
    pub tekton_binding: String,
    pub odo_binding: String,
    pub pvc: String,
    pub pfe: String,
    pub performance: String,
    pub gatekeeper: String,
    pub session_secret: String,
    pub tls_secret: String,
    pub client_secret: String,
    pub access_role: String,
    pub client_id: String,
    pub cert_title: String,
}

impl WorkspaceNames {
    #[must_use]
    pub fn new(workspace_id: &str) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            service_account: format!("codewind-{workspace_id}"),
            role_binding: format!("codewind-rolebinding-{workspace_id}"),
            tekton_binding: format!("codewind-tekton-rolebinding-{workspace_id}"),
            odo_binding: format!("codewind-odo-rolebinding-{workspace_id}"),
            pvc: format!("{PREFIX_PFE}-pvc-{workspace_id}"),
            pfe: format!("{PREFIX_PFE}-{workspace_id}"),
            performance: format!("{PREFIX_PERFORMANCE}-{workspace_id}"),
            gatekeeper: format!("{PREFIX_GATEKEEPER}-{workspace_id}"),
            session_secret: format!("secret-codewind-session-{workspace_id}"),
            tls_secret: format!("secret-codewind-tls-{workspace_id}"),
            client_secret: format!("secret-codewind-client-{workspace_id}"),
            access_role: format!("codewind-{workspace_id}"),
            client_id: format!("codewind-{workspace_id}"),
            cert_title: format!("Codewind-{workspace_id}"),
        }
    }

    pub fn gatekeeper_host(&self, ingress_domain: &str) -> String {
        format!("{}.{ingress_domain}", self.gatekeeper)
    }

    pub fn gatekeeper_url(&self, ingress_domain: &str) -> String {
        format!("https://{}", self.gatekeeper_host(ingress_domain))
    }

    /// Name of the environment variable kubernetes publishes for the backend service
    pub fn workspace_service_env(&self) -> String {
        format!("CODEWIND_PFE_{}", self.workspace_id.to_uppercase().replace('-', "_"))
    }

    /// Cluster scoped bindings the finalizer has to release
    pub fn cluster_bindings(&self) -> [&str; 2] {
        [self.tekton_binding.as_str(), self.odo_binding.as_str()]
    }
}

/// Names of the children of one `Keycloak` instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeycloakNames {
    pub instance: String,
    pub service_account: String,
    pub pvc: String,
    pub user_secret: String,
    pub tls_secret: String,
    pub cert_title: String,
    pub deployment: String,
    pub service: String,
    pub ingress: String,
}

impl KeycloakNames {
    #[must_use]
    pub fn new(instance: &str) -> Self {
        let base = format!("{PREFIX_KEYCLOAK}-{instance}");
        Self {
            instance: instance.to_string(),
            service_account: base.clone(),
            pvc: format!("{PREFIX_KEYCLOAK}-pvc-{instance}"),
            user_secret: format!("secret-keycloak-user-{instance}"),
            tls_secret: format!("secret-keycloak-tls-{instance}"),
            cert_title: format!("Keycloak-{instance}"),
            deployment: base.clone(),
            service: base.clone(),
            ingress: base,
        }
    }

    pub fn host(&self, ingress_domain: &str) -> String {
        format!("{}.{ingress_domain}", self.ingress)
    }

    pub fn url(&self, ingress_domain: &str) -> String {
        format!("https://{}", self.host(ingress_domain))
    }
}
