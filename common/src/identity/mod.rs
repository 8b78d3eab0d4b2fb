//! Registration of workspaces into a Keycloak instance.
//!
//! Every step is idempotent: a crashed or repeated registration simply runs the
//! whole sequence again and ends in the same realm, client, role and grant.
use crate::httphandler::{HttpRequest, HttpResponse, HttpTransport};
use async_trait::async_trait;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::*;

mod client;
mod realm;
mod role;
mod token;
mod user;
#[cfg(test)]
pub(crate) mod fake;

pub use client::RegisteredClient;
pub use realm::Realm;
pub use role::Role;
pub use token::AuthToken;
pub use user::RegisteredUser;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("unable to reach the identity provider: {0}")]
    Connection(String),

    #[error("identity provider answered {status}: {description}")]
    ResponseStatus { status: u16, description: String },

    #[error("identity provider refused the credentials: {0}")]
    BadCredentials(String),

    #[error("identity provider endpoint is invalid: {0}")]
    BadEndpoint(String),

    #[error("identity provider is down")]
    ServiceDown,

    #[error("unexpected identity provider payload: {0}")]
    ResponseFormat(String),

    #[error("{0} not found in the identity provider")]
    NotFound(String),

    #[error("identity provider at {0} did not start in a reasonable amount of time")]
    DidNotStart(String),
}

pub type Result<T, E = IdentityError> = std::result::Result<T, E>;

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

fn error_body(resp: &HttpResponse) -> Option<ErrorBody> {
    serde_json::from_str(&resp.body).ok()
}

fn fallback_description(resp: &HttpResponse) -> String {
    if resp.body.trim().is_empty() {
        format!("HTTP {}", resp.status)
    } else {
        resp.body.trim().to_string()
    }
}

impl IdentityError {
    /// Build a status failure, using the provider description when it sent one
    pub fn from_response(resp: &HttpResponse) -> Self {
        let description = error_body(resp)
            .and_then(|b| b.error_description.or(b.error_message).or(b.error))
            .unwrap_or_else(|| fallback_description(resp));
        IdentityError::ResponseStatus {
            status: resp.status,
            description,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            IdentityError::ResponseStatus { status, .. } => Some(*status),
            IdentityError::ServiceDown => Some(503),
            _ => None,
        }
    }
}

impl From<crate::Error> for IdentityError {
    fn from(e: crate::Error) -> Self {
        IdentityError::Connection(e.to_string())
    }
}

fn decode<T: serde::de::DeserializeOwned>(resp: &HttpResponse) -> Result<T> {
    serde_json::from_str(&resp.body).map_err(|e| IdentityError::ResponseFormat(e.to_string()))
}

fn query_value(v: &str) -> String {
    url::form_urlencoded::byte_serialize(v.as_bytes()).collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

/// Everything needed to register one workspace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub workspace_id: String,
    pub auth_url: String,
    pub realm: String,
    pub admin: AdminCredentials,
    pub gatekeeper_url: String,
    pub dev_username: String,
    pub client_name: String,
    pub access_role: String,
}

/// Bounded poll of the identity provider before talking to it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitPolicy {
    pub attempts: u32,
    pub interval: Duration,
    /// Bound of each poll
    pub attempt_timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            attempts: 500,
            interval: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
pub trait IdentityProvisioner: Send + Sync {
    /// Register a workspace and return the secret of its client
    async fn provision(&self, req: &ProvisionRequest) -> Result<String>;

    /// Make sure a realm exists, used when an instance starts
    async fn ensure_default_realm(&self, auth_url: &str, realm: &str, admin: &AdminCredentials) -> Result<()>;

    /// Hook called with the stored client secret; returns the secret to keep.
    async fn rotate_client_secret(&self, _req: &ProvisionRequest, current: &str) -> Result<String> {
        Ok(current.to_string())
    }
}

/// Session against the admin API of one Keycloak
pub(crate) struct AdminSession<'a> {
    transport: &'a dyn HttpTransport,
    base: String,
    token: String,
}

impl<'a> AdminSession<'a> {
    pub(crate) fn new(transport: &'a dyn HttpTransport, auth_url: &str, token: &str) -> Self {
        Self {
            transport,
            base: auth_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/auth/admin/{}", self.base, path.trim_start_matches('/'))
    }

    pub(crate) async fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
        let resp = self.transport.send(req.bearer(&self.token)).await?;
        if resp.status == 503 {
            return Err(IdentityError::ServiceDown);
        }
        Ok(resp)
    }
}

/// `IdentityProvisioner` using the Keycloak REST API
#[derive(Clone)]
pub struct KeycloakProvisioner {
    transport: Arc<dyn HttpTransport>,
    wait: WaitPolicy,
}

impl KeycloakProvisioner {
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>, wait: WaitPolicy) -> Self {
        Self { transport, wait }
    }

    /// Poll the instance until it answers 200
    pub async fn wait_for_service(&self, url: &str) -> Result<()> {
        for attempt in 1..=self.wait.attempts {
            let poll = HttpRequest::get(url).timeout(self.wait.attempt_timeout);
            match self.transport.send(poll).await {
                Ok(resp) if resp.status == 200 => {
                    debug!("{url} answered after {attempt} attempt(s)");
                    return Ok(());
                }
                Ok(resp) => trace!("{url} answered {} (attempt {attempt})", resp.status),
                Err(e) => trace!("{url} unreachable: {e} (attempt {attempt})"),
            }
            if attempt < self.wait.attempts && !self.wait.interval.is_zero() {
                tokio::time::sleep(self.wait.interval).await;
            }
        }
        Err(IdentityError::DidNotStart(url.to_string()))
    }

    async fn login(&self, auth_url: &str, admin: &AdminCredentials) -> Result<AdminSession<'_>> {
        info!("Waiting for Keycloak to start on {auth_url}");
        self.wait_for_service(auth_url).await?;
        let token = token::authenticate(self.transport.as_ref(), auth_url, admin).await?;
        Ok(AdminSession::new(self.transport.as_ref(), auth_url, &token.access_token))
    }
}

#[async_trait]
impl IdentityProvisioner for KeycloakProvisioner {
    #[instrument(skip(self, req), fields(workspace = %req.workspace_id, realm = %req.realm))]
    async fn provision(&self, req: &ProvisionRequest) -> Result<String> {
        let session = self.login(&req.auth_url, &req.admin).await?;
        realm::ensure(&session, &req.realm).await?;
        client::ensure(&session, &req.realm, &req.client_name, &req.gatekeeper_url).await?;
        role::ensure(&session, &req.realm, &req.access_role).await?;
        let user = user::find(&session, &req.realm, &req.dev_username).await?;
        info!("Grant '{}' access to workspace '{}'", req.dev_username, req.workspace_id);
        role::grant(&session, &req.realm, &user, &req.access_role).await?;
        client::fetch_secret(&session, &req.realm, &req.client_name).await
    }

    #[instrument(skip(self, admin))]
    async fn ensure_default_realm(&self, auth_url: &str, realm: &str, admin: &AdminCredentials) -> Result<()> {
        let session = self.login(auth_url, admin).await?;
        realm::ensure(&session, realm).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        httphandler::HttpMethod,
        httpmock::{HttpMockItem, RestClientMock},
    };
    use fake::FakeKeycloak;
    use serde_json::json;

    const AUTH: &str = "https://codewind-keycloak-kc1.apps.example.com";

    fn request(user: &str) -> ProvisionRequest {
        ProvisionRequest {
            workspace_id: "ws1".to_string(),
            auth_url: AUTH.to_string(),
            realm: "codewind".to_string(),
            admin: AdminCredentials {
                username: "admin".to_string(),
                password: "admin".to_string(),
            },
            gatekeeper_url: "https://codewind-gatekeeper-ws1.apps.example.com".to_string(),
            dev_username: user.to_string(),
            client_name: "codewind-ws1".to_string(),
            access_role: "codewind-ws1".to_string(),
        }
    }

    fn quick() -> WaitPolicy {
        WaitPolicy {
            attempts: 3,
            interval: Duration::ZERO,
            attempt_timeout: Duration::from_millis(250),
        }
    }

    #[tokio::test]
    async fn test_provision_registers_everything() {
        let fake = Arc::new(FakeKeycloak::new(&["developer"]));
        let provisioner = KeycloakProvisioner::new(fake.clone(), quick());
        let secret = provisioner.provision(&request("developer")).await.unwrap();
        assert_eq!(secret, "secret-of-codewind-ws1");
        let state = fake.state();
        assert_eq!(state.realms, vec!["codewind".to_string()]);
        assert_eq!(state.clients.len(), 1);
        assert_eq!(state.clients[0].redirect_uris, vec!["https://codewind-gatekeeper-ws1.apps.example.com/*"]);
        assert_eq!(state.roles, vec!["codewind-ws1".to_string()]);
        assert_eq!(state.grants, vec![("developer".to_string(), "codewind-ws1".to_string())]);
    }

    #[tokio::test]
    async fn test_provision_twice_is_idempotent() {
        let fake = Arc::new(FakeKeycloak::new(&["developer"]));
        let provisioner = KeycloakProvisioner::new(fake.clone(), quick());
        let first = provisioner.provision(&request("developer")).await.unwrap();
        let second = provisioner.provision(&request("developer")).await.unwrap();
        assert_eq!(first, second);
        let state = fake.state();
        assert_eq!(state.realms.len(), 1);
        assert_eq!(state.clients.len(), 1);
        assert_eq!(state.clients[0].redirect_uris.len(), 1);
        assert_eq!(state.clients[0].web_origins.len(), 0);
        assert_eq!(state.roles.len(), 1);
        assert_eq!(state.grants.len(), 1);
        assert_eq!(state.realm_creations, 1);
        assert_eq!(state.client_creations, 1);
    }

    #[tokio::test]
    async fn test_shared_client_gets_new_redirect() {
        let fake = Arc::new(FakeKeycloak::new(&["developer"]));
        let provisioner = KeycloakProvisioner::new(fake.clone(), quick());
        provisioner.provision(&request("developer")).await.unwrap();
        let mut other = request("developer");
        other.gatekeeper_url = "https://codewind-gatekeeper-ws2.apps.example.com".to_string();
        provisioner.provision(&other).await.unwrap();
        let state = fake.state();
        assert_eq!(state.clients.len(), 1);
        assert_eq!(state.clients[0].redirect_uris, vec![
            "https://codewind-gatekeeper-ws1.apps.example.com/*".to_string(),
            "https://codewind-gatekeeper-ws2.apps.example.com/*".to_string(),
        ]);
        assert_eq!(state.clients[0].web_origins, vec![
            "https://codewind-gatekeeper-ws2.apps.example.com".to_string()
        ]);
    }

    #[tokio::test]
    async fn test_unknown_user_stops_before_grant() {
        let fake = Arc::new(FakeKeycloak::new(&["someone"]));
        let provisioner = KeycloakProvisioner::new(fake.clone(), quick());
        let err = provisioner.provision(&request("developer")).await.unwrap_err();
        assert_eq!(err, IdentityError::NotFound("user developer".to_string()));
        assert!(fake.state().grants.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_service_gives_up() {
        let mock = Arc::new(RestClientMock::new(vec![HttpMockItem::new(HttpMethod::Get, "/", 503, "")]));
        let provisioner = KeycloakProvisioner::new(mock.clone(), quick());
        let err = provisioner.provision(&request("developer")).await.unwrap_err();
        assert_eq!(err, IdentityError::DidNotStart(AUTH.to_string()));
        assert_eq!(mock.count(HttpMethod::Get, "/"), 3);
    }

    #[tokio::test]
    async fn test_wait_for_service_tolerates_connection_errors() {
        let mock = Arc::new(RestClientMock::new(vec![
            HttpMockItem::unreachable(HttpMethod::Get, "/").once(),
            HttpMockItem::new(HttpMethod::Get, "/", 200, "ok"),
        ]));
        let provisioner = KeycloakProvisioner::new(mock.clone(), quick());
        provisioner.wait_for_service(AUTH).await.unwrap();
        assert_eq!(mock.count(HttpMethod::Get, "/"), 2);
    }

    #[tokio::test]
    async fn test_each_poll_is_bounded() {
        let mock = Arc::new(RestClientMock::new(vec![HttpMockItem::new(HttpMethod::Get, "/", 502, "")]));
        let provisioner = KeycloakProvisioner::new(mock.clone(), quick());
        provisioner.wait_for_service(AUTH).await.unwrap_err();
        let polls = mock.requests();
        assert_eq!(polls.len(), 3);
        assert!(polls.iter().all(|r| r.timeout == Some(Duration::from_millis(250))));
    }

    #[tokio::test]
    async fn test_default_realm_only_touches_the_realm() {
        let fake = Arc::new(FakeKeycloak::new(&[]));
        let provisioner = KeycloakProvisioner::new(fake.clone(), quick());
        let admin = request("x").admin;
        provisioner.ensure_default_realm(AUTH, "codewind", &admin).await.unwrap();
        provisioner.ensure_default_realm(AUTH, "codewind", &admin).await.unwrap();
        let state = fake.state();
        assert_eq!(state.realm_creations, 1);
        assert!(state.clients.is_empty());
    }

    #[test]
    fn test_error_description_is_parsed() {
        let resp = HttpResponse::new(
            401,
            &json!({"error": "invalid_grant", "error_description": "Invalid user credentials"}).to_string(),
        );
        assert_eq!(IdentityError::from_response(&resp), IdentityError::ResponseStatus {
            status: 401,
            description: "Invalid user credentials".to_string()
        });
        let resp = HttpResponse::new(500, "");
        assert_eq!(IdentityError::from_response(&resp).to_string(), "identity provider answered 500: HTTP 500");
    }
}
