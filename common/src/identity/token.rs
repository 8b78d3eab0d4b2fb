use super::{AdminCredentials, IdentityError, Result, decode, error_body, fallback_description};
use crate::httphandler::{HttpRequest, HttpTransport};
use serde::Deserialize;
use tracing::*;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct AuthToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Password grant of the admin user against the master realm
pub(crate) async fn authenticate(
    transport: &dyn HttpTransport,
    auth_url: &str,
    admin: &AdminCredentials,
) -> Result<AuthToken> {
    let url = format!(
        "{}/auth/realms/master/protocol/openid-connect/token",
        auth_url.trim_end_matches('/')
    );
    let req = HttpRequest::post_form(&url, &[
        ("grant_type", "password"),
        ("client_id", "admin-cli"),
        ("username", admin.username.as_str()),
        ("password", admin.password.as_str()),
    ]);
    let resp = transport.send(req).await?;
    match resp.status {
        200 => decode(&resp),
        503 => Err(IdentityError::ServiceDown),
        400 | 401 => {
            let description = error_body(&resp)
                .and_then(|b| b.error_description.or(b.error))
                .unwrap_or_else(|| fallback_description(&resp));
            warn!("Admin authentication refused: {description}");
            Err(IdentityError::BadCredentials(description))
        }
        404 => {
            let code = error_body(&resp)
                .and_then(|b| b.error)
                .unwrap_or_else(|| fallback_description(&resp));
            warn!("Token endpoint {url} not found: {code}");
            Err(IdentityError::BadEndpoint(code))
        }
        _ => Err(IdentityError::from_response(&resp)),
    }
}
