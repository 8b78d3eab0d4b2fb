use super::{AdminSession, IdentityError, Result, decode};
use crate::httphandler::HttpRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::*;

const CODEWIND_THEME: &str = "codewind";
const DEFAULT_THEME: &str = "keycloak";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Realm {
    pub realm: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub login_theme: Option<String>,
    #[serde(default)]
    pub access_token_lifespan: Option<u64>,
    #[serde(default)]
    pub sso_session_idle_timeout: Option<u64>,
    #[serde(default)]
    pub sso_session_max_lifespan: Option<u64>,
}

impl Realm {
    fn new(name: &str, theme: &str) -> Self {
        Self {
            realm: name.to_string(),
            display_name: Some(name.to_string()),
            enabled: true,
            login_theme: Some(theme.to_string()),
            access_token_lifespan: Some(24 * 60 * 60),
            sso_session_idle_timeout: Some(5 * 24 * 60 * 60),
            sso_session_max_lifespan: Some(5 * 24 * 60 * 60),
        }
    }
}

pub(crate) async fn exists(session: &AdminSession<'_>, realm: &str) -> Result<bool> {
    let resp = session
        .send(HttpRequest::get(&session.url(&format!("realms/{realm}"))))
        .await?;
    match resp.status {
        200 => Ok(true),
        404 => Ok(false),
        _ => Err(IdentityError::from_response(&resp)),
    }
}

/// Login theme to use: the codewind one when the server ships it
async fn login_theme(session: &AdminSession<'_>) -> String {
    let found = match session.send(HttpRequest::get(&session.url("serverinfo"))).await {
        Ok(resp) if resp.status == 200 => decode::<Value>(&resp).map(|info| {
            info["themes"]["login"]
                .as_array()
                .is_some_and(|themes| themes.iter().any(|t| t["name"] == CODEWIND_THEME))
        }),
        Ok(resp) => Err(IdentityError::from_response(&resp)),
        Err(e) => Err(e),
    };
    match found {
        Ok(true) => CODEWIND_THEME.to_string(),
        Ok(false) => DEFAULT_THEME.to_string(),
        Err(e) => {
            warn!("Unable to list login themes, using '{DEFAULT_THEME}': {e}");
            DEFAULT_THEME.to_string()
        }
    }
}

/// Create the realm unless it is already there
pub(crate) async fn ensure(session: &AdminSession<'_>, realm: &str) -> Result<()> {
    if exists(session, realm).await? {
        debug!("Realm '{realm}' already exists");
        return Ok(());
    }
    let theme = login_theme(session).await;
    let body = serde_json::to_value(Realm::new(realm, &theme))
        .map_err(|e| IdentityError::ResponseFormat(e.to_string()))?;
    let req = HttpRequest::post_json(&session.url("realms"), &body)?;
    let resp = session.send(req).await?;
    match resp.status {
        201 | 204 => {
            info!("Created realm '{realm}' with theme '{theme}'");
            Ok(())
        }
        409 => Ok(()),
        _ => Err(IdentityError::from_response(&resp)),
    }
}
