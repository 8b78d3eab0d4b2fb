use super::{AdminSession, IdentityError, Result, decode, query_value};
use crate::httphandler::HttpRequest;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::*;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredClient {
    pub id: String,
    pub client_id: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub web_origins: Vec<String>,
}

#[derive(Deserialize)]
struct ClientSecret {
    value: String,
}

/// Client representation as returned by the server, kept raw so updates do not drop fields
async fn lookup_raw(session: &AdminSession<'_>, realm: &str, client_id: &str) -> Result<Option<Value>> {
    let url = session.url(&format!("realms/{realm}/clients?clientId={}", query_value(client_id)));
    let resp = session.send(HttpRequest::get(&url)).await?;
    if resp.status != 200 {
        return Err(IdentityError::from_response(&resp));
    }
    let found: Vec<Value> = decode(&resp)?;
    Ok(found.into_iter().next())
}

pub(crate) async fn lookup(session: &AdminSession<'_>, realm: &str, client_id: &str) -> Result<Option<RegisteredClient>> {
    match lookup_raw(session, realm, client_id).await? {
        Some(v) => serde_json::from_value(v)
            .map(Some)
            .map_err(|e| IdentityError::ResponseFormat(e.to_string())),
        None => Ok(None),
    }
}

fn push_missing(client: &mut Value, field: &str, value: &str) -> bool {
    if !client[field].is_array() {
        client[field] = json!([]);
    }
    match client[field].as_array_mut() {
        Some(list) if !list.iter().any(|v| v == value) => {
            list.push(Value::String(value.to_string()));
            true
        }
        _ => false,
    }
}

/// Register the client, or add the workspace url to an existing one
pub(crate) async fn ensure(session: &AdminSession<'_>, realm: &str, client_id: &str, gatekeeper_url: &str) -> Result<()> {
    let redirect = format!("{gatekeeper_url}/*");
    if let Some(mut existing) = lookup_raw(session, realm, client_id).await? {
        let id = existing["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| IdentityError::ResponseFormat(format!("client {client_id} has no id")))?;
        if !push_missing(&mut existing, "redirectUris", &redirect) {
            debug!("Client '{client_id}' already allows {gatekeeper_url}");
            return Ok(());
        }
        push_missing(&mut existing, "webOrigins", gatekeeper_url);
        let req = HttpRequest::put_json(&session.url(&format!("realms/{realm}/clients/{id}")), &existing)?;
        let resp = session.send(req).await?;
        return match resp.status {
            200 | 204 => {
                info!("Updated client '{client_id}' with {gatekeeper_url}");
                Ok(())
            }
            _ => Err(IdentityError::from_response(&resp)),
        };
    }
    let body = json!({
        "clientId": client_id,
        "name": client_id,
        "directAccessGrantsEnabled": true,
        "publicClient": true,
        "redirectUris": [redirect],
    });
    let req = HttpRequest::post_json(&session.url(&format!("realms/{realm}/clients")), &body)?;
    let resp = session.send(req).await?;
    match resp.status {
        201 | 204 => {
            info!("Created client '{client_id}' in realm '{realm}'");
            Ok(())
        }
        409 => Ok(()),
        _ => Err(IdentityError::from_response(&resp)),
    }
}

pub(crate) async fn fetch_secret(session: &AdminSession<'_>, realm: &str, client_id: &str) -> Result<String> {
    let client = lookup(session, realm, client_id)
        .await?
        .ok_or_else(|| IdentityError::NotFound(format!("client {client_id}")))?;
    let url = session.url(&format!("realms/{realm}/clients/{}/client-secret", client.id));
    let resp = session.send(HttpRequest::get(&url)).await?;
    if resp.status != 200 {
        return Err(IdentityError::from_response(&resp));
    }
    Ok(decode::<ClientSecret>(&resp)?.value)
}
