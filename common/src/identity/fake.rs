use crate::{
    Result,
    httphandler::{HttpMethod, HttpRequest, HttpResponse, HttpTransport},
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Mutex;

#[derive(Clone, Debug, Default)]
pub struct FakeClient {
    pub id: String,
    pub client_id: String,
    pub redirect_uris: Vec<String>,
    pub web_origins: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct FakeState {
    pub users: Vec<String>,
    pub realms: Vec<String>,
    pub clients: Vec<FakeClient>,
    pub roles: Vec<String>,
    pub grants: Vec<(String, String)>,
    pub realm_creations: usize,
    pub client_creations: usize,
}

/// Keycloak admin API keeping its state in memory, single realm only
#[derive(Debug, Default)]
pub struct FakeKeycloak {
    state: Mutex<FakeState>,
}

fn reply(status: u16, body: Value) -> HttpResponse {
    HttpResponse::new(status, &body.to_string())
}

fn empty(status: u16) -> HttpResponse {
    HttpResponse::new(status, "")
}

impl FakeKeycloak {
    pub fn new(users: &[&str]) -> Self {
        Self {
            state: Mutex::new(FakeState {
                users: users.iter().map(|u| u.to_string()).collect(),
                ..FakeState::default()
            }),
        }
    }

    pub fn state(&self) -> FakeState {
        self.state.lock().unwrap().clone()
    }

    fn client_json(c: &FakeClient) -> Value {
        json!({
            "id": c.id,
            "clientId": c.client_id,
            "redirectUris": c.redirect_uris,
            "webOrigins": c.web_origins,
        })
    }

    fn admin(&self, method: HttpMethod, segments: &[&str], query: &str, body: Value) -> HttpResponse {
        let mut st = self.state.lock().unwrap();
        match (method, segments) {
            (HttpMethod::Get, ["serverinfo"]) => reply(200, json!({"themes": {"login": [{"name": "keycloak"}]}})),
            (HttpMethod::Post, ["realms"]) => {
                let name = body["realm"].as_str().unwrap_or_default().to_string();
                if st.realms.contains(&name) {
                    return empty(409);
                }
                st.realms.push(name);
                st.realm_creations += 1;
                empty(201)
            }
            (HttpMethod::Get, ["realms", realm]) => empty(if st.realms.iter().any(|r| r == realm) { 200 } else { 404 }),
            (HttpMethod::Get, ["realms", _, "clients"]) => {
                let wanted = query.trim_start_matches("clientId=");
                let found: Vec<Value> = st
                    .clients
                    .iter()
                    .filter(|c| c.client_id == wanted)
                    .map(Self::client_json)
                    .collect();
                reply(200, Value::Array(found))
            }
            (HttpMethod::Post, ["realms", _, "clients"]) => {
                let client_id = body["clientId"].as_str().unwrap_or_default().to_string();
                if st.clients.iter().any(|c| c.client_id == client_id) {
                    return empty(409);
                }
                let strings = |v: &Value| -> Vec<String> {
                    v.as_array()
                        .map(|a| a.iter().filter_map(|s| s.as_str().map(str::to_string)).collect())
                        .unwrap_or_default()
                };
                let client = FakeClient {
                    id: format!("client-{}", st.clients.len() + 1),
                    client_id,
                    redirect_uris: strings(&body["redirectUris"]),
                    web_origins: strings(&body["webOrigins"]),
                };
                st.clients.push(client);
                st.client_creations += 1;
                empty(201)
            }
            (HttpMethod::Put, ["realms", _, "clients", id]) => {
                let Some(client) = st.clients.iter_mut().find(|c| c.id == *id) else {
                    return empty(404);
                };
                let strings = |v: &Value| -> Vec<String> {
                    v.as_array()
                        .map(|a| a.iter().filter_map(|s| s.as_str().map(str::to_string)).collect())
                        .unwrap_or_default()
                };
                client.redirect_uris = strings(&body["redirectUris"]);
                client.web_origins = strings(&body["webOrigins"]);
                empty(204)
            }
            (HttpMethod::Get, ["realms", _, "clients", id, "client-secret"]) => {
                match st.clients.iter().find(|c| c.id == *id) {
                    Some(c) => reply(200, json!({"type": "secret", "value": format!("secret-of-{}", c.client_id)})),
                    None => empty(404),
                }
            }
            (HttpMethod::Post, ["realms", _, "roles"]) => {
                let name = body["name"].as_str().unwrap_or_default().to_string();
                if st.roles.contains(&name) {
                    return empty(409);
                }
                st.roles.push(name);
                empty(201)
            }
            (HttpMethod::Get, ["realms", _, "roles", name]) => {
                if st.roles.iter().any(|r| r == name) {
                    reply(200, json!({"id": format!("role-{name}"), "name": name}))
                } else {
                    empty(404)
                }
            }
            (HttpMethod::Get, ["realms", _, "users"]) => {
                let wanted = query.trim_start_matches("username=").to_lowercase();
                let found: Vec<Value> = st
                    .users
                    .iter()
                    .filter(|u| u.to_lowercase().contains(&wanted))
                    .map(|u| json!({"id": format!("user-{u}"), "username": u}))
                    .collect();
                reply(200, Value::Array(found))
            }
            (HttpMethod::Post, ["realms", _, "users", id, "role-mappings", "realm"]) => {
                let user = id.trim_start_matches("user-").to_string();
                for role in body.as_array().cloned().unwrap_or_default() {
                    let grant = (user.clone(), role["name"].as_str().unwrap_or_default().to_string());
                    if !st.grants.contains(&grant) {
                        st.grants.push(grant);
                    }
                }
                empty(204)
            }
            _ => empty(404),
        }
    }
}

#[async_trait]
impl HttpTransport for FakeKeycloak {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
        let url = url::Url::parse(&req.url).unwrap();
        let body: Value = req
            .body
            .as_deref()
            .and_then(|b| serde_json::from_str(b).ok())
            .unwrap_or(Value::Null);
        let path = url.path().to_string();
        let query = url.query().unwrap_or_default().to_string();
        if path == "/" {
            return Ok(empty(200));
        }
        if path == "/auth/realms/master/protocol/openid-connect/token" {
            return Ok(reply(200, json!({"access_token": "token", "expires_in": 60})));
        }
        let Some(rest) = path.strip_prefix("/auth/admin/") else {
            return Ok(empty(404));
        };
        let segments: Vec<&str> = rest.split('/').collect();
        Ok(self.admin(req.method, &segments, &query, body))
    }
}
