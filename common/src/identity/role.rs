use super::{AdminSession, IdentityError, RegisteredUser, Result, decode};
use crate::httphandler::HttpRequest;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::*;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: String,
    pub name: String,
}

/// Create a realm role; an existing one is fine
pub(crate) async fn ensure(session: &AdminSession<'_>, realm: &str, name: &str) -> Result<()> {
    let body = json!({
        "name": name,
        "composite": false,
        "clientRole": false,
        "containerId": realm,
    });
    let req = HttpRequest::post_json(&session.url(&format!("realms/{realm}/roles")), &body)?;
    let resp = session.send(req).await?;
    match resp.status {
        201 | 204 => {
            info!("Created role '{name}' in realm '{realm}'");
            Ok(())
        }
        409 => {
            debug!("Role '{name}' already exists");
            Ok(())
        }
        _ => Err(IdentityError::from_response(&resp)),
    }
}

pub(crate) async fn lookup(session: &AdminSession<'_>, realm: &str, name: &str) -> Result<Role> {
    let resp = session
        .send(HttpRequest::get(&session.url(&format!("realms/{realm}/roles/{name}"))))
        .await?;
    match resp.status {
        200 => decode(&resp),
        404 => Err(IdentityError::NotFound(format!("role {name}"))),
        _ => Err(IdentityError::from_response(&resp)),
    }
}

/// Map the realm role onto the user
pub(crate) async fn grant(session: &AdminSession<'_>, realm: &str, user: &RegisteredUser, name: &str) -> Result<()> {
    let role = lookup(session, realm, name).await?;
    let url = session.url(&format!("realms/{realm}/users/{}/role-mappings/realm", user.id));
    let req = HttpRequest::post_json(&url, &json!([{"id": role.id, "name": role.name}]))?;
    let resp = session.send(req).await?;
    if resp.status != 204 {
        return Err(IdentityError::from_response(&resp));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        httphandler::HttpMethod,
        httpmock::{HttpMockItem, RestClientMock},
    };

    fn user() -> RegisteredUser {
        RegisteredUser {
            id: "u1".to_string(),
            username: "developer".to_string(),
        }
    }

    #[tokio::test]
    async fn test_existing_role_then_grant() {
        let mock = RestClientMock::new(vec![
            HttpMockItem::new(HttpMethod::Post, "/auth/admin/realms/codewind/roles", 409, ""),
            HttpMockItem::json(
                HttpMethod::Get,
                "/auth/admin/realms/codewind/roles/codewind-ws1",
                200,
                &json!({"id": "r1", "name": "codewind-ws1", "composite": false}),
            ),
            HttpMockItem::new(
                HttpMethod::Post,
                "/auth/admin/realms/codewind/users/u1/role-mappings/realm",
                204,
                "",
            ),
        ]);
        let session = AdminSession::new(&mock, "https://kc", "t");
        ensure(&session, "codewind", "codewind-ws1").await.unwrap();
        grant(&session, "codewind", &user(), "codewind-ws1").await.unwrap();
        let sent = mock.requests();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2].body.as_deref(), Some(r#"[{"id":"r1","name":"codewind-ws1"}]"#));
    }

    #[tokio::test]
    async fn test_grant_must_answer_no_content() {
        let mock = RestClientMock::new(vec![
            HttpMockItem::json(
                HttpMethod::Get,
                "/auth/admin/realms/codewind/roles/codewind-ws1",
                200,
                &json!({"id": "r1", "name": "codewind-ws1"}),
            ),
            HttpMockItem::new(
                HttpMethod::Post,
                "/auth/admin/realms/codewind/users/u1/role-mappings/realm",
                200,
                "",
            ),
        ]);
        let session = AdminSession::new(&mock, "https://kc", "t");
        let err = grant(&session, "codewind", &user(), "codewind-ws1").await.unwrap_err();
        assert_eq!(err.status(), Some(200));
    }

    #[tokio::test]
    async fn test_role_creation_refused() {
        let mock = RestClientMock::new(vec![HttpMockItem::new(
            HttpMethod::Post,
            "/auth/admin/realms/codewind/roles",
            403,
            r#"{"errorMessage":"forbidden"}"#,
        )]);
        let session = AdminSession::new(&mock, "https://kc", "t");
        let err = ensure(&session, "codewind", "codewind-ws1").await.unwrap_err();
        assert_eq!(err, IdentityError::ResponseStatus {
            status: 403,
            description: "forbidden".to_string()
        });
    }
}
