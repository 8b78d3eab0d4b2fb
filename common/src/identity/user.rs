use super::{AdminSession, IdentityError, Result, decode, query_value};
use crate::httphandler::HttpRequest;
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct RegisteredUser {
    pub id: String,
    pub username: String,
}

/// The search endpoint matches substrings, keep only the exact username
pub(crate) async fn find(session: &AdminSession<'_>, realm: &str, username: &str) -> Result<RegisteredUser> {
    let url = session.url(&format!("realms/{realm}/users?username={}", query_value(username)));
    let resp = session.send(HttpRequest::get(&url)).await?;
    if resp.status != 200 {
        return Err(IdentityError::from_response(&resp));
    }
    decode::<Vec<RegisteredUser>>(&resp)?
        .into_iter()
        .find(|u| u.username.eq_ignore_ascii_case(username))
        .ok_or_else(|| IdentityError::NotFound(format!("user {username}")))
}
