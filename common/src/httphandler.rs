use crate::{Error, Result, get_client_name};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

/// One HTTP exchange, independent of the client that performs it
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// Overrides the client timeout for this exchange
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: HttpMethod, url: &str) -> Self {
        Self {
            method,
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn get(url: &str) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post_json(url: &str, body: &Value) -> Result<Self> {
        Self::new(HttpMethod::Post, url).json(body)
    }

    pub fn put_json(url: &str, body: &Value) -> Result<Self> {
        Self::new(HttpMethod::Put, url).json(body)
    }

    #[must_use]
    pub fn post_form(url: &str, fields: &[(&str, &str)]) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        let mut req = Self::new(HttpMethod::Post, url).header("Content-Type", "application/x-www-form-urlencoded");
        req.body = Some(body);
        req
    }

    pub fn json(mut self, body: &Value) -> Result<Self> {
        self.body = Some(serde_json::to_string(body).map_err(Error::SerializationError)?);
        Ok(self.header("Content-Type", "application/json; charset=utf-8"))
    }

    #[must_use]
    pub fn header(mut self, key: &str, value: &str) -> Self {
        if !self.headers.iter().any(|(k, _)| k == key) {
            self.headers.push((key.to_string(), value.to_string()));
        }
        self
    }

    #[must_use]
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", &format!("Bearer {token}"))
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Path and query of the url, relative to the host
    pub fn path(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(u) => match u.query() {
                Some(q) => format!("{}?{q}", u.path()),
                None => u.path().to_string(),
            },
            Err(_) => self.url.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }
}

/// Performs HTTP exchanges. A transport error means the peer could not be reached;
/// any response, whatever its status, is a success of the transport.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse>;
}

/// Timeout of an exchange that does not set its own
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// `HttpTransport` backed by a single reqwest client
#[derive(Clone, Debug)]
pub struct RestClient {
    client: Client,
}

impl RestClient {
    /// `accept_invalid_certs` is meant for the self signed certificates of the
    /// identity providers deployed by the operator
    pub fn new(accept_invalid_certs: bool) -> Result<Self> {
        let client = Client::builder()
            .user_agent(get_client_name())
            .timeout(DEFAULT_TIMEOUT)
            .use_rustls_tls()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| {
                warn!("CLIENT: {e:?}");
                Error::ReqwestError(e)
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for RestClient {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
        debug!("http {:?} '{}'", req.method, req.url);
        let mut builder = match req.method {
            HttpMethod::Get => self.client.get(&req.url),
            HttpMethod::Post => self.client.post(&req.url),
            HttpMethod::Put => self.client.put(&req.url),
        };
        for (key, val) in &req.headers {
            builder = builder.header(key, val);
        }
        if let Some(timeout) = req.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }
        let response = builder.send().await.map_err(Error::ReqwestError)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(Error::ReqwestError)?;
        Ok(HttpResponse { status, body })
    }
}
