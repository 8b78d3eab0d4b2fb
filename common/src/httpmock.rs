use crate::{
    Error, Result,
    httphandler::{HttpMethod, HttpRequest, HttpResponse, HttpTransport},
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

/// One scripted answer of the mock: method + path (with query) to the returned response
#[derive(Clone, Debug)]
pub struct HttpMockItem {
    path: String,
    method: HttpMethod,
    response: Option<HttpResponse>,
    once: bool,
}

impl HttpMockItem {
    #[must_use]
    pub fn new(method: HttpMethod, path: &str, status: u16, body: &str) -> Self {
        Self {
            path: path.to_string(),
            method,
            response: Some(HttpResponse::new(status, body)),
            once: false,
        }
    }

    #[must_use]
    pub fn json(method: HttpMethod, path: &str, status: u16, body: &Value) -> Self {
        Self::new(method, path, status, &body.to_string())
    }

    /// The peer cannot be reached on that path
    #[must_use]
    pub fn unreachable(method: HttpMethod, path: &str) -> Self {
        Self {
            path: path.to_string(),
            method,
            response: None,
            once: false,
        }
    }

    /// Answer a single time, later calls fall through to the next matching item
    #[must_use]
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

/// Scripted `HttpTransport` recording every request it receives
#[derive(Debug, Default)]
pub struct RestClientMock {
    mocks: Mutex<Vec<HttpMockItem>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl RestClientMock {
    #[must_use]
    pub fn new(mocks: Vec<HttpMockItem>) -> Self {
        Self {
            mocks: Mutex::new(mocks),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        match self.requests.lock() {
            Ok(r) => r.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }

    /// Number of requests received for a method and path
    pub fn count(&self, method: HttpMethod, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path() == path)
            .count()
    }
}

#[async_trait]
impl HttpTransport for RestClientMock {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
        let path = req.path();
        let method = req.method;
        match self.requests.lock() {
            Ok(mut r) => r.push(req),
            Err(p) => p.into_inner().push(req),
        }
        let mut mocks = match self.mocks.lock() {
            Ok(m) => m,
            Err(p) => p.into_inner(),
        };
        let Some(pos) = mocks.iter().position(|m| m.method == method && m.path == path) else {
            return Err(Error::Other(format!("Failed to find {method:?} {path} in the Mock database")));
        };
        let found = if mocks[pos].once {
            mocks.remove(pos)
        } else {
            mocks[pos].clone()
        };
        found
            .response
            .ok_or_else(|| Error::Other(format!("connection refused for {method:?} {path}")))
    }
}
