//! Scripted transport for unit tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::fallback::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError};

pub(crate) const PRIMARY: &str = "http://local.test";
pub(crate) const PRODUCTION: &str = "http://prod.test";

#[derive(Clone, Debug)]
pub(crate) enum MockReply {
    Response(HttpResponse),
    Fail(TransportError),
    Hang,
    Delayed(Duration, Box<MockReply>),
}

impl MockReply {
    pub(crate) fn json(status: u16, value: serde_json::Value) -> Self {
        Self::Response(HttpResponse::new(status, value.to_string()))
    }

    pub(crate) fn status(status: u16, body: &str) -> Self {
        Self::Response(HttpResponse::new(status, body))
    }
}

struct Route {
    method: Option<HttpMethod>,
    pattern: String,
    reply: MockReply,
}

#[derive(Default)]
struct Inner {
    routes: Vec<Route>,
    calls: Vec<HttpRequest>,
}

/// Replies are picked by the longest pattern contained in the request URL
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn route(&self, pattern: &str, reply: MockReply) {
        self.inner.lock().routes.push(Route {
            method: None,
            pattern: pattern.to_string(),
            reply,
        });
    }

    pub(crate) fn route_method(&self, method: HttpMethod, pattern: &str, reply: MockReply) {
        self.inner.lock().routes.push(Route {
            method: Some(method),
            pattern: pattern.to_string(),
            reply,
        });
    }

    pub(crate) fn calls(&self) -> Vec<HttpRequest> {
        self.inner.lock().calls.clone()
    }

    pub(crate) fn calls_to(&self, pattern: &str) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.url.contains(pattern))
            .count()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let reply = {
            let mut inner = self.inner.lock();
            inner.calls.push(request.clone());
            inner
                .routes
                .iter()
                .filter(|r| r.method.map_or(true, |m| m == request.method))
                .filter(|r| request.url.contains(&r.pattern))
                .max_by_key(|r| r.pattern.len())
                .map(|r| r.reply.clone())
        };

        let mut reply = reply.unwrap_or_else(|| MockReply::status(404, "no route"));
        loop {
            match reply {
                MockReply::Response(response) => return Ok(response),
                MockReply::Fail(error) => return Err(error),
                MockReply::Hang => std::future::pending::<()>().await,
                MockReply::Delayed(delay, next) => {
                    tokio::time::sleep(delay).await;
                    reply = *next;
                }
            }
        }
    }
}
