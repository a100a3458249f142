/// Low-level request dispatch to the recommendation service
///
/// Every call is one HTTP round trip: build `<base>/<operation>?<query>`,
/// attach the selected key, send an optional JSON body, and either decode the
/// JSON reply or fail with the status and body the service returned. Nothing
/// is retried or cached here.
use crate::{
    error::{ClientError, ClientResult},
    middleware::request_id::{make_span_with_request_id, RequestId, REQUEST_ID_HEADER},
};
use reqwest::{Client as HttpClient, Method};
use serde_json::Value;
use std::time::Duration;
use tracing::Instrument;

/// Header carrying the admin or recommendation key
pub const AUTH_HEADER: &str = "x-api-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Put,
    Post,
    Delete,
    Head,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Put => "PUT",
            Verb::Post => "POST",
            Verb::Delete => "DELETE",
            Verb::Head => "HEAD",
        }
    }
}

impl From<Verb> for Method {
    fn from(verb: Verb) -> Self {
        match verb {
            Verb::Get => Method::GET,
            Verb::Put => Method::PUT,
            Verb::Post => Method::POST,
            Verb::Delete => Method::DELETE,
            Verb::Head => Method::HEAD,
        }
    }
}

/// Which key authenticates a call; always chosen by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKey {
    Admin,
    Recommendation,
}

/// A single service call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub verb: Verb,
    pub operation: String,
    pub key: AuthKey,
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(verb: Verb, operation: impl Into<String>, key: AuthKey) -> Self {
        Self {
            verb,
            operation: operation.into(),
            key,
            body: None,
            query: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Sends one request and returns the decoded JSON reply
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: ApiRequest) -> ClientResult<Value>;
}

#[derive(Clone)]
pub struct HttpDispatcher {
    http_client: HttpClient,
    base_url: String,
    admin_key: String,
    recommendation_key: String,
}

impl HttpDispatcher {
    /// Creates a dispatcher rooted at `base_url` with a per-request timeout
    pub fn new(
        base_url: String,
        admin_key: String,
        recommendation_key: String,
        request_timeout: Duration,
    ) -> ClientResult<Self> {
        let http_client = HttpClient::builder().timeout(request_timeout).build()?;
        Ok(Self::with_client(
            http_client,
            base_url,
            admin_key,
            recommendation_key,
        ))
    }

    pub fn with_client(
        http_client: HttpClient,
        base_url: String,
        admin_key: String,
        recommendation_key: String,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            admin_key,
            recommendation_key,
        }
    }

    /// Full URL for an operation; an empty operation targets the base itself
    pub fn endpoint(&self, operation: &str) -> String {
        let operation = operation.trim_start_matches('/');
        if operation.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, operation)
        }
    }

    fn key_for(&self, key: AuthKey) -> &str {
        match key {
            AuthKey::Admin => &self.admin_key,
            AuthKey::Recommendation => &self.recommendation_key,
        }
    }
}

#[async_trait::async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, request: ApiRequest) -> ClientResult<Value> {
        let url = self.endpoint(&request.operation);
        let request_id = RequestId::new();
        let span = make_span_with_request_id(request.verb.as_str(), &url, &request_id);

        async move {
            let mut builder = self
                .http_client
                .request(request.verb.into(), &url)
                .header(AUTH_HEADER, self.key_for(request.key))
                .header(REQUEST_ID_HEADER, request_id.as_str());

            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            tracing::debug!(operation = %request.operation, "Dispatching request");

            let response = builder.send().await?;
            let status = response.status();

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(
                    status = %status,
                    body = %body,
                    "Service request failed"
                );
                return Err(ClientError::Service {
                    status: status.as_u16(),
                    body,
                });
            }

            let text = response.text().await?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }

            serde_json::from_str(&text).map_err(|e| {
                tracing::error!(error = %e, response = %text, "Failed to decode service response");
                ClientError::Decode(format!("Failed to parse service response: {}", e))
            })
        }
        .instrument(span)
        .await
    }
}
