//! HTTP transport.
//!
//! # Responsibilities
//! - Abstract the outbound call behind `HttpSender` (mockable in tests)
//! - Issue requests with reqwest, adding the bearer token when configured
//! - Read the full response so callers can classify it
//!
//! Non-2xx responses are returned as `Ok`; callers decide what a failure is.

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::TransportConfig;
use crate::http::request::HttpRequest;
use crate::http::response::{HttpResponse, RequestError};

/// Something that can deliver an [`HttpRequest`].
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RequestError>;
}

/// Production sender backed by a pooled reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestSender {
    client: Client,
    auth_token: Option<String>,
}

impl ReqwestSender {
    pub fn new(config: &TransportConfig) -> Result<Self, RequestError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            auth_token: config.auth_token.clone(),
        })
    }
}

#[async_trait]
impl HttpSender for ReqwestSender {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RequestError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| RequestError::Invalid(format!("method {}: {}", request.method, e)))?;

        let mut builder = self.client.request(method, &request.url);

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RequestError::Invalid(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RequestError::Invalid(format!("header value: {}", e)))?;
            builder = builder.header(name, value);
        }

        if let Some(token) = &self.auth_token {
            if !request.has_header(AUTHORIZATION.as_str()) {
                builder = builder.bearer_auth(token);
            }
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response.text().await?;

        tracing::debug!(method = %request.method, url = %request.url, status, "Request completed");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
