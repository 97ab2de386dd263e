//! Streamable HTTP transport.
//!
//! Every JSON-RPC message is POSTed to the locator URL. The server answers
//! with either a JSON body or a `text/event-stream` carrying the response.
//! The `Mcp-Session-Id` handed out on initialize is echoed on later calls.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde_json::Value;
use url::Url;

use super::credential::ScopedCredential;
use super::jsonrpc::{JsonRpcMessage, JsonRpcRequest, response_in_body};
use super::sse::SseDecoder;
use super::{McpTransport, check_status, http_client};
use crate::error::{ConnectFailure, TransportError};

const SESSION_ID_HEADER: &str = "mcp-session-id";
const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

pub struct StreamableHttpTransport {
    url: Url,
    client: reqwest::Client,
    credential: Option<ScopedCredential>,
    session_id: Option<String>,
    protocol_version: Option<String>,
    next_id: u64,
    timeout: Duration,
}

impl StreamableHttpTransport {
    /// Build the transport. Nothing is sent until the first request.
    pub fn new(
        url: Url,
        credential: Option<ScopedCredential>,
        timeout: Duration,
    ) -> Result<Self, ConnectFailure> {
        let client = http_client(&url, timeout)?;
        Ok(Self {
            url,
            client,
            credential,
            session_id: None,
            protocol_version: None,
            next_id: 1,
            timeout,
        })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(value) = self
            .credential
            .as_ref()
            .and_then(|c| c.authorization_for(&self.url))
        {
            headers.insert(header::AUTHORIZATION, value);
        }
        if let Some(id) = &self.session_id
            && let Ok(value) = HeaderValue::from_str(id)
        {
            headers.insert(SESSION_ID_HEADER, value);
        }
        if let Some(version) = &self.protocol_version
            && let Ok(value) = HeaderValue::from_str(version)
        {
            headers.insert(PROTOCOL_VERSION_HEADER, value);
        }
        headers
    }

    async fn post(&mut self, message: &JsonRpcRequest) -> Result<reqwest::Response, TransportError> {
        tracing::debug!(url = %self.url, method = %message.method, id = ?message.id, "POST");

        let response = self
            .client
            .post(self.url.clone())
            .headers(self.headers())
            .json(message)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e, self.timeout))?;

        if let Some(id) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if self.session_id.as_deref() != Some(id) {
                tracing::debug!(session_id = id, "captured MCP session id");
            }
            self.session_id = Some(id.to_string());
        }

        check_status(response).await
    }

    /// Read an event-stream body until the response to `id` arrives.
    async fn response_from_stream(
        &self,
        mut response: reqwest::Response,
        id: u64,
    ) -> Result<JsonRpcMessage, TransportError> {
        let mut decoder = SseDecoder::new();
        loop {
            let chunk = response
                .chunk()
                .await
                .map_err(|e| TransportError::from_reqwest(&e, self.timeout))?;

            let finished = chunk.is_none();
            let events = match chunk {
                Some(bytes) => decoder.push(&bytes),
                None => decoder.finish().into_iter().collect(),
            };

            for event in events.iter().filter(|e| e.is_message()) {
                match serde_json::from_str::<JsonRpcMessage>(&event.data) {
                    Ok(message) if message.answers(id) => return Ok(message),
                    Ok(message) => {
                        tracing::debug!(method = ?message.method, "ignoring unrelated message");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to parse SSE event as JSON-RPC");
                    }
                }
            }

            if finished {
                return Err(TransportError::Protocol(format!(
                    "event stream ended without a response to request {id}"
                )));
            }
        }
    }
}

fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"))
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, TransportError> {
        let id = self.next_id;
        self.next_id += 1;

        let response = self.post(&JsonRpcRequest::request(id, method, params)).await?;

        let message = if is_event_stream(&response) {
            let timeout = self.timeout;
            tokio::time::timeout(timeout, self.response_from_stream(response, id))
                .await
                .map_err(|_| TransportError::Timeout(timeout))??
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::from_reqwest(&e, self.timeout))?;
            response_in_body(&body, id)?.ok_or_else(|| {
                TransportError::Protocol(format!("no response to request {id} in body"))
            })?
        };

        let result = message.into_result()?;
        if method == "initialize"
            && let Some(version) = result.get("protocolVersion").and_then(Value::as_str)
        {
            self.protocol_version = Some(version.to_string());
        }
        Ok(result)
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        self.post(&JsonRpcRequest::notification(method, params))
            .await
            .map(drop)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(session_id) = self.session_id.take() else {
            return Ok(());
        };

        // Best effort: servers may not support explicit session termination.
        let result = self
            .client
            .delete(self.url.clone())
            .header(SESSION_ID_HEADER, session_id)
            .timeout(self.timeout)
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!(url = %self.url, error = %e, "session DELETE failed");
        }
        Ok(())
    }
}
