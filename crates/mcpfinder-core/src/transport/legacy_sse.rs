//! Legacy HTTP+SSE transport.
//!
//! The client holds a GET event stream open on the locator URL. The first
//! `endpoint` event names the URL that requests are POSTed to; responses
//! come back as `message` events on the stream.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderValue};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;

use super::credential::ScopedCredential;
use super::jsonrpc::{JsonRpcMessage, JsonRpcRequest};
use super::sse::{SseDecoder, SseEvent};
use super::{McpTransport, check_status, http_client};
use crate::error::{ConnectFailure, TransportError};

/// An open event stream and the endpoint it announced.
struct Channel {
    endpoint: Url,
    messages: mpsc::UnboundedReceiver<JsonRpcMessage>,
    reader: JoinHandle<()>,
}

pub struct LegacySseTransport {
    url: Url,
    client: reqwest::Client,
    credential: Option<ScopedCredential>,
    channel: Option<Channel>,
    next_id: u64,
    timeout: Duration,
}

impl LegacySseTransport {
    /// Build the transport. The event stream is opened on first use.
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
            channel: None,
            next_id: 1,
            timeout,
        })
    }

    /// The POST endpoint announced by the server, once the stream is open.
    pub fn endpoint(&self) -> Option<&Url> {
        self.channel.as_ref().map(|c| &c.endpoint)
    }

    async fn channel(&mut self) -> Result<&mut Channel, TransportError> {
        if self.channel.is_none() {
            let channel = self.open().await?;
            self.channel = Some(channel);
        }
        self.channel.as_mut().ok_or(TransportError::Closed)
    }

    async fn open(&self) -> Result<Channel, TransportError> {
        tracing::debug!(url = %self.url, "opening SSE stream");

        let mut request = self
            .client
            .get(self.url.clone())
            .header(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        if let Some(value) = self
            .credential
            .as_ref()
            .and_then(|c| c.authorization_for(&self.url))
        {
            request = request.header(header::AUTHORIZATION, value);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|e| TransportError::from_reqwest(&e, self.timeout))?;
        let response = check_status(response).await?;

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let (message_tx, messages) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_stream(
            response,
            self.url.clone(),
            endpoint_tx,
            message_tx,
        ));

        let endpoint = match tokio::time::timeout(self.timeout, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                reader.abort();
                return Err(TransportError::Protocol(
                    "event stream ended before announcing an endpoint".to_string(),
                ));
            }
            Err(_) => {
                reader.abort();
                return Err(TransportError::Timeout(self.timeout));
            }
        };
        tracing::debug!(endpoint = %endpoint, "SSE endpoint announced");

        Ok(Channel {
            endpoint,
            messages,
            reader,
        })
    }

    async fn post(&mut self, message: &JsonRpcRequest) -> Result<(), TransportError> {
        let timeout = self.timeout;
        let client = self.client.clone();
        let endpoint = self.channel().await?.endpoint.clone();

        let mut request = client
            .post(endpoint.clone())
            .json(message)
            .timeout(timeout);
        if let Some(value) = self
            .credential
            .as_ref()
            .and_then(|c| c.authorization_for(&endpoint))
        {
            request = request.header(header::AUTHORIZATION, value);
        }

        tracing::debug!(endpoint = %endpoint, method = %message.method, id = ?message.id, "POST");
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e, timeout))?;
        check_status(response).await.map(drop)
    }
}

async fn read_stream(
    mut response: reqwest::Response,
    base: Url,
    endpoint_tx: oneshot::Sender<Url>,
    messages: mpsc::UnboundedSender<JsonRpcMessage>,
) {
    let mut decoder = SseDecoder::new();
    let mut endpoint_tx = Some(endpoint_tx);

    loop {
        let events = match response.chunk().await {
            Ok(Some(bytes)) => decoder.push(&bytes),
            Ok(None) => {
                decoder.finish().into_iter().for_each(|event| {
                    dispatch(event, &base, &mut endpoint_tx, &messages);
                });
                break;
            }
            Err(e) => {
                tracing::debug!(error = %e, "SSE stream failed");
                break;
            }
        };
        for event in events {
            dispatch(event, &base, &mut endpoint_tx, &messages);
        }
    }

    tracing::debug!(url = %base, "SSE stream closed");
}

fn dispatch(
    event: SseEvent,
    base: &Url,
    endpoint_tx: &mut Option<oneshot::Sender<Url>>,
    messages: &mpsc::UnboundedSender<JsonRpcMessage>,
) {
    if event.event.as_deref() == Some("endpoint") {
        match base.join(event.data.trim()) {
            Ok(endpoint) => {
                if let Some(tx) = endpoint_tx.take() {
                    let _ = tx.send(endpoint);
                }
            }
            Err(e) => tracing::warn!(data = %event.data, error = %e, "invalid endpoint event"),
        }
        return;
    }

    if !event.is_message() {
        return;
    }
    match serde_json::from_str::<JsonRpcMessage>(&event.data) {
        Ok(message) => {
            let _ = messages.send(message);
        }
        Err(e) => tracing::warn!(error = %e, "failed to parse SSE event as JSON-RPC"),
    }
}

#[async_trait]
impl McpTransport for LegacySseTransport {
    async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, TransportError> {
        let id = self.next_id;
        self.next_id += 1;

        self.post(&JsonRpcRequest::request(id, method, params)).await?;

        let timeout = self.timeout;
        let channel = self.channel().await?;
        let wait = async {
            while let Some(message) = channel.messages.recv().await {
                if message.answers(id) {
                    return Ok(message);
                }
                tracing::debug!(method = ?message.method, "ignoring unrelated message");
            }
            Err(TransportError::Closed)
        };
        let message = tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        message.into_result()
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        self.post(&JsonRpcRequest::notification(method, params)).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(channel) = self.channel.take() {
            channel.reader.abort();
        }
        Ok(())
    }
}

impl Drop for LegacySseTransport {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.reader.abort();
        }
    }
}
