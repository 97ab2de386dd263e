//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mcpfinder_core::auth::{AuthProbe, AuthProber};
use mcpfinder_core::error::{Cancelled, ConnectFailure, TransportError};
use mcpfinder_core::locator::Locator;
use mcpfinder_core::operator::Operator;
use mcpfinder_core::transport::{Connector, McpTransport, Session, SessionCredential};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

/// One scripted operator answer.
#[derive(Debug, Clone)]
pub enum Answer {
    Input(&'static str),
    Secret(&'static str),
    Confirm(bool),
    Select(usize),
    Many(Vec<usize>),
}

/// Operator that replays answers in order. Running out of answers cancels.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    answers: VecDeque<Answer>,
    pub prompts: Vec<String>,
    pub notices: Vec<String>,
}

impl ScriptedOperator {
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }

    fn next(&mut self, prompt: &str) -> Result<Answer, Cancelled> {
        self.prompts.push(prompt.to_string());
        self.answers.pop_front().ok_or(Cancelled)
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String, Cancelled> {
        match self.next(prompt)? {
            Answer::Input("") => Ok(default.unwrap_or_default().to_string()),
            Answer::Input(text) => Ok(text.to_string()),
            other => panic!("expected input answer for '{prompt}', got {other:?}"),
        }
    }

    async fn secret(&mut self, prompt: &str) -> Result<SecretString, Cancelled> {
        match self.next(prompt)? {
            Answer::Secret(text) => Ok(SecretString::from(text.to_string())),
            other => panic!("expected secret answer for '{prompt}', got {other:?}"),
        }
    }

    async fn confirm(&mut self, prompt: &str, _default: bool) -> Result<bool, Cancelled> {
        match self.next(prompt)? {
            Answer::Confirm(yes) => Ok(yes),
            other => panic!("expected confirm answer for '{prompt}', got {other:?}"),
        }
    }

    async fn select(
        &mut self,
        prompt: &str,
        _items: &[String],
        _default: usize,
    ) -> Result<usize, Cancelled> {
        match self.next(prompt)? {
            Answer::Select(index) => Ok(index),
            other => panic!("expected select answer for '{prompt}', got {other:?}"),
        }
    }

    async fn select_many(
        &mut self,
        prompt: &str,
        _items: &[String],
    ) -> Result<Vec<usize>, Cancelled> {
        match self.next(prompt)? {
            Answer::Many(indices) => Ok(indices),
            other => panic!("expected multi-select answer for '{prompt}', got {other:?}"),
        }
    }

    fn notice(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }
}

/// What a fake MCP server offers.
#[derive(Debug, Clone)]
pub struct FakeServer {
    pub name: &'static str,
    pub tools: Vec<&'static str>,
    pub resources: Vec<&'static str>,
    pub prompts: Vec<&'static str>,
}

impl FakeServer {
    pub fn with_tools(name: &'static str, tools: &[&'static str]) -> Self {
        Self {
            name,
            tools: tools.to_vec(),
            resources: Vec::new(),
            prompts: Vec::new(),
        }
    }

    fn initialize_result(&self) -> Value {
        let mut capabilities = serde_json::Map::new();
        if !self.tools.is_empty() {
            capabilities.insert("tools".into(), json!({}));
        }
        if !self.resources.is_empty() {
            capabilities.insert("resources".into(), json!({}));
        }
        if !self.prompts.is_empty() {
            capabilities.insert("prompts".into(), json!({}));
        }
        json!({
            "protocolVersion": "2025-03-26",
            "capabilities": capabilities,
            "serverInfo": { "name": self.name, "version": "1.0.0" }
        })
    }

    fn answer(&self, method: &str) -> Result<Value, TransportError> {
        match method {
            "initialize" => Ok(self.initialize_result()),
            "tools/list" => {
                let tools: Vec<Value> = self
                    .tools
                    .iter()
                    .map(|name| {
                        json!({
                            "name": name,
                            "description": format!("{name} tool"),
                            "inputSchema": { "type": "object" }
                        })
                    })
                    .collect();
                Ok(json!({ "tools": tools }))
            }
            "resources/list" => {
                let resources: Vec<Value> = self
                    .resources
                    .iter()
                    .map(|name| json!({ "name": name, "uri": format!("file:///{name}") }))
                    .collect();
                Ok(json!({ "resources": resources }))
            }
            "prompts/list" => {
                let prompts: Vec<Value> =
                    self.prompts.iter().map(|name| json!({ "name": name })).collect();
                Ok(json!({ "prompts": prompts }))
            }
            other => Err(TransportError::Rpc {
                code: -32601,
                message: format!("method not found: {other}"),
            }),
        }
    }
}

/// Transport answering from a [`FakeServer`], or refusing every request.
pub struct ScriptedTransport {
    server: FakeServer,
    refuse: bool,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl McpTransport for ScriptedTransport {
    async fn request(
        &mut self,
        method: &str,
        _params: Option<Value>,
    ) -> Result<Value, TransportError> {
        if self.refuse {
            return Err(TransportError::Unauthorized {
                status: 401,
                challenge: Some("Bearer realm=\"mcp\"".to_string()),
                body: "{\"error\":\"unauthorized\"}".to_string(),
            });
        }
        self.server.answer(method)
    }

    async fn notify(&mut self, _method: &str, _params: Option<Value>) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing out scripted sessions.
///
/// With `accepted_token` set, sessions without exactly that token refuse
/// every request with HTTP 401.
pub struct FakeConnector {
    server: FakeServer,
    require_auth: bool,
    accepted_token: Option<&'static str>,
    with_scratch: bool,
    /// Token presented on each connect, in order
    pub credentials: Arc<Mutex<Vec<Option<String>>>>,
    /// Scratch directories handed to sessions
    pub scratch_dirs: Arc<Mutex<Vec<PathBuf>>>,
    pub closed: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn open(server: FakeServer) -> Self {
        Self {
            server,
            require_auth: false,
            accepted_token: None,
            with_scratch: false,
            credentials: Arc::default(),
            scratch_dirs: Arc::default(),
            closed: Arc::default(),
        }
    }

    /// Refuses unless `token` is presented; `None` refuses everything.
    pub fn guarded(server: FakeServer, token: Option<&'static str>) -> Self {
        Self {
            require_auth: true,
            accepted_token: token,
            ..Self::open(server)
        }
    }

    pub fn with_scratch_dirs(mut self) -> Self {
        self.with_scratch = true;
        self
    }

    pub fn connections(&self) -> usize {
        self.credentials.lock().unwrap().len()
    }

    pub fn closes(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        locator: &Locator,
        credential: Option<&SessionCredential>,
    ) -> Result<Session, ConnectFailure> {
        let token = credential.map(|c| c.token().expose_secret().to_string());
        self.credentials.lock().unwrap().push(token.clone());

        let refuse = self.require_auth
            && match (self.accepted_token, token.as_deref()) {
                (Some(accepted), Some(given)) => accepted != given,
                _ => true,
            };
        let transport = ScriptedTransport {
            server: self.server.clone(),
            refuse,
            closed: Arc::clone(&self.closed),
        };

        let mut session = Session::new(locator.clone(), Box::new(transport));
        if self.with_scratch {
            let dir = tempfile::Builder::new()
                .prefix("mcpfinder-test-")
                .tempdir()
                .map_err(ConnectFailure::Workspace)?;
            self.scratch_dirs.lock().unwrap().push(dir.path().to_path_buf());
            session = session.with_scratch_dir(dir);
        }
        Ok(session)
    }
}

/// Prober returning a fixed result.
#[derive(Debug, Clone, Default)]
pub struct StaticProber(pub AuthProbe);

#[async_trait]
impl AuthProber for StaticProber {
    async fn probe(&self, _locator: &Locator) -> AuthProbe {
        self.0.clone()
    }
}
