//! Shared fixtures for connector tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::credentials::{CredentialPrompt, PromptRequest, PromptResponse};
use super::host::{Capability, Host};
use super::listener::{CommunicationsEvent, ConnectorListener, EventKind};
use super::registry::ConnectorServiceRegistry;
use super::service::{ConnectorService, ConnectorServiceBuilder};
use super::session::ClientSession;
use super::store::{CredentialStore, MemoryAuthBackend};
use super::transport::ConnectorTransport;
use crate::error::{ConnectorError, SessionError, TransportError};

/// Transport that counts calls and fails on request.
#[derive(Default)]
pub struct MockTransport {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    connect_error: Mutex<Option<TransportError>>,
    disconnect_error: Mutex<Option<TransportError>>,
    home: Mutex<Option<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every connect sleeps this long after being counted.
    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn failing_connect(self: Arc<Self>, error: TransportError) -> Arc<Self> {
        *self.connect_error.lock().unwrap() = Some(error);
        self
    }

    pub fn failing_disconnect(self: Arc<Self>, error: TransportError) -> Arc<Self> {
        *self.disconnect_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_home(self: Arc<Self>, home: &str) -> Arc<Self> {
        *self.home.lock().unwrap() = Some(home.to_string());
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectorTransport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(
        &self,
        _service: &ConnectorService,
        _cancel: &CancellationToken,
    ) -> Result<(), ConnectorError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.connect_error.lock().unwrap().clone() {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    async fn disconnect(
        &self,
        _service: &ConnectorService,
        _cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        match self.disconnect_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn home_directory(&self) -> Option<String> {
        self.home.lock().unwrap().clone()
    }
}

/// Client session that records hook calls.
#[derive(Default)]
pub struct MockSession {
    name: String,
    local_user_id: Option<String>,
    uppercase: bool,
    fail_initialize: bool,
    fail_uninitialize: bool,
    initialized: AtomicUsize,
    uninitialized: AtomicUsize,
    updated_default: Mutex<Option<String>>,
}

impl MockSession {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_local_user_id(mut self, user_id: &str) -> Self {
        self.local_user_id = Some(user_id.to_string());
        self
    }

    pub fn with_uppercase(mut self) -> Self {
        self.uppercase = true;
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_uninitialize(mut self) -> Self {
        self.fail_uninitialize = true;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn initialized(&self) -> usize {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn uninitialized(&self) -> usize {
        self.uninitialized.load(Ordering::SeqCst)
    }

    pub fn updated_default_user_id(&self) -> Option<String> {
        self.updated_default.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientSession for MockSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, _cancel: &CancellationToken) -> Result<(), SessionError> {
        if self.fail_initialize {
            return Err(SessionError::new(&self.name, "initialize failed"));
        }
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn uninitialize(&self, _cancel: &CancellationToken) -> Result<(), SessionError> {
        if self.fail_uninitialize {
            return Err(SessionError::new(&self.name, "uninitialize failed"));
        }
        self.uninitialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn local_user_id(&self) -> Option<String> {
        self.local_user_id.clone()
    }

    fn force_user_id_to_uppercase(&self) -> bool {
        self.uppercase
    }

    fn update_default_user_id(&self, user_id: &str) {
        *self.updated_default.lock().unwrap() = Some(user_id.to_string());
    }
}

/// Listener that records event kinds.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<EventKind>>,
    passive: bool,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn passive() -> Arc<Self> {
        Arc::new(Self {
            passive: true,
            ..Default::default()
        })
    }

    pub fn events(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().clone()
    }
}

impl ConnectorListener for RecordingListener {
    fn on_event(&self, event: &CommunicationsEvent) {
        self.events.lock().unwrap().push(event.kind);
    }

    fn is_passive(&self) -> bool {
        self.passive
    }
}

/// Prompt that replays canned answers and records requests.
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<Option<PromptResponse>>>,
    requests: Mutex<Vec<PromptRequest>>,
}

impl ScriptedPrompt {
    fn with_answers(answers: Vec<Option<PromptResponse>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn declining() -> Arc<Self> {
        Self::with_answers(vec![None])
    }

    pub fn answering(user_id: &str, password: &str, save_password: bool) -> Arc<Self> {
        Self::with_answers(vec![Some(PromptResponse {
            user_id: user_id.to_string(),
            password: password.to_string(),
            save_password,
            user_id_permanent: false,
        })])
    }

    pub fn answering_permanent(user_id: &str, password: &str) -> Arc<Self> {
        Self::with_answers(vec![Some(PromptResponse {
            user_id: user_id.to_string(),
            password: password.to_string(),
            save_password: false,
            user_id_permanent: true,
        })])
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<PromptRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CredentialPrompt for ScriptedPrompt {
    async fn prompt(&self, request: PromptRequest) -> Option<PromptResponse> {
        self.requests.lock().unwrap().push(request);
        self.answers.lock().unwrap().pop_front().flatten()
    }
}

pub fn service_builder(host: Arc<Host>) -> ConnectorServiceBuilder {
    service_with_transport(host, MockTransport::new())
}

pub fn service_with_transport(host: Arc<Host>, transport: Arc<MockTransport>) -> ConnectorServiceBuilder {
    ConnectorService::builder("mock", host, Capability::Files, transport)
}

/// Registry whose services share `transport` and one in-memory store.
pub fn test_registry(transport: Arc<MockTransport>) -> Arc<ConnectorServiceRegistry> {
    let store = Arc::new(
        CredentialStore::new(Arc::new(MemoryAuthBackend::new()), "file://rse")
            .expect("valid store location"),
    );

    ConnectorServiceRegistry::new(move |host, capability| {
        ConnectorService::builder(
            format!("{}-{}", capability, host.host_name()),
            host.clone(),
            capability.clone(),
            transport.clone(),
        )
        .store(store.clone())
        .build()
    })
}
