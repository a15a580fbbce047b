#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use passflow::config::FlowConfig;
use passflow::error::FlowError;
use passflow::flow::FlowOrchestrator;
use passflow::gateway::{
    ConfirmSignUpInput, ConfirmSignUpResponse, GatewayError, IdentityGateway, SignInLinkRequest,
    SignInLinkRequester, SignUpInput, SignUpResponse,
};
use passflow::handle::{OperationHandle, OperationId, Outcome};
use passflow::status::{Status, StatusCallback};
use passflow::storage::{KeyValueStorage, MemoryStorage};
use passflow::token::{CredentialBundle, TokensFromRefresh};

pub const CLIENT_ID: &str = "client-123";

/// Shared, ordered record of side effects across doubles.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().expect("journal lock poisoned").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("journal lock poisoned").clone()
    }
}

/// Holds gateway calls open until released.
#[derive(Clone)]
pub struct Gate {
    open: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn closed() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { open: Arc::new(tx) }
    }

    pub fn open() -> Self {
        let gate = Self::closed();
        gate.release();
        gate
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }

    pub async fn wait(&self) {
        let mut rx = self.open.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Gateway double with scripted results and call counters.
///
/// Calls ignore the cancellation token and wait on the gate, the way a
/// request already on the wire still completes remotely.
pub struct ScriptedGateway {
    pub gate: Gate,
    pub journal: Journal,
    pub sign_up_calls: AtomicUsize,
    pub confirm_calls: AtomicUsize,
    pub revoke_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub last_sign_up: Mutex<Option<SignUpInput>>,
    pub last_confirm: Mutex<Option<ConfirmSignUpInput>>,
    pub revoked: Mutex<Vec<(String, bool)>>,
    sign_up_result: Mutex<Result<SignUpResponse, GatewayError>>,
    confirm_result: Mutex<Result<ConfirmSignUpResponse, GatewayError>>,
    revoke_result: Mutex<Result<(), GatewayError>>,
    refresh_result: Mutex<Result<TokensFromRefresh, GatewayError>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::with_gate(Gate::open())
    }

    pub fn with_gate(gate: Gate) -> Self {
        Self {
            gate,
            journal: Journal::default(),
            sign_up_calls: AtomicUsize::new(0),
            confirm_calls: AtomicUsize::new(0),
            revoke_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            last_sign_up: Mutex::new(None),
            last_confirm: Mutex::new(None),
            revoked: Mutex::new(Vec::new()),
            sign_up_result: Mutex::new(Ok(SignUpResponse {
                user_confirmed: false,
                user_sub: Some("sub-alice".to_string()),
                code_delivery_details: None,
            })),
            confirm_result: Mutex::new(Ok(ConfirmSignUpResponse {
                session: Some("session-1".to_string()),
            })),
            revoke_result: Mutex::new(Ok(())),
            refresh_result: Mutex::new(Ok(TokensFromRefresh {
                access_token: Some("access-2".to_string()),
                ..Default::default()
            })),
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn fail_sign_up(&self, err: GatewayError) {
        *self.sign_up_result.lock().unwrap() = Err(err);
    }

    pub fn fail_confirm(&self, err: GatewayError) {
        *self.confirm_result.lock().unwrap() = Err(err);
    }

    pub fn fail_revoke(&self, err: GatewayError) {
        *self.revoke_result.lock().unwrap() = Err(err);
    }

    pub fn refresh_with(&self, tokens: TokensFromRefresh) {
        *self.refresh_result.lock().unwrap() = Ok(tokens);
    }
}

#[async_trait]
impl IdentityGateway for ScriptedGateway {
    async fn sign_up(
        &self,
        input: SignUpInput,
        _cancel: CancellationToken,
    ) -> Result<SignUpResponse, GatewayError> {
        self.sign_up_calls.fetch_add(1, Ordering::SeqCst);
        self.journal.record(format!("sign_up:{}", input.username));
        *self.last_sign_up.lock().unwrap() = Some(input);
        self.gate.wait().await;
        self.sign_up_result.lock().unwrap().clone()
    }

    async fn confirm_sign_up(
        &self,
        input: ConfirmSignUpInput,
        _cancel: CancellationToken,
    ) -> Result<ConfirmSignUpResponse, GatewayError> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        self.journal.record(format!("confirm:{}", input.username));
        *self.last_confirm.lock().unwrap() = Some(input);
        self.gate.wait().await;
        self.confirm_result.lock().unwrap().clone()
    }

    async fn revoke_token(
        &self,
        refresh_token: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<(), GatewayError> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        self.journal.record(format!("revoke:{refresh_token}"));
        self.revoked
            .lock()
            .unwrap()
            .push((refresh_token.to_string(), cancel.is_some()));
        self.revoke_result.lock().unwrap().clone()
    }

    async fn refresh_tokens(
        &self,
        username: &str,
        _refresh_token: &str,
        _cancel: CancellationToken,
    ) -> Result<TokensFromRefresh, GatewayError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.journal.record(format!("refresh:{username}"));
        self.refresh_result.lock().unwrap().clone()
    }
}

/// Memory storage that journals removals and can be told to fail them.
pub struct RecordingStorage {
    inner: MemoryStorage,
    pub journal: Journal,
    pub removals: AtomicUsize,
    pub fail_removals: AtomicBool,
    pub gate: Gate,
    write_gate: Mutex<Gate>,
}

impl RecordingStorage {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: MemoryStorage::new(),
            journal,
            removals: AtomicUsize::new(0),
            fail_removals: AtomicBool::new(false),
            gate: Gate::open(),
            write_gate: Mutex::new(Gate::open()),
        }
    }

    /// Reads wait on `gate` before answering.
    pub fn with_read_gate(mut self, gate: Gate) -> Self {
        self.gate = gate;
        self
    }

    /// Writes started from now on wait on `gate` before landing.
    pub fn hold_writes(&self, gate: Gate) {
        *self.write_gate.lock().unwrap() = gate;
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }
}

#[async_trait]
impl KeyValueStorage for RecordingStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, FlowError> {
        self.gate.wait().await;
        self.inner.get_item(key).await
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), FlowError> {
        let gate = self.write_gate.lock().unwrap().clone();
        gate.wait().await;
        self.journal.record(format!("set:{key}"));
        self.inner.set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), FlowError> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(FlowError::Storage(format!("cannot remove {key}")));
        }
        self.journal.record(format!("remove:{key}"));
        self.inner.remove_item(key).await
    }
}

/// Link requester double: reports the usual statuses and resolves with the
/// username, or refuses to start once told to.
#[derive(Default)]
pub struct StubLinkRequester {
    pub requests: Mutex<Vec<(String, Option<String>, Option<Status>)>>,
    refusal: Mutex<Option<FlowError>>,
}

impl StubLinkRequester {
    pub fn refuse_with(&self, err: FlowError) {
        *self.refusal.lock().unwrap() = Some(err);
    }
}

impl SignInLinkRequester for StubLinkRequester {
    fn request_sign_in_link(
        &self,
        request: SignInLinkRequest,
    ) -> Result<OperationHandle<String>, FlowError> {
        self.requests.lock().unwrap().push((
            request.username.clone(),
            request.redirect_uri.clone(),
            request.current_status,
        ));
        if let Some(err) = self.refusal.lock().unwrap().clone() {
            return Err(err);
        }
        (request.status_cb)(Status::RequestingSigninLink);
        let status_cb = request.status_cb.clone();
        let username = request.username;
        Ok(OperationHandle::spawn(
            OperationId::new(),
            CancellationToken::new(),
            async move {
                status_cb(Status::SigninLinkRequested);
                Ok(Outcome::Completed(username))
            },
        ))
    }
}

/// Records every status transition it is handed.
#[derive(Clone, Default)]
pub struct StatusRecorder(Arc<Mutex<Vec<Status>>>);

impl StatusRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> StatusCallback {
        let seen = Arc::clone(&self.0);
        Arc::new(move |status| seen.lock().unwrap().push(status))
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.0.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Status> {
        self.0.lock().unwrap().last().copied()
    }
}

pub fn config() -> FlowConfig {
    FlowConfig::new(CLIENT_ID)
}

pub fn orchestrator(
    gateway: Arc<ScriptedGateway>,
    storage: Arc<dyn KeyValueStorage>,
    links: Arc<StubLinkRequester>,
) -> FlowOrchestrator {
    FlowOrchestrator::new(config(), gateway, storage, links).expect("valid config")
}

pub fn bundle(username: &str) -> CredentialBundle {
    CredentialBundle {
        username: username.to_string(),
        id_token: "id-1".to_string(),
        access_token: "access-1".to_string(),
        refresh_token: Some("refresh-1".to_string()),
        expire_at: Some(Utc::now() + Duration::hours(1)),
        token_scopes: Some("openid email".to_string()),
    }
}

/// Let spawned tasks run until they park on a gate.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
