//! Flow orchestrator: sign-up, confirmation, sign-out and token hand-off.
//!
//! Every entry point follows the same shape:
//! 1. check the caller's current status (busy statuses are rejected
//!    synchronously with [`FlowError::InvalidState`]),
//! 2. emit the busy status,
//! 3. spawn a cancellable task that calls the gateway,
//! 4. on success emit the idle success status (and chain or persist),
//! 5. on failure emit the idle failure status and reject with the
//!    gateway's error, on cancellation restore the caller's status.
//!
//! Sign-up and confirmation run through a per-orchestrator
//! [`SingleFlight`] guard, so concurrent calls share one request.

mod complete;
mod confirm;
mod sign_out;
mod sign_up;

pub use complete::{Confirmation, SignUpFlow};
pub use confirm::{ConfirmOutcome, ConfirmSignUpRequest};
pub use sign_out::{LocalRemovalCallback, SignOutRequest};
pub use sign_up::SignUpRequest;

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::config::FlowConfig;
use crate::error::FlowError;
use crate::flight::SingleFlight;
use crate::gateway::{IdentityGateway, SignInLinkRequester, SignUpResponse};
use crate::refresh::{default_tokens_callback, ExpiryRefreshScheduler, RefreshScheduler};
use crate::status::{Status, StatusCallback};
use crate::storage::{CredentialStore, KeyValueStorage};
use crate::token::CredentialBundle;

/// Single-flight key for sign-up.
pub const SIGN_UP_KEY: &str = "sign-up";
/// Single-flight key for sign-up confirmation.
pub const CONFIRM_SIGN_UP_KEY: &str = "confirm-sign-up";

#[derive(Default)]
struct Flights {
    sign_up: SingleFlight<SignUpResponse>,
    confirm_sign_up: SingleFlight<ConfirmOutcome>,
}

/// Drives the authentication flows against an identity provider.
///
/// Cheap to clone; clones share the single-flight guards and the active
/// refresh chain. Independently constructed orchestrators share nothing.
/// Entry points spawn onto the current tokio runtime.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use passflow::config::FlowConfig;
/// use passflow::flow::{FlowOrchestrator, SignUpRequest};
/// use passflow::gateway::{CognitoGateway, SignInLinkRequester};
/// use passflow::storage::MemoryStorage;
///
/// # async fn example(links: Arc<dyn SignInLinkRequester>) -> passflow::error::Result<()> {
/// let config = FlowConfig::from_env();
/// let gateway = Arc::new(CognitoGateway::new(&config)?);
/// let flows = FlowOrchestrator::new(config, gateway, Arc::new(MemoryStorage::new()), links)?;
///
/// let handle = flows.sign_up(
///     SignUpRequest::builder()
///         .username("alice")
///         .email("alice@example.com")
///         .status_cb(Arc::new(|status| println!("{status}")))
///         .build(),
/// )?;
/// let outcome = handle.completed().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FlowOrchestrator {
    config: Arc<FlowConfig>,
    gateway: Arc<dyn IdentityGateway>,
    credentials: CredentialStore,
    sign_in_link: Arc<dyn SignInLinkRequester>,
    refresh: Arc<dyn RefreshScheduler>,
    flights: Arc<Flights>,
    refresh_abort: Arc<Mutex<Option<CancellationToken>>>,
}

impl std::fmt::Debug for FlowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowOrchestrator")
            .field("config", &self.config)
            .field("credentials", &self.credentials)
            .field("sign_up", &self.flights.sign_up)
            .field("confirm_sign_up", &self.flights.confirm_sign_up)
            .finish_non_exhaustive()
    }
}

impl FlowOrchestrator {
    /// Build an orchestrator with the default expiry-based refresh scheduler.
    pub fn new(
        config: FlowConfig,
        gateway: Arc<dyn IdentityGateway>,
        storage: Arc<dyn KeyValueStorage>,
        sign_in_link: Arc<dyn SignInLinkRequester>,
    ) -> Result<Self, FlowError> {
        config.validate()?;
        let credentials = CredentialStore::new(storage, &config);
        let refresh = Arc::new(ExpiryRefreshScheduler::new(
            Arc::clone(&gateway),
            credentials.clone(),
            config.refresh_margin,
        ));
        Ok(Self {
            config: Arc::new(config),
            gateway,
            credentials,
            sign_in_link,
            refresh,
            flights: Arc::new(Flights::default()),
            refresh_abort: Arc::new(Mutex::new(None)),
        })
    }

    pub fn with_refresh_scheduler(mut self, scheduler: Arc<dyn RefreshScheduler>) -> Self {
        self.refresh = scheduler;
        self
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Persist freshly issued tokens and keep them refreshed.
    ///
    /// Replaces (and aborts) any refresh chain started earlier by this
    /// orchestrator.
    pub async fn handle_tokens(&self, tokens: CredentialBundle) -> Result<(), FlowError> {
        let abort = CancellationToken::new();
        if let Some(previous) = lock_abort(&self.refresh_abort).replace(abort.clone()) {
            previous.cancel();
        }
        default_tokens_callback(
            self.credentials.clone(),
            Arc::clone(&self.refresh),
            tokens,
            abort,
        )
        .await
    }

    /// Abort the running refresh chain, if any.
    pub fn stop_token_refresh(&self) {
        stop_refresh_chain(&self.refresh_abort);
    }

    /// Whether a sign-up request is currently in flight.
    pub fn sign_up_pending(&self) -> bool {
        self.flights.sign_up.is_pending(SIGN_UP_KEY)
    }

    /// Whether a confirmation request is currently in flight.
    pub fn confirm_sign_up_pending(&self) -> bool {
        self.flights.confirm_sign_up.is_pending(CONFIRM_SIGN_UP_KEY)
    }
}

/// Reject the operation when the caller reports a busy status.
fn ensure_idle(operation: &'static str, current: Option<Status>) -> Result<(), FlowError> {
    match current {
        Some(status) if status.is_busy() => Err(FlowError::invalid_state(operation, status)),
        _ => Ok(()),
    }
}

/// Hand the caller's prior status back after a cancelled or failed step.
fn restore_status(status_cb: &StatusCallback, prior: Option<Status>) {
    if let Some(prior) = prior {
        status_cb(prior);
    }
}

fn lock_abort(
    slot: &Mutex<Option<CancellationToken>>,
) -> MutexGuard<'_, Option<CancellationToken>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

fn stop_refresh_chain(slot: &Mutex<Option<CancellationToken>>) {
    if let Some(abort) = lock_abort(slot).take() {
        abort.cancel();
    }
}
