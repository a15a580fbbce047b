use std::sync::Arc;

use bon::Builder;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ensure_idle, restore_status, FlowOrchestrator, SIGN_UP_KEY};
use crate::error::FlowError;
use crate::gateway::{ClientMetadata, IdentityGateway, SignUpInput, SignUpResponse, UserAttribute};
use crate::handle::{OperationHandle, Outcome};
use crate::status::{Status, StatusCallback};

const EMAIL_ATTRIBUTE: &str = "email";

/// Arguments for [`FlowOrchestrator::sign_up`].
#[derive(Clone, Builder)]
pub struct SignUpRequest {
    #[builder(into)]
    pub username: String,
    #[builder(into)]
    pub email: String,
    /// Falls back to the configured sentinel password when absent.
    #[builder(into)]
    pub password: Option<String>,
    /// Extra attributes. Any `email` entry here is replaced by [`Self::email`].
    #[builder(default)]
    pub user_attributes: Vec<UserAttribute>,
    pub client_metadata: Option<ClientMetadata>,
    pub current_status: Option<Status>,
    pub status_cb: StatusCallback,
}

impl SignUpRequest {
    /// Attributes sent to the provider: the explicit email first, then the
    /// caller's attributes minus any other `email` entries.
    pub fn assembled_attributes(&self) -> Vec<UserAttribute> {
        std::iter::once(UserAttribute::new(EMAIL_ATTRIBUTE, self.email.clone()))
            .chain(
                self.user_attributes
                    .iter()
                    .filter(|attr| attr.name != EMAIL_ATTRIBUTE)
                    .cloned(),
            )
            .collect()
    }
}

impl FlowOrchestrator {
    /// Register a new user.
    ///
    /// Fails synchronously with [`FlowError::InvalidState`] when
    /// `current_status` is busy. Otherwise emits `SIGNING_UP` and returns a
    /// handle whose completion resolves with the provider's response,
    /// [`Outcome::Cancelled`], or the provider's error. A call made while
    /// another sign-up is in flight joins it: it gets a handle to the running
    /// operation, and only the first caller's `status_cb` sees transitions.
    /// `status_cb` may read or re-enter the orchestrator.
    pub fn sign_up(
        &self,
        request: SignUpRequest,
    ) -> Result<OperationHandle<SignUpResponse>, FlowError> {
        ensure_idle("sign up", request.current_status)?;

        let input = SignUpInput {
            username: request.username.clone(),
            password: request
                .password
                .clone()
                .unwrap_or_else(|| self.config.sentinel_password.clone()),
            user_attributes: request.assembled_attributes(),
            client_metadata: request.client_metadata.clone(),
        };
        let gateway = Arc::clone(&self.gateway);
        let status_cb = Arc::clone(&request.status_cb);
        let handle = self.flights.sign_up.run_exclusive(
            SIGN_UP_KEY,
            || status_cb(Status::SigningUp),
            move |cancel| {
                sign_up_task(
                    gateway,
                    input,
                    request.current_status,
                    request.status_cb,
                    cancel,
                )
            },
        );
        Ok(handle)
    }
}

async fn sign_up_task(
    gateway: Arc<dyn IdentityGateway>,
    input: SignUpInput,
    prior: Option<Status>,
    status_cb: StatusCallback,
    cancel: CancellationToken,
) -> Result<Outcome<SignUpResponse>, FlowError> {
    let username = input.username.clone();
    debug!(username = %username, "Starting sign-up");

    let result = gateway.sign_up(input, cancel.clone()).await;
    if cancel.is_cancelled() {
        debug!(username = %username, "Aborting sign-up");
        restore_status(&status_cb, prior);
        return Ok(Outcome::Cancelled);
    }

    match result {
        Ok(response) => {
            debug!(username = %username, "Sign-up successful");
            status_cb(Status::SignupCompleted);
            Ok(Outcome::Completed(response))
        }
        Err(err) => {
            debug!(username = %username, error = %err, "Sign-up failed");
            status_cb(Status::SignupFailed);
            Err(err.into())
        }
    }
}
