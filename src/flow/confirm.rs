use std::sync::Arc;

use bon::Builder;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ensure_idle, restore_status, FlowOrchestrator, CONFIRM_SIGN_UP_KEY};
use crate::error::FlowError;
use crate::gateway::{
    ClientMetadata, ConfirmSignUpInput, ConfirmSignUpResponse, IdentityGateway, SignInLinkRequest,
    SignInLinkRequester,
};
use crate::handle::{OperationHandle, Outcome};
use crate::status::{Status, StatusCallback};

/// Arguments for [`FlowOrchestrator::confirm_sign_up`].
#[derive(Clone, Builder)]
pub struct ConfirmSignUpRequest {
    #[builder(into)]
    pub username: String,
    #[builder(into)]
    pub confirmation_code: String,
    pub client_metadata: Option<ClientMetadata>,
    /// Request a sign-in link once the confirmation succeeds.
    #[builder(default = true)]
    pub request_magic_link: bool,
    #[builder(into)]
    pub redirect_uri: Option<String>,
    pub current_status: Option<Status>,
    pub status_cb: StatusCallback,
}

/// Result of a successful confirmation.
///
/// `magic_link_request` is present when a follow-on sign-in link was
/// requested; it is its own operation with its own completion.
#[derive(Debug, Clone)]
pub struct ConfirmOutcome {
    pub confirm_response: ConfirmSignUpResponse,
    pub magic_link_request: Option<OperationHandle<String>>,
}

impl FlowOrchestrator {
    /// Confirm a sign-up with the code the user received, optionally
    /// chaining into a sign-in link request.
    ///
    /// Status runs `CONFIRMING_SIGNUP` then `SIGNUP_CONFIRMED` or
    /// `SIGNUP_CONFIRMATION_FAILED`. The chained link request starts from
    /// `SIGNUP_CONFIRMED` and reports through the same status callback.
    ///
    /// A call made while another confirmation is in flight joins it; only
    /// the first caller's `status_cb` sees transitions. A link request that
    /// fails to start reports `SIGNUP_CONFIRMATION_FAILED` and rejects.
    pub fn confirm_sign_up(
        &self,
        request: ConfirmSignUpRequest,
    ) -> Result<OperationHandle<ConfirmOutcome>, FlowError> {
        ensure_idle("confirm sign-up", request.current_status)?;

        let gateway = Arc::clone(&self.gateway);
        let sign_in_link = Arc::clone(&self.sign_in_link);
        let status_cb = Arc::clone(&request.status_cb);
        let handle = self.flights.confirm_sign_up.run_exclusive(
            CONFIRM_SIGN_UP_KEY,
            || status_cb(Status::ConfirmingSignup),
            move |cancel| confirm_task(gateway, sign_in_link, request, cancel),
        );
        Ok(handle)
    }
}

async fn confirm_task(
    gateway: Arc<dyn IdentityGateway>,
    sign_in_link: Arc<dyn SignInLinkRequester>,
    request: ConfirmSignUpRequest,
    cancel: CancellationToken,
) -> Result<Outcome<ConfirmOutcome>, FlowError> {
    let ConfirmSignUpRequest {
        username,
        confirmation_code,
        client_metadata,
        request_magic_link,
        redirect_uri,
        current_status,
        status_cb,
    } = request;
    debug!(username = %username, "Confirming sign-up");

    let input = ConfirmSignUpInput {
        username: username.clone(),
        confirmation_code,
        client_metadata,
    };
    let result = gateway.confirm_sign_up(input, cancel.clone()).await;
    if cancel.is_cancelled() {
        debug!(username = %username, "Aborting sign-up confirmation");
        restore_status(&status_cb, current_status);
        return Ok(Outcome::Cancelled);
    }

    let confirm_response = match result {
        Ok(response) => response,
        Err(err) => {
            debug!(username = %username, error = %err, "Sign-up confirmation failed");
            status_cb(Status::SignupConfirmationFailed);
            return Err(err.into());
        }
    };
    debug!(username = %username, "Sign-up confirmation successful");
    status_cb(Status::SignupConfirmed);

    let magic_link_request = if request_magic_link {
        debug!(username = %username, "Requesting magic link");
        let link = sign_in_link.request_sign_in_link(SignInLinkRequest {
            username: username.clone(),
            redirect_uri,
            current_status: Some(Status::SignupConfirmed),
            status_cb: Arc::clone(&status_cb),
        });
        match link {
            Ok(handle) => Some(handle),
            Err(err) => {
                debug!(username = %username, error = %err, "Magic link request failed to start");
                status_cb(Status::SignupConfirmationFailed);
                return Err(err);
            }
        }
    } else {
        None
    };

    Ok(Outcome::Completed(ConfirmOutcome {
        confirm_response,
        magic_link_request,
    }))
}
