use bon::Builder;

use super::{ConfirmOutcome, ConfirmSignUpRequest, FlowOrchestrator, SignUpRequest};
use crate::error::FlowError;
use crate::gateway::{ClientMetadata, SignUpResponse};
use crate::handle::{OperationHandle, Outcome};
use crate::status::{Status, StatusCallback};

/// Code and follow-on options for [`SignUpFlow::confirm_sign_up`].
#[derive(Debug, Clone, Builder)]
pub struct Confirmation {
    #[builder(into)]
    pub confirmation_code: String,
    #[builder(default = true)]
    pub request_magic_link: bool,
    #[builder(into)]
    pub redirect_uri: Option<String>,
}

/// A started sign-up plus a bound confirmation step.
///
/// Returned by [`FlowOrchestrator::complete_sign_up_flow`].
pub struct SignUpFlow {
    pub sign_up: OperationHandle<SignUpResponse>,
    orchestrator: FlowOrchestrator,
    username: String,
    client_metadata: Option<ClientMetadata>,
    current_status: Option<Status>,
    status_cb: StatusCallback,
}

impl std::fmt::Debug for SignUpFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignUpFlow")
            .field("sign_up", &self.sign_up)
            .field("username", &self.username)
            .field("current_status", &self.current_status)
            .finish_non_exhaustive()
    }
}

impl SignUpFlow {
    /// Start confirmation for the user this flow signed up.
    ///
    /// Callable at any time; it does not wait for the sign-up to settle.
    /// Callers should await [`Self::completed`] first: confirming a user the
    /// provider has not registered yet fails with the provider's error. The
    /// busy check uses the status the flow was started with.
    pub fn confirm_sign_up(
        &self,
        confirmation: Confirmation,
    ) -> Result<OperationHandle<ConfirmOutcome>, FlowError> {
        self.orchestrator.confirm_sign_up(ConfirmSignUpRequest {
            username: self.username.clone(),
            confirmation_code: confirmation.confirmation_code,
            client_metadata: self.client_metadata.clone(),
            request_magic_link: confirmation.request_magic_link,
            redirect_uri: confirmation.redirect_uri,
            current_status: self.current_status,
            status_cb: self.status_cb.clone(),
        })
    }

    pub async fn completed(&self) -> Result<Outcome<SignUpResponse>, FlowError> {
        self.sign_up.completed().await
    }

    /// Cancel the sign-up step.
    pub fn cancel(&self) {
        self.sign_up.cancel();
    }
}

impl FlowOrchestrator {
    /// Start a sign-up and return a handle that can also confirm it.
    pub fn complete_sign_up_flow(&self, request: SignUpRequest) -> Result<SignUpFlow, FlowError> {
        let username = request.username.clone();
        let client_metadata = request.client_metadata.clone();
        let current_status = request.current_status;
        let status_cb = request.status_cb.clone();
        let sign_up = self.sign_up(request)?;
        Ok(SignUpFlow {
            sign_up,
            orchestrator: self.clone(),
            username,
            client_metadata,
            current_status,
            status_cb,
        })
    }
}
