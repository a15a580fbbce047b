//! Remote identity-provider operations consumed by the flows.

pub mod cognito;
pub mod error;

pub use cognito::CognitoGateway;
pub use error::GatewayError;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::FlowError;
use crate::handle::OperationHandle;
use crate::status::{Status, StatusCallback};
use crate::token::TokensFromRefresh;

/// Free-form key/value pairs forwarded to provider triggers.
pub type ClientMetadata = HashMap<String, String>;

/// A named user attribute, e.g. `email`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserAttribute {
    pub name: String,
    pub value: String,
}

impl UserAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Fully assembled sign-up call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpInput {
    pub username: String,
    pub password: String,
    pub user_attributes: Vec<UserAttribute>,
    pub client_metadata: Option<ClientMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmSignUpInput {
    pub username: String,
    pub confirmation_code: String,
    pub client_metadata: Option<ClientMetadata>,
}

/// Where the provider sent the confirmation code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CodeDeliveryDetails {
    pub attribute_name: Option<String>,
    pub delivery_medium: Option<String>,
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignUpResponse {
    #[serde(default)]
    pub user_confirmed: bool,
    pub user_sub: Option<String>,
    pub code_delivery_details: Option<CodeDeliveryDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfirmSignUpResponse {
    pub session: Option<String>,
}

/// Network calls against the identity provider.
///
/// Implementations should abandon the request when `cancel` fires and
/// return [`GatewayError::cancelled`]. Callers decide what cancellation
/// means; the gateway only stops waiting.
#[async_trait]
pub trait IdentityGateway: Send + Sync {
    async fn sign_up(
        &self,
        input: SignUpInput,
        cancel: CancellationToken,
    ) -> Result<SignUpResponse, GatewayError>;

    async fn confirm_sign_up(
        &self,
        input: ConfirmSignUpInput,
        cancel: CancellationToken,
    ) -> Result<ConfirmSignUpResponse, GatewayError>;

    /// Revoke a refresh token. `None` means the call cannot be cancelled.
    async fn revoke_token(
        &self,
        refresh_token: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<(), GatewayError>;

    async fn refresh_tokens(
        &self,
        username: &str,
        refresh_token: &str,
        cancel: CancellationToken,
    ) -> Result<TokensFromRefresh, GatewayError>;
}

/// Arguments for a magic-link request chained after confirmation.
#[derive(Clone)]
pub struct SignInLinkRequest {
    pub username: String,
    pub redirect_uri: Option<String>,
    pub current_status: Option<Status>,
    pub status_cb: StatusCallback,
}

/// Capability to request a passwordless sign-in link.
///
/// Injected into the orchestrator so confirmation can chain into it. The
/// returned handle resolves with the username the link was sent for. An
/// `Err` means the request could not be started at all, for example because
/// the requester's own busy guard refused it.
pub trait SignInLinkRequester: Send + Sync {
    fn request_sign_in_link(
        &self,
        request: SignInLinkRequest,
    ) -> Result<OperationHandle<String>, FlowError>;
}
