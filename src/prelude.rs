//! Convenience re-exports for common use.

pub use crate::config::FlowConfig;
pub use crate::error::{FlowError, Result};
pub use crate::flow::{
    Confirmation, ConfirmOutcome, ConfirmSignUpRequest, FlowOrchestrator, SignOutRequest,
    SignUpFlow, SignUpRequest,
};
pub use crate::gateway::{CognitoGateway, IdentityGateway, SignInLinkRequester, UserAttribute};
pub use crate::handle::{OperationHandle, Outcome};
pub use crate::status::{Status, StatusCallback};
pub use crate::storage::{FileStorage, KeyValueStorage, MemoryStorage};
pub use crate::token::CredentialBundle;
