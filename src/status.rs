//! Busy/idle status model shared by every flow.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Status of a logical authentication session.
///
/// Statuses fall into two disjoint groups: busy statuses mean a guarded
/// operation is in progress, idle statuses are resting points. Use
/// [`Status::is_busy`] to classify.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    // busy
    SigningUp,
    ConfirmingSignup,
    RequestingSigninLink,
    SigningInWithLink,
    RefreshingTokens,
    SigningOut,

    // idle
    SignedOut,
    SignedIn,
    SignupCompleted,
    SignupFailed,
    SignupConfirmed,
    SignupConfirmationFailed,
    SigninLinkRequested,
    SigninLinkRequestFailed,
    SigninWithLinkFailed,
}

/// Every busy status, in declaration order.
pub const BUSY_STATUSES: &[Status] = &[
    Status::SigningUp,
    Status::ConfirmingSignup,
    Status::RequestingSigninLink,
    Status::SigningInWithLink,
    Status::RefreshingTokens,
    Status::SigningOut,
];

/// Every idle status, in declaration order.
pub const IDLE_STATUSES: &[Status] = &[
    Status::SignedOut,
    Status::SignedIn,
    Status::SignupCompleted,
    Status::SignupFailed,
    Status::SignupConfirmed,
    Status::SignupConfirmationFailed,
    Status::SigninLinkRequested,
    Status::SigninLinkRequestFailed,
    Status::SigninWithLinkFailed,
];

impl Status {
    /// Whether this status blocks new guarded operations.
    pub fn is_busy(self) -> bool {
        match self {
            Self::SigningUp
            | Self::ConfirmingSignup
            | Self::RequestingSigninLink
            | Self::SigningInWithLink
            | Self::RefreshingTokens
            | Self::SigningOut => true,
            Self::SignedOut
            | Self::SignedIn
            | Self::SignupCompleted
            | Self::SignupFailed
            | Self::SignupConfirmed
            | Self::SignupConfirmationFailed
            | Self::SigninLinkRequested
            | Self::SigninLinkRequestFailed
            | Self::SigninWithLinkFailed => false,
        }
    }

    pub fn is_idle(self) -> bool {
        !self.is_busy()
    }
}

/// Observer invoked synchronously on every status transition.
///
/// Callbacks are notifications and must return promptly. They may read
/// orchestrator state or start another flow from inside the call.
pub type StatusCallback = Arc<dyn Fn(Status) + Send + Sync>;

/// Free-function form of [`Status::is_busy`]; an absent status is idle.
pub fn is_busy(status: Option<Status>) -> bool {
    status.is_some_and(Status::is_busy)
}
