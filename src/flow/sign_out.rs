use std::sync::{Arc, Mutex};

use bon::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{restore_status, stop_refresh_chain, FlowOrchestrator};
use crate::error::FlowError;
use crate::gateway::IdentityGateway;
use crate::handle::{OperationHandle, OperationId, Outcome};
use crate::status::{Status, StatusCallback};
use crate::storage::CredentialStore;

/// Fired once the session's keys are gone from local storage.
pub type LocalRemovalCallback = Arc<dyn Fn() + Send + Sync>;

/// Arguments for [`FlowOrchestrator::sign_out`].
#[derive(Clone, Builder)]
pub struct SignOutRequest {
    /// Restored on cancellation or local failure. Never blocks sign-out.
    pub current_status: Option<Status>,
    pub tokens_removed_locally_cb: Option<LocalRemovalCallback>,
    pub status_cb: StatusCallback,
}

impl SignOutRequest {
    fn tokens_removed_locally(&self) {
        if let Some(cb) = &self.tokens_removed_locally_cb {
            cb();
        }
    }
}

impl FlowOrchestrator {
    /// Remove the local session and revoke its refresh token.
    ///
    /// Not guarded by the busy status; a busy `current_status` is only
    /// logged. Cancellation is honoured up to the local removal. The refresh
    /// chain is stopped before any key is removed, and a refreshed bundle
    /// already being written lands before the removal starts. Once the
    /// keys are removed the revocation always runs, and its failure
    /// rejects the handle even though the session is already gone locally.
    pub fn sign_out(&self, request: SignOutRequest) -> OperationHandle<()> {
        if let Some(status) = request.current_status.filter(|s| s.is_busy()) {
            warn!(status = %status, "Signing out while busy");
        }
        (request.status_cb)(Status::SigningOut);

        let id = OperationId::new();
        let cancel = CancellationToken::new();
        let task = sign_out_task(
            id,
            Arc::clone(&self.gateway),
            self.credentials.clone(),
            Arc::clone(&self.refresh_abort),
            request,
            cancel.clone(),
        );
        OperationHandle::spawn(id, cancel, task)
    }
}

async fn sign_out_task(
    id: OperationId,
    gateway: Arc<dyn IdentityGateway>,
    credentials: CredentialStore,
    refresh_abort: Arc<Mutex<Option<CancellationToken>>>,
    request: SignOutRequest,
    cancel: CancellationToken,
) -> Result<Outcome<()>, FlowError> {
    let prior = request.current_status;
    let status_cb = &request.status_cb;

    let retrieved = credentials.retrieve().await;
    if cancel.is_cancelled() {
        debug!(operation = %id, "Aborting sign-out");
        restore_status(status_cb, prior);
        return Ok(Outcome::Cancelled);
    }
    let tokens = match retrieved {
        Ok(tokens) => tokens,
        Err(err) => {
            debug!(operation = %id, error = %err, "Failed to read stored tokens");
            restore_status(status_cb, prior);
            return Err(err);
        }
    };

    // Stop the chain first so no refreshed bundle lands after removal.
    stop_refresh_chain(&refresh_abort);

    let Some(tokens) = tokens else {
        debug!(operation = %id, "No stored tokens, already signed out");
        request.tokens_removed_locally();
        status_cb(Status::SignedOut);
        return Ok(Outcome::Completed(()));
    };

    debug!(operation = %id, username = %tokens.username, "Removing tokens from storage");
    if let Err(err) = credentials.remove_session(&tokens.username).await {
        restore_status(status_cb, prior);
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }
        debug!(operation = %id, error = %err, "Failed to remove tokens");
        return Err(err);
    }
    request.tokens_removed_locally();

    if let Some(refresh_token) = &tokens.refresh_token {
        debug!(operation = %id, username = %tokens.username, "Revoking refresh token");
        if let Err(err) = gateway.revoke_token(refresh_token, None).await {
            debug!(operation = %id, error = %err, "Failed to revoke refresh token");
            restore_status(status_cb, prior);
            return Err(err.into());
        }
    }

    debug!(operation = %id, username = %tokens.username, "Signed out");
    status_cb(Status::SignedOut);
    Ok(Outcome::Completed(()))
}
