//! Token persistence and the self-perpetuating refresh chain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::FlowError;
use crate::gateway::IdentityGateway;
use crate::storage::CredentialStore;
use crate::token::{CredentialBundle, TokensFromRefresh};

/// Receives the result of one refresh cycle. `None` means nothing new.
pub type TokensCallback =
    Arc<dyn Fn(Option<TokensFromRefresh>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Arranges the future renewal of the stored credentials.
#[async_trait]
pub trait RefreshScheduler: Send + Sync {
    /// Wait for the next refresh point, refresh, and hand the result to
    /// `tokens_cb`. Returns early without calling back when `abort` fires.
    async fn schedule_refresh(
        &self,
        abort: CancellationToken,
        tokens_cb: TokensCallback,
    ) -> Result<(), FlowError>;
}

/// Refreshes shortly before the stored bundle expires.
pub struct ExpiryRefreshScheduler {
    gateway: Arc<dyn IdentityGateway>,
    store: CredentialStore,
    margin: Duration,
}

impl ExpiryRefreshScheduler {
    pub fn new(gateway: Arc<dyn IdentityGateway>, store: CredentialStore, margin: Duration) -> Self {
        Self {
            gateway,
            store,
            margin,
        }
    }
}

#[async_trait]
impl RefreshScheduler for ExpiryRefreshScheduler {
    async fn schedule_refresh(
        &self,
        abort: CancellationToken,
        tokens_cb: TokensCallback,
    ) -> Result<(), FlowError> {
        let Some(bundle) = self.store.retrieve().await? else {
            debug!("No stored tokens, nothing to refresh");
            return Ok(());
        };
        let Some(refresh_token) = bundle.refresh_token.clone() else {
            debug!(username = %bundle.username, "No refresh token, refresh not scheduled");
            return Ok(());
        };

        let delay = refresh_delay(bundle.expire_at, self.margin, Utc::now());
        debug!(
            username = %bundle.username,
            delay_secs = delay.as_secs(),
            "Scheduling token refresh"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = abort.cancelled() => {
                debug!("Token refresh aborted while waiting");
                return Ok(());
            }
        }

        let refreshed = self
            .gateway
            .refresh_tokens(&bundle.username, &refresh_token, abort.clone())
            .await;
        if abort.is_cancelled() {
            debug!("Token refresh aborted");
            return Ok(());
        }
        tokens_cb(Some(refreshed?)).await;
        Ok(())
    }
}

/// Time to wait before refreshing a bundle that expires at `expire_at`.
///
/// Unknown expiry waits one margin; an expiry already inside the margin
/// refreshes immediately.
pub fn refresh_delay(
    expire_at: Option<DateTime<Utc>>,
    margin: Duration,
    now: DateTime<Utc>,
) -> Duration {
    let Some(expire_at) = expire_at else {
        return margin;
    };
    let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
    (expire_at - margin - now).to_std().unwrap_or(Duration::ZERO)
}

struct RefreshChain {
    store: CredentialStore,
    scheduler: Arc<dyn RefreshScheduler>,
    abort: CancellationToken,
}

/// Store `tokens`, then keep them fresh until `abort` fires.
///
/// Each refresh result is merged into the last complete bundle, stored,
/// and the next refresh is scheduled. Scheduling failures are logged and
/// never reach the caller.
pub async fn default_tokens_callback(
    store: CredentialStore,
    scheduler: Arc<dyn RefreshScheduler>,
    tokens: CredentialBundle,
    abort: CancellationToken,
) -> Result<(), FlowError> {
    let chain = Arc::new(RefreshChain {
        store,
        scheduler,
        abort,
    });
    store_and_schedule_refresh(chain, tokens).await
}

fn store_and_schedule_refresh(
    chain: Arc<RefreshChain>,
    tokens: CredentialBundle,
) -> BoxFuture<'static, Result<(), FlowError>> {
    async move {
        if !chain.store.store_unless_aborted(&tokens, &chain.abort).await? {
            debug!(username = %tokens.username, "Refresh chain aborted, dropping tokens");
            return Ok(());
        }
        if chain.abort.is_cancelled() {
            return Ok(());
        }

        let next = Arc::clone(&chain);
        let tokens_cb: TokensCallback = Arc::new(move |update: Option<TokensFromRefresh>| {
            let next = Arc::clone(&next);
            let last = tokens.clone();
            async move {
                let Some(update) = update else { return };
                if next.abort.is_cancelled() {
                    return;
                }
                if let Err(err) = store_and_schedule_refresh(next, last.merge(&update)).await {
                    debug!(error = %err, "Failed to store and refresh tokens");
                }
            }
            .boxed()
        });

        let scheduler = Arc::clone(&chain.scheduler);
        let abort = chain.abort.clone();
        tokio::spawn(async move {
            if let Err(err) = scheduler.schedule_refresh(abort, tokens_cb).await {
                debug!(error = %err, "Failed to store and refresh tokens");
            }
        });
        Ok(())
    }
    .boxed()
}
