//! Operation handles: a shared completion plus a cancellation trigger.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::FlowError;

/// Unique identifier for a started operation; recorded on tracing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Terminal value of an operation that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Completed(T),
    /// Cancelled before its result was applied. Not an error.
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Cancelled => None,
        }
    }

    pub fn into_completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Cancelled => None,
        }
    }
}

type Completion<T> = Shared<BoxFuture<'static, Result<Outcome<T>, FlowError>>>;

/// Handle to an operation running on the tokio runtime.
///
/// Clones share one completion and one cancellation trigger: every clone
/// observes the same settled result, and cancelling through any clone
/// cancels the single underlying task.
///
/// # Example
/// ```
/// use passflow::handle::{OperationHandle, OperationId, Outcome};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let handle = OperationHandle::spawn(OperationId::new(), CancellationToken::new(), async {
///     Ok(Outcome::Completed(42))
/// });
/// assert_eq!(handle.completed().await, Ok(Outcome::Completed(42)));
/// # }
/// ```
pub struct OperationHandle<T> {
    id: OperationId,
    completion: Completion<T>,
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
}

/// Marks the task settled when it returns, panics, or is dropped by the runtime.
struct FinishedGuard(Arc<AtomicBool>);

impl Drop for FinishedGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

impl<T> Clone for OperationHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            completion: self.completion.clone(),
            cancel: self.cancel.clone(),
            finished: Arc::clone(&self.finished),
        }
    }
}

impl<T> fmt::Debug for OperationHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<T> OperationHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawn `task` and wrap it in a handle.
    ///
    /// The task runs to completion even if every handle is dropped. Must be
    /// called from within a tokio runtime.
    pub fn spawn<F>(id: OperationId, cancel: CancellationToken, task: F) -> Self
    where
        F: Future<Output = Result<Outcome<T>, FlowError>> + Send + 'static,
    {
        let finished = Arc::new(AtomicBool::new(false));
        let guard = FinishedGuard(Arc::clone(&finished));
        let join = tokio::spawn(async move {
            let result = task.await;
            drop(guard);
            result
        });
        let completion = async move {
            match join.await {
                Ok(result) => result,
                Err(err) => Err(FlowError::from(err)),
            }
        }
        .boxed()
        .shared();
        Self {
            id,
            completion,
            cancel,
            finished,
        }
    }

    /// Wait for the operation to settle. Safe to call from any clone, any
    /// number of times.
    pub async fn completed(&self) -> Result<Outcome<T>, FlowError> {
        self.completion.clone().await
    }

    /// The settled result, if the operation has finished and been polled.
    pub fn peek(&self) -> Option<Result<Outcome<T>, FlowError>> {
        self.completion.peek().cloned()
    }
}

impl<T> OperationHandle<T> {
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the underlying task has settled, whether or not anyone
    /// awaited it.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether two handles refer to the same underlying operation.
    pub fn same_operation(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
