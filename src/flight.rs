//! Single-flight guard: at most one in-flight operation per key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::FlowError;
use crate::handle::{OperationHandle, OperationId, Outcome};

type Slots<T> = Arc<Mutex<HashMap<String, Slot<T>>>>;

struct Slot<T> {
    generation: u64,
    handle: OperationHandle<T>,
}

/// Deduplicates concurrent invocations of the same keyed operation.
///
/// The first caller for a key starts the operation; later callers receive
/// a clone of the same [`OperationHandle`] until it settles. Cancelling
/// through any clone cancels the one shared task. Each orchestrator owns
/// its own guard, so independent instances never share slots.
pub struct SingleFlight<T> {
    slots: Slots<T>,
    next_generation: AtomicU64,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = lock(&self.slots).keys().cloned().collect();
        f.debug_struct("SingleFlight").field("pending", &keys).finish()
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `factory` unless an operation for `key` is already pending.
    ///
    /// A new operation calls `on_start` once the slot is registered and the
    /// slot table is unlocked, and the task does not begin until `on_start`
    /// has returned. `on_start` may therefore call back into this guard, and
    /// a nested call for the same key joins the new operation. Joining
    /// callers skip both `on_start` and `factory`. The slot is released
    /// exactly once, when the task settles, whatever the outcome.
    pub fn run_exclusive<S, F, Fut>(&self, key: &str, on_start: S, factory: F) -> OperationHandle<T>
    where
        S: FnOnce(),
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Outcome<T>, FlowError>> + Send + 'static,
    {
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let handle = {
            let mut slots = lock(&self.slots);
            if let Some(slot) = slots.get(key) {
                debug!(key, operation_id = %slot.handle.id(), "Joining in-flight operation");
                return slot.handle.clone();
            }

            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            let cancel = CancellationToken::new();
            let task_cancel = cancel.clone();
            let slots_ref = Arc::clone(&self.slots);
            let slot_key = key.to_string();
            let handle = OperationHandle::spawn(OperationId::new(), cancel, async move {
                // Built on first poll: a task dropped unpolled while the table is
                // locked above must not try to take the lock again.
                let _release = SlotRelease {
                    slots: slots_ref,
                    key: slot_key,
                    generation,
                };
                // A dropped sender (panicking `on_start`) also lets the task run.
                let _ = started_rx.await;
                factory(task_cancel).await
            });
            slots.insert(
                key.to_string(),
                Slot {
                    generation,
                    handle: handle.clone(),
                },
            );
            handle
        };

        on_start();
        let _ = started_tx.send(());
        handle
    }
}

impl<T> SingleFlight<T> {
    /// The pending operation for `key`, if any.
    pub fn pending(&self, key: &str) -> Option<OperationHandle<T>> {
        lock(&self.slots).get(key).map(|slot| slot.handle.clone())
    }

    pub fn is_pending(&self, key: &str) -> bool {
        lock(&self.slots).contains_key(key)
    }
}

fn lock<T>(slots: &Slots<T>) -> MutexGuard<'_, HashMap<String, Slot<T>>> {
    // The table holds no invariants a panic could break halfway.
    slots.lock().unwrap_or_else(|e| e.into_inner())
}

/// Clears a slot when the owning task finishes or is dropped.
struct SlotRelease<T> {
    slots: Slots<T>,
    key: String,
    generation: u64,
}

impl<T> Drop for SlotRelease<T> {
    fn drop(&mut self) {
        let mut slots = lock(&self.slots);
        if slots
            .get(&self.key)
            .is_some_and(|slot| slot.generation == self.generation)
        {
            slots.remove(&self.key);
            debug!(key = %self.key, "Released single-flight slot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayError;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let flight: SingleFlight<u32> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let calls = calls.clone();
                let gate = gate.clone();
                flight.run_exclusive("sign-up", || {}, move |_cancel| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    Ok(Outcome::Completed(7))
                })
            })
            .collect();

        assert!(flight.is_pending("sign-up"));
        tokio::task::yield_now().await;
        gate.notify_one();
        for handle in &handles {
            assert_eq!(handle.completed().await, Ok(Outcome::Completed(7)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|h| h.same_operation(&handles[0])));
    }

    #[tokio::test]
    async fn slot_is_released_after_failure() {
        let flight: SingleFlight<u32> = SingleFlight::new();
        let first = flight.run_exclusive("confirm-sign-up", || {}, |_| async {
            Err(FlowError::from(GatewayError::provider("CodeMismatchException", "bad")))
        });
        assert!(first.completed().await.is_err());
        tokio::task::yield_now().await;
        assert!(!flight.is_pending("confirm-sign-up"));

        let second = flight.run_exclusive("confirm-sign-up", || {}, |_| async { Ok(Outcome::Completed(1)) });
        assert!(!second.same_operation(&first));
        assert_eq!(second.completed().await, Ok(Outcome::Completed(1)));
    }

    #[tokio::test]
    async fn cancellation_reaches_every_waiter() {
        let flight: SingleFlight<u32> = SingleFlight::new();
        let make = |cancel: CancellationToken| async move {
            cancel.cancelled().await;
            Ok(Outcome::Cancelled)
        };
        let first = flight.run_exclusive("sign-up", || {}, make);
        let second = flight.run_exclusive("sign-up", || {}, make);
        second.cancel();
        assert_eq!(first.completed().await, Ok(Outcome::Cancelled));
        assert_eq!(second.completed().await, Ok(Outcome::Cancelled));
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let flight: SingleFlight<u32> = SingleFlight::new();
        let a = flight.run_exclusive("a", || {}, |_| async { Ok(Outcome::Completed(1)) });
        let b = flight.run_exclusive("b", || {}, |_| async { Ok(Outcome::Completed(2)) });
        assert!(!a.same_operation(&b));
        assert_eq!(b.completed().await, Ok(Outcome::Completed(2)));
        assert_eq!(a.completed().await, Ok(Outcome::Completed(1)));
    }

    #[tokio::test]
    async fn dropped_handles_still_release_the_slot() {
        let flight: SingleFlight<u32> = SingleFlight::new();
        let handle = flight.run_exclusive("sign-up", || {}, |_| async { Ok(Outcome::Completed(1)) });
        drop(handle);
        for _ in 0..10 {
            if !flight.is_pending("sign-up") {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!flight.is_pending("sign-up"));
    }

    #[tokio::test]
    async fn on_start_runs_unlocked_and_before_the_task() {
        let flight: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let nested = Arc::new(std::sync::Mutex::new(None));
        let nested_starts = Arc::new(AtomicUsize::new(0));
        let handle = {
            let nested_starts = Arc::clone(&nested_starts);
            let flight_ref = Arc::clone(&flight);
            let order_start = Arc::clone(&order);
            let order_task = Arc::clone(&order);
            let nested = Arc::clone(&nested);
            flight.run_exclusive(
                "sign-up",
                move || {
                    order_start.lock().unwrap().push("start");
                    assert!(flight_ref.is_pending("sign-up"));
                    let joined = flight_ref.run_exclusive(
                        "sign-up",
                        move || {
                            nested_starts.fetch_add(1, Ordering::SeqCst);
                        },
                        |_| async { Ok(Outcome::Completed(0)) },
                    );
                    *nested.lock().unwrap() = Some(joined);
                },
                move |_| async move {
                    order_task.lock().unwrap().push("task");
                    Ok(Outcome::Completed(3))
                },
            )
        };

        let joined = nested.lock().unwrap().take().unwrap();
        assert!(joined.same_operation(&handle));
        assert_eq!(nested_starts.load(Ordering::SeqCst), 0);
        assert_eq!(handle.completed().await, Ok(Outcome::Completed(3)));
        assert_eq!(*order.lock().unwrap(), vec!["start", "task"]);
    }

    #[tokio::test]
    async fn joining_callers_skip_on_start() {
        let flight: SingleFlight<u32> = SingleFlight::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let starts = starts.clone();
                let gate = gate.clone();
                flight.run_exclusive(
                    "confirm-sign-up",
                    move || {
                        starts.fetch_add(1, Ordering::SeqCst);
                    },
                    move |_| async move {
                        gate.notified().await;
                        Ok(Outcome::Completed(1))
                    },
                )
            })
            .collect();

        tokio::task::yield_now().await;
        gate.notify_one();
        assert_eq!(handles[2].completed().await, Ok(Outcome::Completed(1)));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }
}
