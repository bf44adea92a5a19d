//! Single-flight initialization gate.
//!
//! `InitGate` guards shared state that must be created exactly once (a
//! database connection, a cached key) even when many callers race to use it
//! first. The state machine is:
//!
//! ```text
//! Uninitialized --first caller--> Initializing(shared future) --ok--> Ready(value)
//!        ^                                 |
//!        +-------------- err --------------+
//! ```
//!
//! Every caller that arrives while the gate is `Initializing` awaits the same
//! shared future and receives the same result, success or error. A failed
//! attempt leaves the gate `Uninitialized` so a later call can retry.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};

type PendingInit<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

enum GateState<T, E> {
    Uninitialized,
    Initializing(PendingInit<T, E>),
    Ready(T),
}

/// Runs an initialization routine at most once at a time and memoizes its
/// successful result.
pub struct InitGate<T, E> {
    state: Mutex<GateState<T, E>>,
    attempts: AtomicUsize,
}

impl<T, E> InitGate<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a gate in the `Uninitialized` state.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Uninitialized),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Return the ready value, running `init` if nobody has yet.
    ///
    /// `init` is only invoked by the caller that moves the gate out of
    /// `Uninitialized`; it must return a lazy future (no work before the
    /// first poll) because it is called while the state lock is held.
    pub async fn ensure_ready<F, Fut>(&self, init: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let pending = {
            let mut state = self.lock();
            let in_flight = match &*state {
                GateState::Ready(value) => return Ok(value.clone()),
                GateState::Initializing(pending) => Some(pending.clone()),
                GateState::Uninitialized => None,
            };
            match in_flight {
                Some(pending) => pending,
                None => {
                    self.attempts.fetch_add(1, Ordering::SeqCst);
                    let pending = init().boxed().shared();
                    *state = GateState::Initializing(pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;

        // Only the attempt we awaited may settle the state; a reset or a newer
        // attempt may have replaced it in the meantime.
        let mut state = self.lock();
        let settles = matches!(&*state, GateState::Initializing(current) if current.ptr_eq(&pending));
        if settles {
            *state = match &result {
                Ok(value) => GateState::Ready(value.clone()),
                Err(_) => GateState::Uninitialized,
            };
        }

        result
    }

    /// The ready value, if initialization has completed.
    pub fn get(&self) -> Option<T> {
        match &*self.lock() {
            GateState::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Whether the gate currently holds a ready value.
    pub fn is_ready(&self) -> bool {
        matches!(&*self.lock(), GateState::Ready(_))
    }

    /// Return to `Uninitialized`, handing back the ready value if there was one.
    ///
    /// Callers already awaiting an in-flight attempt still receive its result,
    /// but that result is no longer memoized.
    pub fn reset(&self) -> Option<T> {
        let previous = std::mem::replace(&mut *self.lock(), GateState::Uninitialized);
        match previous {
            GateState::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Like [`InitGate::reset`], but an in-flight attempt is awaited and its
    /// value handed back too, so the caller can release whatever it opened.
    pub async fn drain(&self) -> Option<T> {
        let previous = std::mem::replace(&mut *self.lock(), GateState::Uninitialized);
        match previous {
            GateState::Ready(value) => Some(value),
            GateState::Initializing(pending) => pending.await.ok(),
            GateState::Uninitialized => None,
        }
    }

    /// Number of initialization routines started so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, GateState<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T, E> Default for InitGate<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_initialization() {
        let gate: Arc<InitGate<u32, String>> = Arc::new(InitGate::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let gate = Arc::clone(&gate);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                gate.ensure_ready(|| async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(42)
                })
                .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(gate.attempts(), 1);
        assert!(gate.is_ready());
    }

    #[tokio::test]
    async fn test_ready_gate_does_not_rerun_init() {
        let gate: InitGate<String, String> = InitGate::new();
        gate.ensure_ready(|| async { Ok("first".to_string()) })
            .await
            .unwrap();

        let value = gate
            .ensure_ready(|| async { Ok("second".to_string()) })
            .await
            .unwrap();

        assert_eq!(value, "first");
        assert_eq!(gate.attempts(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_reaches_every_waiter_then_allows_retry() {
        let gate: Arc<InitGate<u32, String>> = Arc::new(InitGate::new());
        let release = Arc::new(Semaphore::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let release = Arc::clone(&release);
            handles.push(tokio::spawn(async move {
                gate.ensure_ready(|| async move {
                    let _permit = release.acquire().await;
                    Err("disk full".to_string())
                })
                .await
            }));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        release.add_permits(1);

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err("disk full".to_string()));
        }
        assert_eq!(gate.attempts(), 1);
        assert!(!gate.is_ready());

        let value = gate.ensure_ready(|| async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(gate.attempts(), 2);
    }

    #[tokio::test]
    async fn test_reset_returns_value_and_reinitializes() {
        let gate: InitGate<u32, String> = InitGate::new();
        assert_eq!(gate.get(), None);

        gate.ensure_ready(|| async { Ok(1) }).await.unwrap();
        assert_eq!(gate.get(), Some(1));

        assert_eq!(gate.reset(), Some(1));
        assert_eq!(gate.get(), None);

        let value = gate.ensure_ready(|| async { Ok(2) }).await.unwrap();
        assert_eq!(value, 2);
        assert_eq!(gate.attempts(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_drain_hands_back_in_flight_value() {
        let gate: Arc<InitGate<u32, String>> = Arc::new(InitGate::new());
        let release = Arc::new(Semaphore::new(0));

        let waiter = {
            let gate = Arc::clone(&gate);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                gate.ensure_ready(|| async move {
                    let _permit = release.acquire().await;
                    Ok(9)
                })
                .await
            })
        };
        while gate.attempts() == 0 {
            tokio::task::yield_now().await;
        }

        let drained = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.drain().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        release.add_permits(1);

        assert_eq!(drained.await.unwrap(), Some(9));
        assert_eq!(waiter.await.unwrap(), Ok(9));
        // The drained attempt is not memoized.
        assert!(!gate.is_ready());
    }

    #[tokio::test]
    async fn test_drain_ready_and_uninitialized() {
        let gate: InitGate<u32, String> = InitGate::new();
        assert_eq!(gate.drain().await, None);

        gate.ensure_ready(|| async { Ok(3) }).await.unwrap();
        assert_eq!(gate.drain().await, Some(3));
        assert!(!gate.is_ready());
    }

    #[tokio::test]
    async fn test_reset_on_uninitialized_gate_is_noop() {
        let gate: InitGate<u32, String> = InitGate::new();
        assert_eq!(gate.reset(), None);
        assert_eq!(gate.attempts(), 0);
    }
}
