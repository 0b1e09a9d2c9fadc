use crate::errors::{ErrorKind, TempDbError, TempDbResult};
use parking_lot::{Condvar, Mutex};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

enum ResultState<T> {
    Pending,
    Succeeded(T),
    Failed(TempDbError),
}

/// Outcome of a long-running operation, written once and read by many.
///
/// An `AsyncResult` starts pending and moves to succeeded or failed exactly
/// once. A second completion is rejected with
/// [`ErrorKind::ResultAlreadyCompleted`]. Readers may poll with
/// [`try_get`](Self::try_get) or block with [`wait`](Self::wait) /
/// [`wait_timeout`](Self::wait_timeout); once completed, every reader observes
/// the same stored outcome.
///
/// Clones share the same underlying state.
///
/// # Examples
///
/// ```rust,ignore
/// let result = AsyncResult::<usize>::new();
/// let writer = result.clone();
/// std::thread::spawn(move || writer.complete(3));
/// assert_eq!(result.wait()?, 3);
/// ```
pub struct AsyncResult<T> {
    inner: Arc<AsyncResultInner<T>>,
}

struct AsyncResultInner<T> {
    state: Mutex<ResultState<T>>,
    ready: Condvar,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        AsyncResult {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Default for AsyncResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> AsyncResult<T> {
    /// Creates a pending result.
    pub fn new() -> Self {
        AsyncResult {
            inner: Arc::new(AsyncResultInner {
                state: Mutex::new(ResultState::Pending),
                ready: Condvar::new(),
            }),
        }
    }

    /// Creates a result that already succeeded with `value`.
    pub fn completed(value: T) -> Self {
        let result = Self::new();
        *result.inner.state.lock() = ResultState::Succeeded(value);
        result
    }

    /// Completes the result successfully.
    ///
    /// Fails with [`ErrorKind::ResultAlreadyCompleted`] if the result was
    /// already completed, successfully or not.
    pub fn complete(&self, value: T) -> TempDbResult<()> {
        self.transition(ResultState::Succeeded(value))
    }

    /// Completes the result with a failure.
    ///
    /// Fails with [`ErrorKind::ResultAlreadyCompleted`] if the result was
    /// already completed, successfully or not.
    pub fn complete_exceptionally(&self, error: TempDbError) -> TempDbResult<()> {
        self.transition(ResultState::Failed(error))
    }

    /// Stores `outcome` if the result is still pending.
    ///
    /// Returns `false` when an earlier outcome was kept.
    pub(crate) fn offer(&self, outcome: TempDbResult<T>) -> bool {
        let mut state = self.inner.state.lock();
        if !matches!(*state, ResultState::Pending) {
            return false;
        }
        *state = match outcome {
            Ok(value) => ResultState::Succeeded(value),
            Err(error) => ResultState::Failed(error),
        };
        self.inner.ready.notify_all();
        true
    }

    pub fn is_done(&self) -> bool {
        !matches!(*self.inner.state.lock(), ResultState::Pending)
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(*self.inner.state.lock(), ResultState::Succeeded(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.inner.state.lock(), ResultState::Failed(_))
    }

    /// Returns the outcome without blocking, `None` while pending.
    pub fn try_get(&self) -> Option<TempDbResult<T>> {
        let state = self.inner.state.lock();
        Self::outcome(&state)
    }

    /// Blocks until the result is completed and returns the outcome.
    pub fn wait(&self) -> TempDbResult<T> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(outcome) = Self::outcome(&state) {
                return outcome;
            }
            self.inner.ready.wait(&mut state);
        }
    }

    /// Blocks for at most `timeout`; `None` if the result is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TempDbResult<T>> {
        let mut state = self.inner.state.lock();
        if let Some(outcome) = Self::outcome(&state) {
            return Some(outcome);
        }
        // spurious wakeups are fine, the state is checked again below
        let _ = self.inner.ready.wait_for(&mut state, timeout);
        Self::outcome(&state)
    }

    fn transition(&self, next: ResultState<T>) -> TempDbResult<()> {
        let mut state = self.inner.state.lock();
        if !matches!(*state, ResultState::Pending) {
            log::error!("Attempt to complete an async result that is already completed");
            return Err(TempDbError::new(
                "Result has already been completed",
                ErrorKind::ResultAlreadyCompleted,
            ));
        }
        *state = next;
        self.inner.ready.notify_all();
        Ok(())
    }

    fn outcome(state: &ResultState<T>) -> Option<TempDbResult<T>> {
        match state {
            ResultState::Pending => None,
            ResultState::Succeeded(value) => Some(Ok(value.clone())),
            ResultState::Failed(error) => Some(Err(error.clone())),
        }
    }
}

impl<T> Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = match *self.inner.state.lock() {
            ResultState::Pending => "pending",
            ResultState::Succeeded(_) => "succeeded",
            ResultState::Failed(_) => "failed",
        };
        f.debug_struct("AsyncResult").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use test_retry::retry;

    #[test]
    fn new_result_is_pending() {
        let result = AsyncResult::<usize>::new();
        assert!(!result.is_done());
        assert!(result.try_get().is_none());
    }

    #[test]
    fn complete_then_read() {
        let result = AsyncResult::new();
        result.complete(7usize).unwrap();
        assert!(result.is_done());
        assert!(result.is_succeeded());
        assert_eq!(result.try_get().unwrap().unwrap(), 7);
        assert_eq!(result.wait().unwrap(), 7);
    }

    #[test]
    fn second_complete_is_rejected() {
        let result = AsyncResult::new();
        result.complete(1usize).unwrap();

        let err = result.complete(2).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ResultAlreadyCompleted);

        let err = result
            .complete_exceptionally(TempDbError::new("late", ErrorKind::InternalError))
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ResultAlreadyCompleted);

        // first outcome is kept
        assert_eq!(result.wait().unwrap(), 1);
    }

    #[test]
    fn complete_exceptionally_then_complete_is_rejected() {
        let result = AsyncResult::<usize>::new();
        result
            .complete_exceptionally(TempDbError::new("boom", ErrorKind::MigrationFailure))
            .unwrap();
        assert!(result.is_failed());
        assert!(result.complete(3).is_err());

        let err = result.wait().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::MigrationFailure);
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn offer_keeps_first_outcome() {
        let result = AsyncResult::new();
        assert!(result.offer(Ok(4usize)));
        assert!(!result.offer(Ok(5)));
        assert!(!result.offer(Err(TempDbError::new("x", ErrorKind::InternalError))));
        assert_eq!(result.wait().unwrap(), 4);
    }

    #[test]
    fn completed_constructor() {
        let result = AsyncResult::completed("done".to_string());
        assert_eq!(result.wait().unwrap(), "done");
        assert!(result.complete("again".to_string()).is_err());
    }

    #[test]
    fn wait_timeout_on_pending_returns_none() {
        let result = AsyncResult::<usize>::new();
        assert!(result.wait_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    #[retry]
    fn wait_blocks_until_completed_from_other_thread() {
        let result = AsyncResult::<usize>::new();
        let writer = result.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            writer.complete(42).unwrap();
        });

        assert_eq!(result.wait().unwrap(), 42);
        handle.join().unwrap();
    }

    #[test]
    fn concurrent_writers_only_one_wins_and_readers_agree() {
        let result = AsyncResult::<usize>::new();
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let result = result.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    result.complete(i).is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);

        let first = result.wait().unwrap();
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let result = result.clone();
                thread::spawn(move || result.wait().unwrap())
            })
            .collect();
        for reader in readers {
            assert_eq!(reader.join().unwrap(), first);
        }
    }

    #[test]
    fn debug_shows_state() {
        let result = AsyncResult::<usize>::new();
        assert!(format!("{:?}", result).contains("pending"));
        result.complete(1).unwrap();
        assert!(format!("{:?}", result).contains("succeeded"));
    }
}
