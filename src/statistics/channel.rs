//! Asynchronous mutation submission.
//!
//! Request workers push mutations into an unbounded queue and return at once.
//! A dedicated thread drains the queue and calls the store, so disk latency
//! never shows up in response time. A failed persist is reported through the
//! submission's error callback and the worker moves on to the next mutation.

use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;

use crate::observability::metrics;
use crate::statistics::mutation::Mutation;
use crate::statistics::store::{StatisticsError, StatisticsStore};

/// Called at most once, on the worker thread, when persisting fails.
pub type ErrorCallback = Box<dyn FnOnce(StatisticsError) + Send + 'static>;

struct Submission {
    mutation: Mutation,
    on_error: ErrorCallback,
}

/// Sending half of the statistics queue. Cheap to clone.
#[derive(Clone)]
pub struct StatisticsChannel {
    tx: mpsc::UnboundedSender<Submission>,
}

impl std::fmt::Debug for StatisticsChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsChannel")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl StatisticsChannel {
    /// Start the worker thread that feeds `store`.
    ///
    /// The thread exits once every clone of the returned channel is dropped.
    pub fn start(store: Arc<dyn StatisticsStore>) -> Result<Self, StatisticsError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Submission>();

        thread::Builder::new()
            .name("statistics".into())
            .spawn(move || {
                while let Some(submission) = rx.blocking_recv() {
                    if let Err(e) = store.persist(&submission.mutation) {
                        metrics::record_statistics_failure();
                        (submission.on_error)(e);
                    }
                }
                tracing::debug!("Statistics worker stopped");
            })?;

        Ok(Self { tx })
    }

    /// Queue `mutation` for persistence without waiting for it.
    ///
    /// If the worker is gone `on_error` runs immediately on the caller's thread
    /// with [`StatisticsError::ChannelClosed`].
    pub fn submit<F>(&self, mutation: Mutation, on_error: F)
    where
        F: FnOnce(StatisticsError) + Send + 'static,
    {
        let submission = Submission {
            mutation,
            on_error: Box::new(on_error),
        };
        if let Err(mpsc::error::SendError(submission)) = self.tx.send(submission) {
            (submission.on_error)(StatisticsError::ChannelClosed);
        }
    }

    /// Submit with a callback that only logs the failure.
    pub fn submit_logged(&self, mutation: Mutation) {
        let domain = mutation.domain.clone();
        self.submit(mutation, move |e| {
            tracing::warn!(domain = %domain, error = %e, "Failed to persist mutation");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::mutation::MutationKind;
    use crate::testing::RecordingStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct SlowStore {
        delay: Duration,
        inner: RecordingStore,
    }

    impl StatisticsStore for SlowStore {
        fn persist(&self, mutation: &Mutation) -> Result<(), StatisticsError> {
            thread::sleep(self.delay);
            self.inner.persist(mutation)
        }
    }

    /// Fails every call whose index is listed.
    struct FlakyStore {
        calls: AtomicUsize,
        failing: Vec<usize>,
        persisted: Mutex<Vec<Mutation>>,
    }

    impl StatisticsStore for FlakyStore {
        fn persist(&self, mutation: &Mutation) -> Result<(), StatisticsError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&call) {
                return Err(StatisticsError::Rejected(format!("call {call}")));
            }
            self.persisted.lock().unwrap().push(mutation.clone());
            Ok(())
        }
    }

    fn mutation(code: u16) -> Mutation {
        Mutation::new(MutationKind::AddClientRecord, "example.com").with_response(code, "test")
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for statistics worker");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn submit_returns_before_persist_completes() {
        let store = Arc::new(SlowStore {
            delay: Duration::from_millis(300),
            inner: RecordingStore::new(),
        });
        let channel = StatisticsChannel::start(store.clone()).unwrap();

        let started = Instant::now();
        channel.submit(mutation(200), |_| {});
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(store.inner.mutations().is_empty());

        assert_eq!(store.inner.wait_for(1, Duration::from_secs(5)).len(), 1);
    }

    #[test]
    fn failing_store_calls_on_error_once_per_submission() {
        let store = Arc::new(FlakyStore {
            calls: AtomicUsize::new(0),
            failing: vec![0, 1, 2],
            persisted: Mutex::new(Vec::new()),
        });
        let channel = StatisticsChannel::start(store.clone()).unwrap();
        let errors = Arc::new(AtomicUsize::new(0));

        for code in [400, 404, 500] {
            let errors = Arc::clone(&errors);
            channel.submit(mutation(code), move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            });
        }

        wait_until(|| errors.load(Ordering::SeqCst) == 3);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(errors.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failure_does_not_block_later_mutations() {
        let store = Arc::new(FlakyStore {
            calls: AtomicUsize::new(0),
            failing: vec![0],
            persisted: Mutex::new(Vec::new()),
        });
        let channel = StatisticsChannel::start(store.clone()).unwrap();
        let errors = Arc::new(AtomicUsize::new(0));

        for code in [500, 200, 404] {
            let errors = Arc::clone(&errors);
            channel.submit(mutation(code), move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            });
        }

        wait_until(|| store.persisted.lock().unwrap().len() == 2);
        let codes: Vec<_> = store
            .persisted
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.http_response_code)
            .collect();
        assert_eq!(codes, vec![Some(200), Some(404)]);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }
}
