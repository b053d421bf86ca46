use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Keyed delayed tasks where each new schedule supersedes the pending one.
///
/// Only the waiting phase is cancellable: once the delay elapses the work runs
/// on its own task, so rescheduling never interrupts work already started.
pub struct Debouncer<K> {
    pending: Mutex<HashMap<K, JoinHandle<()>>>,
}

impl<K> Default for Debouncer<K> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `work` after `delay` unless `key` is rescheduled or cancelled first.
    ///
    /// Returns false when called outside a tokio runtime, in which case nothing is scheduled.
    pub fn schedule<F>(&self, key: K, delay: Duration, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(?key, "No async runtime available, debounced task not scheduled");
                return false;
            }
        };

        let mut pending = self.lock();
        pending.retain(|_, task| !task.is_finished());
        if let Some(previous) = pending.remove(&key) {
            previous.abort();
            debug!(?key, "Debounce timer restarted");
        }

        let runner = handle.clone();
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            runner.spawn(work);
        });
        pending.insert(key, task);
        true
    }

    /// Cancel the pending timer for `key`. Returns whether one was waiting.
    pub fn cancel(&self, key: &K) -> bool {
        match self.lock().remove(key) {
            Some(task) => {
                let waiting = !task.is_finished();
                task.abort();
                waiting
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, task) in self.lock().drain() {
            task.abort();
        }
    }

    /// Number of timers still waiting to fire.
    pub fn pending(&self) -> usize {
        self.lock().values().filter(|task| !task.is_finished()).count()
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, task) in pending.drain() {
            task.abort();
        }
    }
}
