//! Background timers owned by an engine.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::task::JoinHandle;

/// Set of spawned timer tasks, aborted together on shutdown.
#[derive(Debug, Default)]
pub(crate) struct TimerSet {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TimerSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Spawn a timer task on the current runtime.
    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Abort every outstanding timer.
    pub(crate) fn cancel_all(&self) {
        let drained: Vec<JoinHandle<()>> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in drained {
            handle.abort();
        }
    }

    /// Number of timers still running.
    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_aborts_tasks() {
        let timers = TimerSet::new();
        timers.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert_eq!(timers.active(), 1);

        timers.cancel_all();
        tokio::task::yield_now().await;
        assert_eq!(timers.active(), 0);

        // Second cancel is a no-op.
        timers.cancel_all();
    }
}
