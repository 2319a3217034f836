//! Hands work off the report-delivery thread.
//!
//! Anything that talks back to the receiver blocks until a reply is
//! delivered, so it must never run on the thread doing the delivering.
//! Tasks run on tokio's blocking pool: each gets its own thread, and there
//! is no ordering between tasks.

use tokio::runtime::{Handle, TryCurrentError};

#[derive(Debug, Clone)]
pub struct TaskDispatcher {
    handle: Handle,
}

impl TaskDispatcher {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Dispatcher bound to the runtime the caller is running in.
    pub fn current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::new)
    }

    /// Run `task` later, on a thread other than the caller's.
    pub fn run<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Detached: nothing waits on the result.
        drop(self.handle.spawn_blocking(task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_runs_on_another_thread() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let dispatcher = TaskDispatcher::new(rt.handle().clone());
        let (tx, rx) = mpsc::channel();

        let caller = thread::current().id();
        dispatcher.run(move || {
            let _ = tx.send(thread::current().id());
        });

        let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(worker, caller);
    }

    #[test]
    fn test_current_outside_runtime() {
        assert!(TaskDispatcher::current().is_err());

        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        assert!(TaskDispatcher::current().is_ok());
    }
}
