//! Cooperative task primitives: `ChildTask`, a spawned-task handle that
//! aborts its task when dropped so no task silently outlives its owner (used
//! by the GS write task, which must die the instant its read task returns).

use core::future::Future;

use tokio::task::JoinHandle;

/// Aborts the wrapped task when dropped.
#[must_use]
pub struct ChildTask<T>(JoinHandle<T>);

impl<T> ChildTask<T> {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        ChildTask(tokio::task::spawn(future))
    }

    pub async fn join(mut self) -> core::result::Result<T, tokio::task::JoinError> {
        (&mut self.0).await
    }

    pub fn abort(&self) {
        self.0.abort()
    }

    /// Drop without aborting the task.
    pub fn detach(self) {
        core::mem::forget(self);
    }
}

impl<T> Drop for ChildTask<T> {
    fn drop(&mut self) {
        self.abort();
    }
}
