use std::future::Future;

use async_trait::async_trait;
use tokio::task::JoinHandle;

/// Sender half of the cooperative shutdown channel.
///
/// The supervisor keeps the handle; every task receives a clone of the
/// associated [`ShutdownSignal`].
#[derive(Debug)]
pub struct ShutdownHandle(tokio::sync::watch::Sender<()>);

impl ShutdownHandle {
    pub fn new() -> (Self, ShutdownSignal) {
        let (sender, receiver) = tokio::sync::watch::channel(());
        (Self(sender), ShutdownSignal(receiver))
    }

    /// Requests the shutdown of all the associated tasks.
    pub fn signal(&self) {
        let _ = self.0.send(());
    }

    /// Resolves once every [`ShutdownSignal`] has been dropped.
    ///
    /// Tasks drop their signal when they return, so this is effectively
    /// "all tasks terminated".
    pub async fn all_closed(&self) {
        self.0.closed().await;
    }
}

#[derive(Clone, Debug)]
pub struct ShutdownSignal(tokio::sync::watch::Receiver<()>);

impl ShutdownSignal {
    /// Resolves once the shutdown is requested.
    pub async fn wait(&mut self) {
        let _ = self.0.changed().await;
    }
}

/// Aborts the running task when dropped.
/// Also see https://github.com/tokio-rs/tokio/issues/1830 for some background.
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

    pub async fn join(mut self) -> Result<T, tokio::task::JoinError> {
        (&mut self.0).await
    }

    /// Immediately abort the task
    pub fn abort(&self) {
        self.0.abort()
    }

    /// Drop without aborting the task
    pub fn detach(self) {
        core::mem::forget(self);
    }
}

impl<T> Drop for ChildTask<T> {
    fn drop(&mut self) {
        self.abort();
    }
}

/// A long-running unit of execution supervised by the service.
///
/// Implementations are expected to observe `shutdown_signal` at their
/// suspension points and to release any owned resource on every exit path.
#[async_trait]
pub trait Task {
    type Output: Send;

    const NAME: &'static str;

    async fn run(self, shutdown_signal: ShutdownSignal) -> Self::Output;
}

pub fn spawn_task<T>(task: T, shutdown_signal: ShutdownSignal) -> ChildTask<T::Output>
where
    T: Task + 'static,
    T::Output: 'static,
{
    ChildTask(tokio::task::spawn(task.run(shutdown_signal)))
}
