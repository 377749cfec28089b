//! Task spawning for single-threaded runtimes.

use std::future::Future;

/// Provider for spawning local tasks.
///
/// Connections spawn their reader, writer and keep-alive loops through this
/// trait. Tasks run on the current thread, so they may hold `Rc` state.
pub trait TaskProvider: Clone {
    /// Spawn a named task on the current `LocalSet`.
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static;
}

/// Task provider backed by `tokio::task::spawn_local`.
///
/// Must be used from within a `LocalSet`.
#[derive(Clone, Debug, Default)]
pub struct TokioTaskProvider;

impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        let task_name = name.to_string();
        tokio::task::spawn_local(async move {
            tracing::trace!("task {} starting", task_name);
            future.await;
            tracing::trace!("task {} completed", task_name);
        })
    }
}
