use crate::errors::AppResult;
use std::future::Future;

/// Spawns work nobody waits for.
///
/// The task runs at most once and is lost if the process exits before it
/// finishes. Failures are logged, never returned.
pub fn spawn_best_effort<F>(label: &'static str, task: F)
where
    F: Future<Output = AppResult<()>> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(error) = task.await {
                    tracing::warn!(task = label, error = %error, "background task failed");
                }
            });
        }
        Err(_) => {
            tracing::warn!(task = label, "no async runtime available; background task dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::spawn_best_effort;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn runs_the_task_without_being_awaited() {
        let done = Arc::new(AtomicBool::new(false));
        let (tx, rx) = tokio::sync::oneshot::channel();
        let flag = done.clone();
        spawn_best_effort("test", async move {
            flag.store(true, Ordering::SeqCst);
            let _ = tx.send(());
            Ok(())
        });
        rx.await.expect("task finished");
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn without_a_runtime_the_task_is_dropped() {
        spawn_best_effort("orphan", async { Ok(()) });
    }
}
