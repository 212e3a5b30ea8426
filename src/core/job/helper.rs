use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::Job;

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type TaskClosure = Arc<dyn Fn(Arc<Job>) -> TaskFuture + Send + Sync>;

struct RecurringTask {
    closure: TaskClosure,
    interval: Duration,
}

/// Recurring work shared by most plugins.
///
/// Every task runs in its own tokio task. The wait before the next
/// invocation starts when the previous one returns, so a slow invocation
/// delays the schedule and never overlaps with itself.
pub struct PluginHelper {
    tasks: Vec<RecurringTask>,
    done: CancellationToken,
    tracker: TaskTracker,
}

impl Default for PluginHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginHelper {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            done: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn add_task_with_closure<F, Fut>(&mut self, closure: F, interval: Duration)
    where
        F: Fn(Arc<Job>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(RecurringTask {
            closure: Arc::new(move |job| -> TaskFuture { Box::pin(closure(job)) }),
            interval,
        });
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Starts every task loop and waits for the done signal.
    pub async fn run(&self, job: &Arc<Job>) {
        for task in &self.tasks {
            let closure = Arc::clone(&task.closure);
            let interval = task.interval;
            let done = self.done.clone();
            let job = Arc::clone(job);

            self.tracker.spawn(async move {
                while !done.is_cancelled() {
                    closure(Arc::clone(&job)).await;
                    tokio::select! {
                        _ = done.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
            });
        }

        self.done.cancelled().await;
    }

    /// Invokes each task once, in registration order.
    ///
    /// Each invocation is tracked like a loop iteration, so [`terminate`]
    /// waits for one that is in flight and no further task starts after it.
    ///
    /// [`terminate`]: PluginHelper::terminate
    pub async fn run_once(&self, job: &Arc<Job>) {
        for task in &self.tasks {
            if self.done.is_cancelled() {
                return;
            }
            let closure = Arc::clone(&task.closure);
            let done = self.done.clone();
            let job = Arc::clone(job);

            let handle = self.tracker.spawn(async move {
                if !done.is_cancelled() {
                    closure(job).await;
                }
            });
            if let Err(e) = handle.await
                && e.is_panic()
            {
                std::panic::resume_unwind(e.into_panic());
            }
        }
    }

    /// Signals every loop and waits for all of them to exit.
    pub async fn terminate(&self) {
        self.done.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    pub fn is_terminated(&self) -> bool {
        self.done.is_cancelled() && self.tracker.is_empty()
    }
}
