//! Task lifecycle management
//!
//! Every long-running task (one poller per monitored target, for instance)
//! is spawned through a [`TaskManager`] so that shutdown can be requested
//! cooperatively and forced after a timeout.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{Error, Result};

/// Handle to a tracked task
#[derive(Debug)]
pub struct TaskHandle {
    id: usize,
    name: String,
    handle: JoinHandle<()>,
    started_at: Instant,
}

impl TaskHandle {
    fn new(id: usize, name: String, handle: JoinHandle<()>) -> Self {
        Self {
            id,
            name,
            handle,
            started_at: Instant::now(),
        }
    }

    /// Get task ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if task is finished
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Abort the task
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Get task runtime
    pub fn runtime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Grace period for aborted tasks to drop their guards
const ABORT_GRACE: Duration = Duration::from_millis(100);

/// Decrements the active counter even if the task panics or is aborted,
/// waking waiters when the last task goes away
struct ActiveGuard {
    active: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Task manager for tracking and cancelling async tasks
///
/// Tasks receive a child [`CancellationToken`] and are expected to return
/// promptly once it fires; anything still running after the shutdown
/// timeout is aborted.
pub struct TaskManager {
    next_task_id: AtomicUsize,
    tasks: Arc<Mutex<Vec<TaskHandle>>>,
    cancel_token: CancellationToken,
    active_count: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    name: String,
    max_tasks: usize,
    shutdown_timeout: Duration,
}

impl TaskManager {
    /// Create a new task manager
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, 256, Duration::from_secs(5))
    }

    /// Create with custom configuration
    pub fn with_config(name: impl Into<String>, max_tasks: usize, shutdown_timeout: Duration) -> Self {
        Self {
            next_task_id: AtomicUsize::new(0),
            tasks: Arc::new(Mutex::new(Vec::new())),
            cancel_token: CancellationToken::new(),
            active_count: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            name: name.into(),
            max_tasks,
            shutdown_timeout,
        }
    }

    /// Token cancelled when this manager shuts down
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Spawn a tracked task
    ///
    /// `task` is handed a child cancellation token and must observe it.
    pub async fn spawn_tracked<F, Fut>(&self, name: impl Into<String>, task: F) -> Result<usize>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task_name = name.into();

        if self.cancel_token.is_cancelled() {
            return Err(Error::Task(format!(
                "{} is shutting down, refusing to spawn {}",
                self.name, task_name
            )));
        }

        let active = self.active_count.load(Ordering::SeqCst);
        if active >= self.max_tasks {
            return Err(Error::Task(format!(
                "Task limit reached for {}: {} active tasks",
                self.name, active
            )));
        }

        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let future = task(self.cancel_token.child_token());

        self.active_count.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard {
            active: self.active_count.clone(),
            idle: self.idle.clone(),
        };
        let manager_name = self.name.clone();
        let task_name_clone = task_name.clone();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            debug!("Task started: {} [{}] in {}", task_name_clone, task_id, manager_name);
            future.await;
            debug!("Task finished: {} [{}] in {}", task_name_clone, task_id, manager_name);
        });

        self.tasks
            .lock()
            .await
            .push(TaskHandle::new(task_id, task_name, handle));

        Ok(task_id)
    }

    /// Get number of active tasks
    pub fn active_task_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Request cooperative cancellation of all tasks
    pub fn cancel_all(&self) {
        debug!("Cancelling all tasks in {}", self.name);
        self.cancel_token.cancel();
    }

    /// Resolves once every tracked task has finished
    pub async fn wait_for_completion(&self) {
        loop {
            // register before checking so a wakeup between the two is not lost
            let idle = self.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.active_count.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Cancel all tasks and wait for them, aborting stragglers after the timeout
    pub async fn shutdown_all(&self) -> Result<()> {
        let start = Instant::now();
        debug!(
            "Starting shutdown for {} with {} active tasks",
            self.name,
            self.active_task_count()
        );

        self.cancel_all();

        let graceful = tokio::time::timeout(self.shutdown_timeout, self.wait_for_completion())
            .await
            .is_ok();

        if graceful {
            debug!("{} shutdown completed gracefully in {:?}", self.name, start.elapsed());
        } else {
            warn!(
                "{} shutdown timed out after {:?}, forcing abort",
                self.name, self.shutdown_timeout
            );
            self.abort_all().await;
        }

        self.tasks.lock().await.clear();
        Ok(())
    }

    async fn abort_all(&self) {
        let tasks = self.tasks.lock().await;
        for task in tasks.iter().filter(|t| !t.is_finished()) {
            warn!(
                "Force aborting task: {} [{}] after {:?}",
                task.name,
                task.id,
                task.runtime()
            );
            task.abort();
        }
        drop(tasks);

        // aborted tasks drop their guards on the next poll
        if tokio::time::timeout(ABORT_GRACE, self.wait_for_completion())
            .await
            .is_err()
        {
            warn!(
                "{} still has {} active tasks after abort",
                self.name,
                self.active_task_count()
            );
        }
    }

    /// Get task statistics
    pub async fn stats(&self) -> TaskStats {
        let tasks = self.tasks.lock().await;
        TaskStats {
            name: self.name.clone(),
            total_tasks: tasks.len(),
            active_tasks: self.active_count.load(Ordering::SeqCst),
            finished_tasks: tasks.iter().filter(|t| t.is_finished()).count(),
        }
    }
}

/// Task statistics
#[derive(Debug, Clone)]
pub struct TaskStats {
    pub name: String,
    pub total_tasks: usize,
    pub active_tasks: usize,
    pub finished_tasks: usize,
}
