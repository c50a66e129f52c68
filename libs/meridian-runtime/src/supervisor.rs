//! Supervised long-running tasks.
//!
//! A [`SupervisedTask`] is a named, zero-argument unit of work. The
//! [`TaskSupervisor`] runs every attempt of the work on its own tokio task and
//! re-enters it after the task's [`RestartPolicy::min_delay`] whenever the
//! attempt ends. A clean return, an `Err` and a panic are all treated as "the
//! attempt ended"; the only difference is what gets reported to the
//! supervisor's exit callback and the log.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

type WorkFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Callback invoked every time an attempt of a supervised task ends.
pub type ExitCallback = Arc<dyn Fn(&TaskExit) + Send + Sync>;

/// How a supervised task is re-entered after an attempt ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestartPolicy {
    min_delay: Duration,
}

impl RestartPolicy {
    /// Re-enter as soon as the previous attempt ends.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            min_delay: Duration::ZERO,
        }
    }

    /// Wait at least `min_delay` between attempts. The delay never grows.
    #[must_use]
    pub const fn with_min_delay(min_delay: Duration) -> Self {
        Self { min_delay }
    }

    #[must_use]
    pub const fn min_delay(&self) -> Duration {
        self.min_delay
    }
}

/// A named unit of work that is re-invoked for the life of the process.
pub struct SupervisedTask {
    name: String,
    policy: RestartPolicy,
    work: WorkFn,
}

impl fmt::Debug for SupervisedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisedTask")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SupervisedTask {
    pub fn new<F, Fut>(name: impl Into<String>, work: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            policy: RestartPolicy::default(),
            work: Arc::new(move || Box::pin(work())),
        }
    }

    #[must_use]
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn restart_policy(&self) -> RestartPolicy {
        self.policy
    }
}

/// Outcome of one attempt of a supervised task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The work returned `Ok(())`.
    Returned,
    /// The work returned an error (rendered with its context chain).
    Failed(String),
    /// The work panicked.
    Panicked(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Returned => f.write_str("returned"),
            Self::Failed(e) => write!(f, "failed: {e}"),
            Self::Panicked(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// Structured report passed to the supervisor's exit callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskExit {
    pub task: String,
    /// 1-based number of the attempt that just ended.
    pub attempt: u64,
    pub reason: ExitReason,
}

/// Handle to a running supervised task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    name: Arc<str>,
    attempts: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl TaskHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of attempts started so far, including the running one.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Number of times the work has been re-entered after an attempt ended.
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.attempts().saturating_sub(1)
    }

    /// Stop supervising and abort the running attempt.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Runs [`SupervisedTask`]s and keeps track of their handles.
///
/// Every task spawned by one supervisor shares its cancellation scope, so
/// [`TaskSupervisor::shutdown`] stops them all at once.
pub struct TaskSupervisor {
    on_exit: Option<ExitCallback>,
    root: CancellationToken,
    handles: Mutex<Vec<TaskHandle>>,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("tasks", &self.handles.lock().len())
            .field("has_exit_callback", &self.on_exit.is_some())
            .finish_non_exhaustive()
    }
}

impl TaskSupervisor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            on_exit: None,
            root: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Install a callback invoked after every attempt of every task.
    #[must_use]
    pub fn with_exit_callback(mut self, on_exit: ExitCallback) -> Self {
        self.on_exit = Some(on_exit);
        self
    }

    /// Start supervising `task`. Must be called from within a tokio runtime.
    pub fn spawn(&self, task: SupervisedTask) -> TaskHandle {
        let handle = spawn_supervised(task, self.root.child_token(), self.on_exit.clone());
        self.handles.lock().push(handle.clone());
        handle
    }

    /// Handles of all tasks spawned so far, in spawn order.
    #[must_use]
    pub fn handles(&self) -> Vec<TaskHandle> {
        self.handles.lock().clone()
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<TaskHandle> {
        self.handles.lock().iter().find(|h| h.name() == name).cloned()
    }

    /// Stop every task spawned by this supervisor.
    pub fn shutdown(&self) {
        tracing::info!(tasks = self.handles.lock().len(), "Stopping supervised tasks");
        self.root.cancel();
    }
}

/// Run `work` forever on its own task, re-entering it `min_delay` after every
/// return.
pub fn run_forever<F, Fut>(name: impl Into<String>, min_delay: Duration, work: F) -> TaskHandle
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let task = SupervisedTask::new(name, work)
        .with_restart_policy(RestartPolicy::with_min_delay(min_delay));
    spawn_supervised(task, CancellationToken::new(), None)
}

fn spawn_supervised(
    task: SupervisedTask,
    cancel: CancellationToken,
    on_exit: Option<ExitCallback>,
) -> TaskHandle {
    let handle = TaskHandle {
        name: Arc::from(task.name.as_str()),
        attempts: Arc::new(AtomicU64::new(0)),
        cancel,
    };

    let loop_handle = handle.clone();
    tokio::spawn(async move {
        supervise(task, loop_handle, on_exit).await;
    });

    handle
}

async fn supervise(task: SupervisedTask, handle: TaskHandle, on_exit: Option<ExitCallback>) {
    let SupervisedTask { name, policy, work } = task;
    tracing::debug!(task = %name, min_delay = ?policy.min_delay(), "Supervising task");

    loop {
        let attempt = handle.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        let mut running = tokio::spawn((work)());

        let joined = tokio::select! {
            () = handle.cancel.cancelled() => {
                running.abort();
                tracing::debug!(task = %name, attempt, "Supervised task stopped");
                return;
            }
            joined = &mut running => joined,
        };

        let reason = exit_reason(joined);
        match &reason {
            ExitReason::Returned => {
                tracing::warn!(task = %name, attempt, "Supervised task returned; restarting");
            }
            ExitReason::Failed(_) | ExitReason::Panicked(_) => {
                tracing::error!(task = %name, attempt, reason = %reason, "Supervised task ended; restarting");
            }
        }

        if let Some(cb) = &on_exit {
            cb(&TaskExit {
                task: name.clone(),
                attempt,
                reason,
            });
        }

        if !policy.min_delay().is_zero() {
            tokio::select! {
                () = handle.cancel.cancelled() => return,
                () = tokio::time::sleep(policy.min_delay()) => {}
            }
        } else if handle.cancel.is_cancelled() {
            return;
        }
    }
}

fn exit_reason(joined: Result<anyhow::Result<()>, JoinError>) -> ExitReason {
    match joined {
        Ok(Ok(())) => ExitReason::Returned,
        Ok(Err(e)) => ExitReason::Failed(format!("{e:#}")),
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            ExitReason::Panicked(msg)
        }
        Err(e) => ExitReason::Failed(e.to_string()),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn clean_return_is_reentered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let handle = run_forever("counter", Duration::ZERO, move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        wait_until(|| calls.load(Ordering::SeqCst) >= 3).await;
        assert!(handle.restarts() >= 2);
        handle.stop();
    }

    #[tokio::test]
    async fn errors_and_panics_are_reported_and_restarted() {
        let exits: Arc<Mutex<Vec<TaskExit>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&exits);
        let supervisor = TaskSupervisor::new()
            .with_exit_callback(Arc::new(move |exit: &TaskExit| sink.lock().push(exit.clone())));

        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let handle = supervisor.spawn(SupervisedTask::new("flaky", move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 => anyhow::bail!("boom"),
                    1 => panic!("kaboom"),
                    _ => std::future::pending::<anyhow::Result<()>>().await,
                }
            }
        }));

        wait_until(|| exits.lock().len() >= 2).await;
        let seen = exits.lock().clone();
        assert_eq!(seen[0].task, "flaky");
        assert_eq!(seen[0].attempt, 1);
        assert_eq!(seen[0].reason, ExitReason::Failed("boom".to_owned()));
        assert_eq!(seen[1].attempt, 2);
        assert_eq!(seen[1].reason, ExitReason::Panicked("kaboom".to_owned()));

        wait_until(|| handle.attempts() == 3).await;
        supervisor.shutdown();
        assert!(handle.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn min_delay_spaces_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let supervisor = TaskSupervisor::new();
        let task = SupervisedTask::new("slow", move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .with_restart_policy(RestartPolicy::with_min_delay(Duration::from_secs(10)));
        let handle = supervisor.spawn(task);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.find("slow").map(|h| h.attempts()), Some(3));
        handle.stop();
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn shutdown_stops_every_task_and_logs() {
        let supervisor = TaskSupervisor::new();
        let a = supervisor.spawn(SupervisedTask::new("a", std::future::pending::<anyhow::Result<()>>));
        let b = supervisor.spawn(SupervisedTask::new("b", std::future::pending::<anyhow::Result<()>>));

        supervisor.shutdown();

        assert!(a.is_stopped() && b.is_stopped());
        assert_eq!(supervisor.handles().len(), 2);
        assert!(logs_contain("Stopping supervised tasks"));
    }

    #[tokio::test]
    async fn stop_aborts_running_attempt() {
        let finished = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&finished);
        let handle = run_forever("sleeper", Duration::ZERO, move || {
            let f = Arc::clone(&f);
            async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        wait_until(|| handle.attempts() == 1).await;
        handle.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert_eq!(handle.attempts(), 1);
    }
}
