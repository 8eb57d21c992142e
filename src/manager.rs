use crate::config::PoolConfig;
use crate::error::{PoolError, SubmitError};
use crate::task::{BoxedTask, Task, TaskPhase};
use crate::task_queue::{Dispatched, PoolState, PoolStatus, WaitCheck};

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, info_span, trace, warn};

lazy_static::lazy_static! {
  static ref NEXT_POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// State shared between the pool handle and its worker threads.
struct Shared {
  pool_name: Arc<String>,
  state: Mutex<PoolState>,
  /// Signalled when a name is queued or when stopping begins.
  queue_signal: Condvar,
  panicked_tasks: AtomicU64,
}

/// A fixed-size pool of worker threads executing named tasks.
///
/// Each submission is identified by a name that stays unique while the task is
/// live. Any thread may block on a name with [`TaskPool::wait`], which succeeds
/// exactly once per submission and releases the task. [`TaskPool::stop`] drains
/// the queue and joins the workers; dropping the pool implies `stop`.
///
/// # Re-entrant waits
///
/// A task may itself call `wait` on another name (share the pool via `Arc`).
/// If every worker blocks on names that are still queued behind them, the pool
/// deadlocks. Keep wait chains shallower than the worker count.
pub struct TaskPool {
  shared: Arc<Shared>,
  thread_count: usize,
  workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskPool {
  /// Starts a pool with `thread_count` workers and a generated name.
  pub fn new(thread_count: usize) -> Result<Self, PoolError> {
    Self::with_config(PoolConfig::new(thread_count))
  }

  pub fn with_config(config: PoolConfig) -> Result<Self, PoolError> {
    if config.thread_count == 0 {
      return Err(PoolError::InvalidThreadCount(config.thread_count));
    }

    let pool_name = config.name.unwrap_or_else(|| {
      let id = NEXT_POOL_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
      format!("thread_pool-{}", id)
    });

    let pool = Self {
      shared: Arc::new(Shared {
        pool_name: Arc::new(pool_name),
        state: Mutex::new(PoolState::new()),
        queue_signal: Condvar::new(),
        panicked_tasks: AtomicU64::new(0),
      }),
      thread_count: config.thread_count,
      workers: Mutex::new(Vec::with_capacity(config.thread_count)),
    };

    for worker in 0..config.thread_count {
      let mut builder = thread::Builder::new().name(format!("{}-worker-{}", pool.shared.pool_name, worker));
      if let Some(bytes) = config.stack_size {
        builder = builder.stack_size(bytes);
      }

      let worker_shared = Arc::clone(&pool.shared);
      pool.shared.state.lock().register_worker();
      match builder.spawn(move || run_worker_loop(worker_shared, worker)) {
        Ok(handle) => pool.workers.lock().push(handle),
        Err(spawn_error) => {
          pool.shared.state.lock().retire_worker();
          error!(
            pool_name = %pool.shared.pool_name,
            worker,
            "Failed to spawn worker thread: {}",
            spawn_error
          );
          // Dropping `pool` stops and joins the workers started so far.
          return Err(PoolError::WorkerSpawn(spawn_error.to_string()));
        }
      }
    }

    info!(pool_name = %pool.shared.pool_name, threads = pool.thread_count, "Thread pool started.");
    Ok(pool)
  }

  pub fn name(&self) -> &str {
    &self.shared.pool_name
  }

  pub fn thread_count(&self) -> usize {
    self.thread_count
  }

  pub fn status(&self) -> PoolStatus {
    self.shared.state.lock().status
  }

  pub fn is_stopping(&self) -> bool {
    self.status() != PoolStatus::Running
  }

  /// Returns the number of names waiting in the dispatch queue.
  pub fn queued_task_count(&self) -> usize {
    self.shared.state.lock().queued_len()
  }

  /// Returns the number of tasks whose `run` is currently executing.
  pub fn running_task_count(&self) -> usize {
    self.shared.state.lock().running_len()
  }

  /// Returns the number of submissions not yet reclaimed by a wait.
  pub fn live_task_count(&self) -> usize {
    self.shared.state.lock().live_len()
  }

  /// Returns the phase of a live task, or `None` if the name is not live.
  pub fn task_phase(&self, name: &str) -> Option<TaskPhase> {
    self.shared.state.lock().phase_of(name)
  }

  /// Returns how many tasks panicked inside `run` since the pool started.
  pub fn panicked_task_count(&self) -> u64 {
    self.shared.panicked_tasks.load(AtomicOrdering::Relaxed)
  }

  /// Queues `task` under `name`.
  ///
  /// # Errors
  /// Returns `PoolError::DuplicateName` if `name` is still live; the task is dropped.
  /// Returns `PoolError::Rejected` if `stop()` has been requested; the task is
  /// handed back through [`SubmitError::into_task`] and never runs.
  pub fn submit<T>(&self, name: impl Into<String>, task: T) -> Result<(), SubmitError>
  where
    T: Task + 'static,
  {
    self.submit_boxed(name, Box::new(task))
  }

  pub fn submit_boxed(&self, name: impl Into<String>, task: BoxedTask) -> Result<(), SubmitError> {
    let name = name.into();
    let enqueued = {
      let mut state = self.shared.state.lock();
      state.enqueue(name.clone(), task)
    };

    match enqueued {
      Ok(()) => {
        debug!(pool_name = %self.shared.pool_name, task_name = %name, "Task queued.");
        self.shared.queue_signal.notify_one();
        Ok(())
      }
      Err(submit_error) => {
        warn!(pool_name = %self.shared.pool_name, task_name = %name, "Submit refused: {}", submit_error);
        Err(submit_error)
      }
    }
  }

  /// Blocks until the task named `name` has finished, then removes it from the
  /// pool and drops its work unit.
  ///
  /// Returns immediately if the task already finished. Succeeds exactly once
  /// per submission.
  ///
  /// # Errors
  /// Returns `PoolError::UnknownName` if no live task has that name: it was
  /// never submitted, or a previous wait already reclaimed it.
  pub fn wait(&self, name: &str) -> Result<(), PoolError> {
    self.shared.wait(name)
  }

  /// Async variant of [`TaskPool::wait`] for callers running on Tokio.
  ///
  /// The blocking wait runs on Tokio's blocking thread pool so the calling
  /// runtime is never parked. Must be called from within a Tokio runtime.
  ///
  /// The wait cannot be cancelled. Dropping the returned future (for example
  /// when a `tokio::time::timeout` fires) leaves the blocking wait running; it
  /// still reclaims the task when it finishes, so later waits on `name` get
  /// `UnknownName`.
  ///
  /// # Errors
  /// Same as `wait`, plus `PoolError::WaitAborted` if the blocking helper could
  /// not be joined.
  pub async fn wait_async(&self, name: &str) -> Result<(), PoolError> {
    let shared = Arc::clone(&self.shared);
    let task_name = name.to_string();
    tokio::task::spawn_blocking(move || shared.wait(&task_name))
      .await
      .map_err(|join_error| PoolError::WaitAborted(join_error.to_string()))?
  }

  /// Stops accepting tasks, lets the workers drain everything already queued,
  /// and blocks until every worker has exited.
  ///
  /// Idempotent: if a stop is already in progress or done, returns immediately.
  pub fn stop(&self) {
    {
      let mut state = self.shared.state.lock();
      if state.status != PoolStatus::Running {
        trace!(pool_name = %self.shared.pool_name, "Stop already in progress or completed.");
        return;
      }
      state.status = PoolStatus::Stopping;
      info!(
        pool_name = %self.shared.pool_name,
        queued = state.queued_len(),
        "Initiating pool stop. Draining queued tasks."
      );
    }
    self.shared.queue_signal.notify_all();

    let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
    let current = thread::current().id();
    for handle in handles {
      if handle.thread().id() == current {
        // Stopped from inside one of our own tasks; that worker exits after the
        // task returns.
        debug!(pool_name = %self.shared.pool_name, "Stop called from a pool worker. Detaching its handle.");
        continue;
      }
      if handle.join().is_err() {
        error!(pool_name = %self.shared.pool_name, "Worker thread panicked outside task execution.");
      }
    }

    let mut state = self.shared.state.lock();
    if state.live_workers() == 0 {
      state.status = PoolStatus::Stopped;
      info!(pool_name = %self.shared.pool_name, "Pool stopped. All workers joined.");
    } else {
      debug!(
        pool_name = %self.shared.pool_name,
        "Stop returning while the calling worker drains the rest of the queue."
      );
    }
  }
}

impl Shared {
  fn wait(&self, name: &str) -> Result<(), PoolError> {
    let mut state = self.state.lock();
    let done = state.begin_wait(name)?;
    trace!(pool_name = %self.pool_name, task_name = %name, "Waiting for task.");

    loop {
      match state.check_wait(name, &done) {
        WaitCheck::Finished => break,
        WaitCheck::Pending => done.wait(&mut state),
        WaitCheck::Gone => {
          debug!(pool_name = %self.pool_name, task_name = %name, "Task was reclaimed by another waiter.");
          return Err(PoolError::UnknownName(name.to_string()));
        }
      }
    }

    let task = state.reclaim(name);
    drop(state);
    drop(task);
    debug!(pool_name = %self.pool_name, task_name = %name, "Task waited on and reclaimed.");
    Ok(())
  }
}

fn run_worker_loop(shared: Arc<Shared>, worker: usize) {
  let _span = info_span!("thread_pool_worker", pool_name = %shared.pool_name, worker).entered();
  info!("Worker started.");

  loop {
    let Dispatched { name, mut task, done } = {
      let mut state = shared.state.lock();
      loop {
        if let Some(dispatched) = state.next_task() {
          break dispatched;
        }
        if state.status != PoolStatus::Running {
          let released = state.retire_worker();
          drop(state);
          info!("Stop requested and queue empty. Worker terminating.");
          if let Some(released) = released {
            debug!(released = released.len(), "Last worker out releasing unreclaimed tasks.");
            drop(released);
          }
          return;
        }
        shared.queue_signal.wait(&mut state);
      }
    };

    trace!(task_name = %name, "Dequeued task. Running.");
    if std::panic::catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
      shared.panicked_tasks.fetch_add(1, AtomicOrdering::Relaxed);
      error!(task_name = %name, "Task panicked during execution.");
    }

    let orphaned = {
      let mut state = shared.state.lock();
      let orphaned = state.complete(&name, task);
      done.notify_all();
      orphaned
    };
    if orphaned.is_some() {
      debug!(task_name = %name, "Task finished after its slot was released. Dropping it.");
    }
    trace!(task_name = %name, "Task finished.");
  }
}

impl fmt::Debug for TaskPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.shared.state.lock();
    f.debug_struct("TaskPool")
      .field("name", &self.shared.pool_name)
      .field("thread_count", &self.thread_count)
      .field("status", &state.status)
      .field("queued", &state.queued_len())
      .field("live", &state.live_len())
      .finish_non_exhaustive()
  }
}

impl Drop for TaskPool {
  fn drop(&mut self) {
    if self.status() == PoolStatus::Running {
      info!(
        pool_name = %self.shared.pool_name,
        "TaskPool dropped without stop(). Initiating implicit stop."
      );
      self.stop();
    }

    let released = self.shared.state.lock().teardown();
    if released.is_empty() {
      trace!(
        pool_name = %self.shared.pool_name,
        "Drop: nothing to release now (empty, or deferred to a draining worker)."
      );
      return;
    }

    let never_waited = released.iter().filter(|(_, slot)| !slot.waited).count();
    debug!(
      pool_name = %self.shared.pool_name,
      released = released.len(),
      never_waited,
      "Drop: releasing tasks that were never reclaimed by a wait."
    );
    // Work units are dropped here, outside the state lock.
    drop(released);
  }
}
