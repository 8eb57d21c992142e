use std::sync::Arc;

use parking_lot::Condvar;

/// A unique name identifying a submission while it is live in the pool.
pub type TaskName = String;

/// A unit of work the pool can execute.
///
/// `run` is called at most once, on a pool worker thread, without any pool lock
/// held. A panic inside `run` is caught at the worker boundary and discarded.
/// Any `FnMut() + Send + 'static` closure is a `Task`.
pub trait Task: Send {
  fn run(&mut self);
}

impl<F> Task for F
where
  F: FnMut() + Send,
{
  fn run(&mut self) {
    self()
  }
}

/// The type of work unit that the pool owns.
pub type BoxedTask = Box<dyn Task + 'static>;

/// Progress of a live task, as observed under the pool lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
  /// Submitted and waiting in the dispatch queue.
  Queued,
  /// Dequeued by a worker; `run` is executing.
  Running,
  /// `run` has returned (or panicked) and waiters have been signalled.
  Finished,
}

/// Internal per-submission record held in the registry.
///
/// The work unit is taken out while a worker runs it and put back before the
/// phase flips to `Finished`, so whoever reclaims the slot drops the unit.
pub(crate) struct TaskSlot {
  pub(crate) task: Option<BoxedTask>,
  pub(crate) phase: TaskPhase,
  pub(crate) waited: bool,
  /// Completion signal. Always waited on with the pool's state lock.
  pub(crate) done: Arc<Condvar>,
}

impl TaskSlot {
  pub(crate) fn new(task: BoxedTask) -> Self {
    Self {
      task: Some(task),
      phase: TaskPhase::Queued,
      waited: false,
      done: Arc::new(Condvar::new()),
    }
  }

  pub(crate) fn is_finished(&self) -> bool {
    self.phase == TaskPhase::Finished
  }
}

impl std::fmt::Debug for TaskSlot {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TaskSlot")
      .field("phase", &self.phase)
      .field("waited", &self.waited)
      .field("task_present", &self.task.is_some())
      .finish_non_exhaustive()
  }
}
