use crate::error::{PoolError, SubmitError};
use crate::task::{BoxedTask, TaskName, TaskPhase, TaskSlot};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Condvar;

/// Lifecycle of a pool. Transitions are one-way: `Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
  /// Accepting submissions.
  Running,
  /// `stop()` was requested; workers are draining the queue.
  Stopping,
  /// Every worker has terminated.
  Stopped,
}

/// A task handed to a worker by [`PoolState::next_task`].
pub(crate) struct Dispatched {
  pub(crate) name: TaskName,
  pub(crate) task: BoxedTask,
  pub(crate) done: Arc<Condvar>,
}

/// What a waiter finds when it re-checks its slot after a wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitCheck {
  Pending,
  Finished,
  /// The slot was reclaimed by someone else (or replaced by a new submission
  /// reusing the name).
  Gone,
}

/// The registry and FIFO dispatch queue. Everything here is guarded by the
/// pool's single state lock.
///
/// Invariant: every name in `queue` has a slot in `registry`.
#[derive(Debug)]
pub(crate) struct PoolState {
  pub(crate) status: PoolStatus,
  registry: HashMap<TaskName, TaskSlot>,
  queue: VecDeque<TaskName>,
  /// Worker threads that have not yet exited their loop.
  live_workers: usize,
  /// The pool handle was dropped while a worker was still draining; the last
  /// worker to exit releases the registry.
  teardown_pending: bool,
}

impl PoolState {
  pub(crate) fn new() -> Self {
    Self {
      status: PoolStatus::Running,
      registry: HashMap::new(),
      queue: VecDeque::new(),
      live_workers: 0,
      teardown_pending: false,
    }
  }

  pub(crate) fn register_worker(&mut self) {
    self.live_workers += 1;
  }

  /// Called by a worker leaving its loop, or for a worker that failed to spawn.
  ///
  /// The last worker out marks the pool `Stopped` (once a stop was requested)
  /// and, if teardown was deferred to it, returns the slots it must release.
  pub(crate) fn retire_worker(&mut self) -> Option<Vec<(TaskName, TaskSlot)>> {
    self.live_workers = self.live_workers.saturating_sub(1);
    if self.live_workers > 0 || self.status == PoolStatus::Running {
      return None;
    }
    self.status = PoolStatus::Stopped;
    if self.teardown_pending {
      self.teardown_pending = false;
      Some(self.release_all())
    } else {
      None
    }
  }

  /// Tears down the registry now if no worker is left, otherwise hands the job
  /// to the last worker still draining the queue.
  pub(crate) fn teardown(&mut self) -> Vec<(TaskName, TaskSlot)> {
    if self.live_workers == 0 {
      self.status = PoolStatus::Stopped;
      self.release_all()
    } else {
      self.teardown_pending = true;
      Vec::new()
    }
  }

  pub(crate) fn live_workers(&self) -> usize {
    self.live_workers
  }

  /// Registers a new slot and appends its name to the tail of the queue.
  pub(crate) fn enqueue(&mut self, name: TaskName, task: BoxedTask) -> Result<(), SubmitError> {
    if self.status != PoolStatus::Running {
      return Err(SubmitError::rejected(name, task));
    }
    if self.registry.contains_key(&name) {
      return Err(SubmitError::duplicate(name));
    }
    self.registry.insert(name.clone(), TaskSlot::new(task));
    self.queue.push_back(name);
    Ok(())
  }

  /// Pops the head of the queue, marks its slot running and lends the work unit
  /// out to the caller.
  pub(crate) fn next_task(&mut self) -> Option<Dispatched> {
    while let Some(name) = self.queue.pop_front() {
      let Some(slot) = self.registry.get_mut(&name) else {
        continue;
      };
      let Some(task) = slot.task.take() else {
        continue;
      };
      slot.phase = TaskPhase::Running;
      return Some(Dispatched {
        name,
        task,
        done: Arc::clone(&slot.done),
      });
    }
    None
  }

  /// Returns the work unit to its slot and marks it finished.
  ///
  /// If the slot has already been released (pool teardown raced the worker),
  /// the unit is handed back so the caller can drop it outside the lock.
  pub(crate) fn complete(&mut self, name: &str, task: BoxedTask) -> Option<BoxedTask> {
    match self.registry.get_mut(name) {
      Some(slot) => {
        slot.task = Some(task);
        slot.phase = TaskPhase::Finished;
        None
      }
      None => Some(task),
    }
  }

  /// Marks a live slot as waited on and returns its completion signal.
  pub(crate) fn begin_wait(&mut self, name: &str) -> Result<Arc<Condvar>, PoolError> {
    let slot = self
      .registry
      .get_mut(name)
      .ok_or_else(|| PoolError::UnknownName(name.to_string()))?;
    slot.waited = true;
    Ok(Arc::clone(&slot.done))
  }

  /// Re-checks a slot identified by both its name and its completion signal.
  pub(crate) fn check_wait(&self, name: &str, done: &Arc<Condvar>) -> WaitCheck {
    match self.registry.get(name) {
      Some(slot) if Arc::ptr_eq(&slot.done, done) => {
        if slot.is_finished() {
          WaitCheck::Finished
        } else {
          WaitCheck::Pending
        }
      }
      _ => WaitCheck::Gone,
    }
  }

  /// Removes a slot from the registry, returning its work unit.
  pub(crate) fn reclaim(&mut self, name: &str) -> Option<BoxedTask> {
    self.registry.remove(name).and_then(|slot| slot.task)
  }

  /// Empties the registry and the queue, returning every slot still present.
  pub(crate) fn release_all(&mut self) -> Vec<(TaskName, TaskSlot)> {
    self.queue.clear();
    self.registry.drain().collect()
  }

  pub(crate) fn phase_of(&self, name: &str) -> Option<TaskPhase> {
    self.registry.get(name).map(|slot| slot.phase)
  }

  pub(crate) fn queued_len(&self) -> usize {
    self.queue.len()
  }

  pub(crate) fn live_len(&self) -> usize {
    self.registry.len()
  }

  pub(crate) fn running_len(&self) -> usize {
    self
      .registry
      .values()
      .filter(|slot| slot.phase == TaskPhase::Running)
      .count()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn noop() -> BoxedTask {
    Box::new(|| {})
  }

  #[test]
  fn test_queue_dispatches_in_submission_order() {
    let mut state = PoolState::new();
    for name in ["a", "b", "c"] {
      state.enqueue(name.to_string(), noop()).unwrap();
    }
    assert_eq!(state.queued_len(), 3);

    let order: Vec<TaskName> = std::iter::from_fn(|| state.next_task().map(|d| d.name)).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
    assert_eq!(state.queued_len(), 0);
    assert_eq!(state.running_len(), 3);
  }

  #[test]
  fn test_duplicate_name_is_refused_while_live() {
    let mut state = PoolState::new();
    state.enqueue("x".to_string(), noop()).unwrap();

    let err = state.enqueue("x".to_string(), noop()).unwrap_err();
    assert_eq!(err.kind(), &PoolError::DuplicateName("x".to_string()));
    assert!(err.into_task().is_none());
    assert_eq!(state.queued_len(), 1);
    assert_eq!(state.live_len(), 1);
  }

  #[test]
  fn test_name_can_be_reused_after_reclaim() {
    let mut state = PoolState::new();
    state.enqueue("x".to_string(), noop()).unwrap();
    let dispatched = state.next_task().unwrap();
    assert!(state.complete(&dispatched.name, dispatched.task).is_none());
    assert!(state.reclaim("x").is_some());

    state.enqueue("x".to_string(), noop()).unwrap();
    assert_eq!(state.phase_of("x"), Some(TaskPhase::Queued));
  }

  #[test]
  fn test_enqueue_after_stop_hands_task_back() {
    let mut state = PoolState::new();
    state.status = PoolStatus::Stopping;

    let err = state.enqueue("late".to_string(), noop()).unwrap_err();
    assert_eq!(err.kind(), &PoolError::Rejected("late".to_string()));
    assert!(err.into_task().is_some());
    assert_eq!(state.live_len(), 0);
  }

  #[test]
  fn test_slot_lifecycle_and_wait_checks() {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut state = PoolState::new();
    let counter = runs.clone();
    state
      .enqueue(
        "t".to_string(),
        Box::new(move || {
          counter.fetch_add(1, Ordering::SeqCst);
        }),
      )
      .unwrap();

    let done = state.begin_wait("t").unwrap();
    assert_eq!(state.check_wait("t", &done), WaitCheck::Pending);

    let mut dispatched = state.next_task().unwrap();
    assert_eq!(state.phase_of("t"), Some(TaskPhase::Running));
    assert!(Arc::ptr_eq(&dispatched.done, &done));
    dispatched.task.run();
    state.complete("t", dispatched.task);

    assert_eq!(state.check_wait("t", &done), WaitCheck::Finished);
    assert!(state.reclaim("t").is_some());
    assert_eq!(state.check_wait("t", &done), WaitCheck::Gone);
    assert_eq!(
      state.begin_wait("t").unwrap_err(),
      PoolError::UnknownName("t".to_string())
    );
    assert_eq!(runs.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_wait_check_ignores_resubmitted_name() {
    let mut state = PoolState::new();
    state.enqueue("r".to_string(), noop()).unwrap();
    let stale = state.begin_wait("r").unwrap();
    let dispatched = state.next_task().unwrap();
    state.complete("r", dispatched.task);
    state.reclaim("r");

    state.enqueue("r".to_string(), noop()).unwrap();
    assert_eq!(state.check_wait("r", &stale), WaitCheck::Gone);
  }

  #[test]
  fn test_last_worker_out_marks_stopped() {
    let mut state = PoolState::new();
    state.register_worker();
    state.register_worker();
    state.status = PoolStatus::Stopping;

    assert!(state.retire_worker().is_none());
    assert_eq!(state.status, PoolStatus::Stopping);
    assert!(state.retire_worker().is_none());
    assert_eq!(state.status, PoolStatus::Stopped);
    assert_eq!(state.live_workers(), 0);
  }

  #[test]
  fn test_teardown_deferred_to_draining_worker() {
    let mut state = PoolState::new();
    state.register_worker();
    state.enqueue("queued".to_string(), noop()).unwrap();
    state.status = PoolStatus::Stopping;

    assert!(state.teardown().is_empty());
    assert_eq!(state.queued_len(), 1, "deferred teardown must not discard queued work");

    let dispatched = state.next_task().unwrap();
    state.complete(&dispatched.name, dispatched.task);
    let released = state.retire_worker().expect("last worker releases the registry");
    assert_eq!(released.len(), 1);
    assert_eq!(state.status, PoolStatus::Stopped);
    assert_eq!(state.live_len(), 0);
  }

  #[test]
  fn test_teardown_without_workers_releases_immediately() {
    let mut state = PoolState::new();
    state.enqueue("left".to_string(), noop()).unwrap();
    state.status = PoolStatus::Stopping;

    assert_eq!(state.teardown().len(), 1);
    assert_eq!(state.status, PoolStatus::Stopped);
  }

  #[test]
  fn test_complete_after_release_returns_task() {
    let mut state = PoolState::new();
    state.enqueue("orphan".to_string(), noop()).unwrap();
    state.enqueue("queued".to_string(), noop()).unwrap();
    let dispatched = state.next_task().unwrap();

    let released = state.release_all();
    assert_eq!(released.len(), 2);
    assert_eq!(state.queued_len(), 0);
    assert!(state.complete(&dispatched.name, dispatched.task).is_some());
    assert!(state.next_task().is_none());
  }
}
