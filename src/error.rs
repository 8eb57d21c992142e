use crate::task::BoxedTask;

use std::fmt;

use thiserror::Error;

/// Errors that can occur within the `thread_orchestra` pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("Thread count must be greater than zero, got {0}")]
  InvalidThreadCount(usize),

  #[error("Failed to spawn pool worker thread: {0}")]
  WorkerSpawn(String),

  #[error("A task named '{0}' is already live in the pool")]
  DuplicateName(String),

  #[error("No live task named '{0}' (never submitted or already waited on)")]
  UnknownName(String),

  #[error("Pool is stopping or already stopped, task '{0}' was rejected")]
  Rejected(String),

  #[error("Async wait for task could not be joined: {0}")]
  WaitAborted(String),
}

/// Error returned by [`TaskPool::submit`](crate::TaskPool::submit).
///
/// When the pool refused the task without taking ownership of it (the pool is
/// stopping), the work unit travels back to the caller and can be recovered with
/// [`SubmitError::into_task`]. A task rejected for a duplicate name is dropped.
#[derive(Error)]
#[error("{error}")]
pub struct SubmitError {
  error: PoolError,
  task: Option<BoxedTask>,
}

impl SubmitError {
  pub(crate) fn duplicate(name: String) -> Self {
    Self {
      error: PoolError::DuplicateName(name),
      task: None,
    }
  }

  pub(crate) fn rejected(name: String, task: BoxedTask) -> Self {
    Self {
      error: PoolError::Rejected(name),
      task: Some(task),
    }
  }

  /// The underlying pool error.
  pub fn kind(&self) -> &PoolError {
    &self.error
  }

  /// Returns the work unit if the pool handed it back.
  pub fn into_task(self) -> Option<BoxedTask> {
    self.task
  }
}

impl fmt::Debug for SubmitError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SubmitError")
      .field("error", &self.error)
      .field("task_returned", &self.task.is_some())
      .finish()
  }
}

impl From<SubmitError> for PoolError {
  fn from(err: SubmitError) -> Self {
    err.error
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_rejected_submit_error_returns_task() {
    let err = SubmitError::rejected("late".to_string(), Box::new(|| {}));
    assert_eq!(err.kind(), &PoolError::Rejected("late".to_string()));
    assert_eq!(
      err.to_string(),
      "Pool is stopping or already stopped, task 'late' was rejected"
    );
    assert!(err.into_task().is_some());
  }

  #[test]
  fn test_duplicate_submit_error_drops_task() {
    let err = SubmitError::duplicate("x".to_string());
    assert!(format!("{:?}", err).contains("task_returned: false"));
    let pool_error: PoolError = err.into();
    assert_eq!(pool_error, PoolError::DuplicateName("x".to_string()));
  }
}
