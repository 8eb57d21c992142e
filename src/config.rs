use std::num::NonZeroUsize;

/// Construction parameters for a [`TaskPool`](crate::TaskPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  /// Number of worker threads. Must be greater than zero.
  pub thread_count: usize,
  /// Name used in logs and worker thread names. A unique default is generated
  /// when `None`.
  pub name: Option<String>,
  /// Stack size for worker threads, in bytes. Uses the platform default when `None`.
  pub stack_size: Option<usize>,
}

impl PoolConfig {
  pub fn new(thread_count: usize) -> Self {
    Self {
      thread_count,
      name: None,
      stack_size: None,
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn with_stack_size(mut self, bytes: usize) -> Self {
    self.stack_size = Some(bytes);
    self
  }
}

impl Default for PoolConfig {
  /// One worker per available CPU.
  fn default() -> Self {
    let threads = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    Self::new(threads)
  }
}
