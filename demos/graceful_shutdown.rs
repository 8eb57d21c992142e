use thread_orchestra::{PoolConfig, TaskPool};
use std::thread;
use std::time::Duration;
use tracing::info;

fn work_task_fn(id: usize, duration_ms: u64) -> impl FnMut() + Send + 'static {
  move || {
    info!("Task {} starting (will run for {}ms)", id, duration_ms);
    thread::sleep(Duration::from_millis(duration_ms));
    info!("Task {} finished", id);
  }
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Graceful Shutdown Example ---");

  let pool = TaskPool::with_config(PoolConfig::new(2).with_name("graceful_shutdown_pool"))
    .expect("pool with two workers");

  // Tasks 0 and 1 start immediately; 2, 3 and 4 are queued.
  for i in 0..5 {
    if let Err(e) = pool.submit(format!("task-{}", i), work_task_fn(i, 500)) {
      tracing::error!("Failed to submit task {}: {}", i, e);
    }
  }

  thread::sleep(Duration::from_millis(100));
  info!(
    "Queue size: {}, Running: {}",
    pool.queued_task_count(),
    pool.running_task_count()
  );

  info!("Calling stop(). Queued tasks still run before workers exit.");
  pool.stop();
  info!(
    "Stop returned. Status: {:?}, unreclaimed tasks: {}",
    pool.status(),
    pool.live_task_count()
  );

  // Finished tasks can still be reclaimed after stop; the rest are released on drop.
  pool.wait("task-0").expect("task-0 is still live");
  info!("--- Graceful Shutdown Example Finished ---");
}
