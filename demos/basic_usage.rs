use thread_orchestra::{PoolConfig, Task, TaskPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

struct SleepTask {
  ms: u64,
}

impl Task for SleepTask {
  fn run(&mut self) {
    info!("Sleeping for {}ms", self.ms);
    thread::sleep(Duration::from_millis(self.ms));
  }
}

// Forces concurrent start: every task waits until `total` peers have started.
struct BarrierTask {
  started: Arc<AtomicUsize>,
  total: usize,
  work_ms: u64,
}

impl Task for BarrierTask {
  fn run(&mut self) {
    let now = self.started.fetch_add(1, Ordering::SeqCst) + 1;
    info!("Barrier task started ({}/{})", now, self.total);
    while self.started.load(Ordering::SeqCst) < self.total {
      thread::sleep(Duration::from_millis(1));
    }
    thread::sleep(Duration::from_millis(self.work_ms));
  }
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_thread_names(true)
    .init();
  info!("--- Basic Usage Example ---");

  let pool = match TaskPool::with_config(PoolConfig::new(5).with_name("basic_usage_pool")) {
    Ok(pool) => pool,
    Err(e) => {
      tracing::error!("Failed to start pool: {}", e);
      return;
    }
  };

  let start = Instant::now();
  for name in ["first", "second", "third", "fourth"] {
    pool.submit(name, SleepTask { ms: 300 }).unwrap();
  }

  let started = Arc::new(AtomicUsize::new(0));
  for name in ["b0", "b1", "b2"] {
    let task = BarrierTask {
      started: started.clone(),
      total: 3,
      work_ms: 200,
    };
    pool.submit(name, task).unwrap();
  }

  for name in ["first", "second", "third", "fourth", "b0", "b1", "b2"] {
    pool.wait(name).unwrap();
    info!("Task {} reclaimed after {:?}", name, start.elapsed());
  }

  pool.stop();

  match pool.submit("after-stop", SleepTask { ms: 10 }) {
    Ok(()) => info!("Unexpected: submission accepted after stop"),
    Err(e) => {
      info!("Submission after stop refused: {}", e);
      info!("Task handed back to caller: {}", e.into_task().is_some());
    }
  }
  info!("--- Basic Usage Example Finished ---");
}
