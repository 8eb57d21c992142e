//! A fixed-size thread pool for named tasks, with exactly-once waiting by name
//! and a stop that drains queued work before joining the workers.

mod config;
mod error;
mod manager;
mod task;
mod task_queue;

pub use config::PoolConfig;
pub use error::{PoolError, SubmitError};
pub use manager::TaskPool;
pub use task::{BoxedTask, Task, TaskName, TaskPhase};
pub use task_queue::PoolStatus;
