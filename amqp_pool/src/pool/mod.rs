//! Channel pool and the task scheduler running on top of it.
mod channel_pool;
mod task_pool;
mod task_queue;

pub use channel_pool::*;
pub use task_pool::*;
pub use task_queue::*;
