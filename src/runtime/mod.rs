//! Task orchestration: blocking queues, the worker pool and the decode task
//! that ties the search core to streaming audio.

pub mod pool;
pub mod queue;
pub mod resources;
pub mod task;

pub use pool::{PoolTask, WorkerPool};
pub use queue::MessageQueue;
pub use resources::{DecodeResources, SpeechResources};
pub use task::DecodeTask;
