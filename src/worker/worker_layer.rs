// Worker layer - drives the moderation service from the queue.

#[path = "queue_worker.rs"]
pub mod queue_worker;

pub use queue_worker::QueueWorker;
