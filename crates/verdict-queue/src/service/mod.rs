//! Service layer: the queue handle and its worker task.

mod queue;
mod worker;

pub use queue::VerdictQueue;
