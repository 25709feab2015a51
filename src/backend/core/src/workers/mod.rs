//! The server's long-running loops.
//!
//! A server hosts exactly one scheduled-job dispatcher and one heartbeat
//! loop, plus a configured number of job processor loops. All loops run as
//! independent tokio tasks, cooperate around the server's single shutdown
//! token (checked at iteration boundaries), and treat any other failure as
//! log-and-continue.

pub mod heartbeat;
pub mod processor;
pub mod scheduler;

pub use heartbeat::ServerHeartbeatWorker;
pub use processor::JobProcessorWorker;
pub use scheduler::ScheduledJobDispatcherWorker;
