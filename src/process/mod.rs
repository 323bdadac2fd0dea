//! Master/worker process group: protocol, workers, the group handle and the
//! coordinator that drives a run.

pub mod group;
pub mod master;
pub mod protocol;
pub mod worker;

pub use group::{shard_ranges, ProcessGroup, ProcessGroupError};
pub use master::{Coordinator, CoordinatorError, CoordinatorState, ShutdownReport};
pub use protocol::{Command, Message, Shard, ShardResult};
pub use worker::{Worker, WorkerReport};
