pub mod error;
pub mod halt;
pub mod heartbeat;
pub mod memory;
pub mod model;
pub mod queue;
pub mod reaper;
pub mod repo;
pub mod ticker;
pub mod worker;

pub use error::QueueError;
pub use halt::HaltSignal;
pub use heartbeat::{HeartbeatHandle, Heartbeater};
pub use memory::MemoryQueue;
pub use model::{Job, NewJob};
pub use queue::{JobQueue, QueueConfig, QueueGauges, Reservation, MAX_LEASE};
pub use reaper::Reaper;
pub use repo::JobsRepo;
pub use ticker::{IntervalTicker, ManualTicker, ManualTickerHandle, Ticker};
pub use worker::{worker_id, JobHandler, Worker};
