//! Concurrency and scheduling engine for the messaging gateway.
//!
//! - [`WorkerPool`]: fixed set of OS threads draining a shared FIFO queue
//! - [`MessageScheduler`]: holds deferred deliveries until due, then hands
//!   them to the pool
//! - [`MessagingService`]: validation, persistence and the
//!   send-now-or-later decision on top of both

pub mod delivery;
pub mod error;
pub mod pool;
pub mod scheduler;
pub mod service;

pub use delivery::{Delivery, DeliveryReport};
pub use error::{PoolError, SchedulerError, ServiceError};
pub use pool::{TaskHandle, WorkerPool};
pub use scheduler::{MessageScheduler, ScheduleOutcome};
pub use service::{InboundMessage, InboundReceipt, MessagingService, OutboundMessage, SendReceipt, SendStatus};
pub use switchboard_core::config::MalformedTimePolicy;
