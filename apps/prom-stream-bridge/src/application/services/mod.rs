//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - [`scheduler`]: drives one subscription through catch-up,
//!   alignment, and recurring polling
//! - [`session`]: owns the subscription map for one client connection

pub mod scheduler;
pub mod session;

pub use scheduler::{ScheduleHandle, SchedulerConfig, SubscriptionScheduler, alignment_delay};
pub use session::{Session, SessionStats};
