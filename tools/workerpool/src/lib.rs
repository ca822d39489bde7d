//! A bounded worker pool plus the synchronization primitives the
//! compilator and image builder share: cancellation, per-key done
//! broadcasts, and dependency-depth scheduling (§5).

mod cancellation;
mod done_broadcast;
mod pool;
mod schedule;

pub use cancellation::Cancellation;
pub use done_broadcast::{DoneBroadcasts, Outcome, WaitOutcome};
pub use pool::Pool;
pub use schedule::order_by_depth;
