//! Foundational low-level utilities shared across Recall crates.
//!
//! Provides time helpers, cooperative cancellation, the bounded verification
//! polling loop used for read-after-write checks, and tracing setup.

pub mod cancellation;
pub mod logging;
pub mod polling;
pub mod time_utils;

pub use cancellation::CooperativeCancellationToken;
pub use logging::init_tracing;
pub use polling::{
    poll_until, PollClock, PollOutcome, PollPolicy, TokioPollClock, VirtualPollClock,
};
pub use time_utils::{
    current_unix_timestamp, current_unix_timestamp_ms, utc_date_stamp, utc_date_stamp_for,
};
