//! Background Tasks Module
//!
//! Contains background tasks that run periodically while the core is live.
//!
//! # Tasks
//! - Notification polling: fetches a user's feed at the configured period

mod poll;

pub use poll::spawn_poll_task;
