//! Daemon subsystem: scheduled scan job, live session, alerting, notification
//! channels, signal handling and the main loop.

pub mod alerts;
pub mod job;
#[cfg(feature = "daemon")]
pub mod loop_main;
pub mod notifications;
pub mod scheduler;
pub mod session;
#[cfg(feature = "daemon")]
pub mod signals;
pub mod state;
