//! Mail Spool: durable outbound email and SMS queue.

pub mod config;
pub mod error;
pub mod scheduler;
pub mod sms;
pub mod spool;
pub mod store;
pub mod transport;
