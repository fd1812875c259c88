pub mod pending_sweeper;
pub mod webhook_retry;
