//! Airdrop job: batch processing and the periodic scheduler.
//!
//! ## Components
//!
//! - `BatchProcessor`: claims, mints and records up to N recipients
//! - `AirdropScheduler`: fires a batch run every tick, owns the store handle

pub mod batch;
pub mod scheduler;

pub use batch::{BatchProcessor, BatchReport, MAX_CONSECUTIVE_CLAIM_FAILURES};
pub use scheduler::{delay_until_next_tick, AirdropScheduler, SchedulerConfig, SchedulerError};
