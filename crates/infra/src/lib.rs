//! Infrastructure layer: recipient storage, mint client, scheduling, config.

pub mod config;
pub mod jobs;
pub mod mint;
pub mod recipients;

pub use config::{AirdropConfig, ConfigError, DatabaseConfig};
pub use jobs::{AirdropScheduler, BatchProcessor, BatchReport, SchedulerConfig, SchedulerError};
pub use mint::{HttpMinter, MintApiConfig, MintError, MintRequest, MintResponse, Minter};
pub use recipients::{
    InMemoryRecipientStore, PostgresConnector, PostgresRecipientStore, RecipientClaim,
    RecipientStore, StoreConnector, StoreError,
};
