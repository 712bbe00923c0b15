//! `airdrop-core` — domain building blocks for the airdrop scheduler.
//!
//! This crate contains **pure domain** types (no storage or transport concerns).

pub mod error;
pub mod id;
pub mod recipient;
pub mod statistics;
pub mod status;

pub use error::{DomainError, DomainResult};
pub use id::RecipientId;
pub use recipient::{MintOutcome, Recipient, WalletAddress, WALLET_MAX_LEN};
pub use statistics::AirdropStatistics;
pub use status::{AirdropStatus, RecordStatus};
