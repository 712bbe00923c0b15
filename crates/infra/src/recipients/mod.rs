//! Recipient store boundary.
//!
//! The store owns the one concurrency primitive the airdrop relies on: a
//! claim locks exactly one claimable row and skips rows that other callers
//! already hold, so concurrent batch runs each receive a *different* recipient
//! instead of blocking on (or double-claiming) the same one.
//!
//! A claim is a scoped unit of work:
//!
//! - `record_outcome` writes the terminal status and commits.
//! - `release` (or simply dropping the claim) rolls back, leaving the row
//!   `Pending` and claimable again.
//!
//! ## Components
//!
//! - `RecipientStore`: store operations (claim, confirm, statistics, registration)
//! - `RecipientClaim`: a held row lock plus its transaction
//! - `InMemoryRecipientStore`: process-local store with the same claim semantics
//! - `PostgresRecipientStore`: sqlx/Postgres store using `FOR UPDATE SKIP LOCKED`

pub mod in_memory;
pub mod postgres;
pub mod schema;

use async_trait::async_trait;
use thiserror::Error;

use airdrop_core::{
    AirdropStatistics, DomainError, MintOutcome, Recipient, RecipientId, WalletAddress,
};

pub use in_memory::{InMemoryClaim, InMemoryRecipientStore};
pub use postgres::{PostgresClaim, PostgresConnector, PostgresRecipientStore};

/// Recipient store operation error.
///
/// Every variant is local to the operation that produced it: a failed claim
/// or write never poisons the store for the next caller.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("wallet already registered: {0}")]
    DuplicateWallet(String),

    #[error("recipient not found: {0}")]
    NotFound(RecipientId),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable table of airdrop recipients.
#[async_trait]
pub trait RecipientStore: Send + Sync {
    /// Claim guard handed out by `claim_one_pending`.
    type Claim: RecipientClaim;

    /// Insert a new recipient (`Unconfirmed`, `Active`).
    ///
    /// Fails with `DuplicateWallet` when the address is already registered,
    /// whatever that row's status.
    async fn register(&self, wallet: WalletAddress) -> Result<Recipient, StoreError>;

    async fn get(&self, id: RecipientId) -> Result<Option<Recipient>, StoreError>;

    async fn find_by_wallet(&self, wallet: &WalletAddress)
    -> Result<Option<Recipient>, StoreError>;

    /// Flip the record to `Inactive`. Inactive rows are never confirmed or claimed.
    async fn deactivate(&self, id: RecipientId) -> Result<Recipient, StoreError>;

    /// Lock one `Pending` + `Active` row, skipping rows locked by others and
    /// any id in `exclude`.
    ///
    /// Rows are offered oldest registration first. `Ok(None)` means nothing
    /// is claimable right now.
    async fn claim_one_pending(
        &self,
        exclude: &[RecipientId],
    ) -> Result<Option<Self::Claim>, StoreError>;

    /// Move every `Unconfirmed` + `Active` row to `Pending` in one statement.
    ///
    /// Returns the number of rows changed.
    async fn confirm_all(&self) -> Result<u64, StoreError>;

    async fn statistics(&self) -> Result<AirdropStatistics, StoreError>;

    /// Release the underlying resource (connection pool).
    async fn close(&self) {}
}

/// Establishes the store handle that a scheduler shares across batch runs.
#[async_trait]
pub trait StoreConnector: Send + Sync + 'static {
    type Store: RecipientStore + 'static;

    async fn connect(&self) -> Result<Self::Store, StoreError>;
}

/// An exclusively held recipient row.
#[async_trait]
pub trait RecipientClaim: Send + Sized {
    /// Snapshot of the row as it was when claimed.
    fn recipient(&self) -> &Recipient;

    /// Write the terminal status and commit.
    ///
    /// On error the claim's transaction is rolled back and the row stays `Pending`.
    async fn record_outcome(self, outcome: &MintOutcome) -> Result<Recipient, StoreError>;

    /// Roll back without writing anything.
    async fn release(self) -> Result<(), StoreError>;
}
