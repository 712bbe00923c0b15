//! Airdrop recipient record and the outcome of a mint attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::RecipientId;
use crate::status::{self, AirdropStatus, RecordStatus};

/// Longest wallet address the store accepts.
pub const WALLET_MAX_LEN: usize = 80;

/// Receiving wallet address.
///
/// Only the shape is checked here (non-empty, bounded, ASCII alphanumeric).
/// Chain-specific validation (checksums, SS58 prefixes) is the registration
/// flow's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn parse(raw: impl Into<String>) -> DomainResult<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("wallet address is empty"));
        }
        if trimmed.len() > WALLET_MAX_LEN {
            return Err(DomainError::validation(format!(
                "wallet address longer than {WALLET_MAX_LEN} characters"
            )));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::validation(
                "wallet address must be ASCII alphanumeric",
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

/// Result of one mint attempt, as recorded on the recipient row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MintOutcome {
    /// The mint service reported success with this transaction hash.
    Minted { tx_hash: String },
    /// The mint service reported failure. Error rows never keep a hash.
    Failed,
}

impl MintOutcome {
    pub fn status(&self) -> AirdropStatus {
        match self {
            MintOutcome::Minted { .. } => AirdropStatus::Completed,
            MintOutcome::Failed => AirdropStatus::Error,
        }
    }

    pub fn tx_hash(&self) -> Option<&str> {
        match self {
            MintOutcome::Minted { tx_hash } => Some(tx_hash),
            MintOutcome::Failed => None,
        }
    }
}

/// A persisted airdrop recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub wallet: WalletAddress,
    /// Set only when `airdrop_status == Completed`.
    pub tx_hash: Option<String>,
    pub airdrop_status: AirdropStatus,
    pub record_status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Recipient {
    /// A freshly registered recipient: unconfirmed, active, no hash.
    pub fn register(wallet: WalletAddress, now: DateTime<Utc>) -> Self {
        Self {
            id: RecipientId::new(),
            wallet,
            tx_hash: None,
            airdrop_status: AirdropStatus::Unconfirmed,
            record_status: RecordStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_claimable(&self) -> bool {
        status::is_claimable(self.airdrop_status, self.record_status)
    }

    /// Administrative confirmation (`Unconfirmed -> Pending`).
    pub fn confirm(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.airdrop_status = self.airdrop_status.transition_to(AirdropStatus::Pending)?;
        self.updated_at = now;
        Ok(())
    }

    /// Record a terminal mint outcome (`Pending -> Completed | Error`).
    pub fn apply_outcome(&mut self, outcome: &MintOutcome, now: DateTime<Utc>) -> DomainResult<()> {
        self.airdrop_status = self.airdrop_status.transition_to(outcome.status())?;
        self.tx_hash = outcome.tx_hash().map(str::to_string);
        self.updated_at = now;
        Ok(())
    }
}
