//! Airdrop status lifecycle.
//!
//! ```text
//! Unconfirmed --confirm_all--> Pending --mint ok--> Completed
//!                                      \--mint failed--> Error
//! ```
//!
//! `Completed` and `Error` are terminal: nothing automated leaves them.
//! Only a claimable row (`Pending` + `Active`) is ever handed to the minter;
//! rows in any other state are filtered out by the claim predicate rather
//! than rejected with an error.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Where a recipient is in the airdrop pipeline.
///
/// The numeric codes are the persisted representation and must not change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AirdropStatus {
    /// Registered, waiting for an administrator to confirm the list.
    Unconfirmed,
    /// Confirmed and eligible for minting.
    Pending,
    /// Mint succeeded.
    Completed,
    /// Mint reported failure.
    Error,
}

impl AirdropStatus {
    pub const ALL: [AirdropStatus; 4] = [
        AirdropStatus::Unconfirmed,
        AirdropStatus::Pending,
        AirdropStatus::Completed,
        AirdropStatus::Error,
    ];

    pub fn code(self) -> i16 {
        match self {
            AirdropStatus::Unconfirmed => 1,
            AirdropStatus::Pending => 2,
            AirdropStatus::Completed => 3,
            AirdropStatus::Error => 4,
        }
    }

    pub fn from_code(code: i16) -> DomainResult<Self> {
        match code {
            1 => Ok(AirdropStatus::Unconfirmed),
            2 => Ok(AirdropStatus::Pending),
            3 => Ok(AirdropStatus::Completed),
            4 => Ok(AirdropStatus::Error),
            other => Err(DomainError::UnknownStatus(other)),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AirdropStatus::Completed | AirdropStatus::Error)
    }

    /// Whether the lifecycle has an edge `self -> next`.
    pub fn can_transition_to(self, next: AirdropStatus) -> bool {
        matches!(
            (self, next),
            (AirdropStatus::Unconfirmed, AirdropStatus::Pending)
                | (AirdropStatus::Pending, AirdropStatus::Completed)
                | (AirdropStatus::Pending, AirdropStatus::Error)
        )
    }

    /// Validate a transition, returning the new status.
    pub fn transition_to(self, next: AirdropStatus) -> DomainResult<AirdropStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

/// Record lifecycle flag, independent of the airdrop status.
///
/// Codes follow the shared model status table (`Inactive = 3`, `Active = 5`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    #[default]
    Active,
    Inactive,
}

impl RecordStatus {
    pub fn code(self) -> i16 {
        match self {
            RecordStatus::Inactive => 3,
            RecordStatus::Active => 5,
        }
    }

    pub fn from_code(code: i16) -> DomainResult<Self> {
        match code {
            3 => Ok(RecordStatus::Inactive),
            5 => Ok(RecordStatus::Active),
            other => Err(DomainError::UnknownStatus(other)),
        }
    }
}

/// A row is claimable iff it is pending and active.
pub fn is_claimable(airdrop: AirdropStatus, record: RecordStatus) -> bool {
    airdrop == AirdropStatus::Pending && record == RecordStatus::Active
}
