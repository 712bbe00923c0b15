//! External mint operation.
//!
//! The batch processor distinguishes two kinds of failure:
//!
//! - `Ok(MintResponse { success: false, .. })`: the service looked at the
//!   request and refused it. The recipient is marked `Error`.
//! - `Err(MintError)`: the call itself failed (transport, HTTP status, body).
//!   The claim is rolled back and the recipient stays `Pending`.

pub mod http;
pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use airdrop_core::{MintOutcome, WalletAddress};

pub use http::{HttpMinter, MintApiConfig};
pub use scripted::{MintBehavior, ScriptedMinter};

/// One mint call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintRequest {
    pub receiving_address: String,
    pub quantity: u32,
}

impl MintRequest {
    /// A single token to `wallet`.
    pub fn single(wallet: &WalletAddress) -> Self {
        Self {
            receiving_address: wallet.as_str().to_string(),
            quantity: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintResponse {
    pub success: bool,
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

impl MintResponse {
    pub fn minted(tx_hash: impl Into<String>) -> Self {
        Self {
            success: true,
            transaction_hash: Some(tx_hash.into()),
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            transaction_hash: None,
        }
    }

    /// The outcome to record on the recipient.
    ///
    /// A success without a transaction hash cannot be recorded as `Completed`
    /// and is reported as a decode failure instead.
    pub fn into_outcome(self) -> Result<MintOutcome, MintError> {
        match (self.success, self.transaction_hash) {
            (true, Some(tx_hash)) if !tx_hash.is_empty() => Ok(MintOutcome::Minted { tx_hash }),
            (true, _) => Err(MintError::Decode(
                "mint reported success without a transaction hash".to_string(),
            )),
            (false, _) => Ok(MintOutcome::Failed),
        }
    }
}

#[derive(Debug, Error)]
pub enum MintError {
    #[error("mint transport error: {0}")]
    Transport(String),

    #[error("mint service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed mint response: {0}")]
    Decode(String),

    #[error("mint error: {0}")]
    Other(String),
}

/// Mints tokens to a receiving address.
#[async_trait]
pub trait Minter: Send + Sync {
    async fn mint(&self, request: MintRequest) -> Result<MintResponse, MintError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_service_field_names() {
        let wallet = WalletAddress::parse("0xabc").unwrap();
        let json = serde_json::to_value(MintRequest::single(&wallet)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"receivingAddress": "0xabc", "quantity": 1})
        );
    }

    #[test]
    fn outcome_from_response() {
        assert_eq!(
            MintResponse::minted("0xhash").into_outcome().unwrap(),
            MintOutcome::Minted {
                tx_hash: "0xhash".to_string()
            }
        );
        assert_eq!(
            MintResponse::failed().into_outcome().unwrap(),
            MintOutcome::Failed
        );
    }

    #[test]
    fn failed_response_drops_any_hash() {
        let response = MintResponse {
            success: false,
            transaction_hash: Some("0xignored".to_string()),
        };
        assert_eq!(response.into_outcome().unwrap(), MintOutcome::Failed);
    }

    #[test]
    fn success_without_hash_is_an_error() {
        let response = MintResponse {
            success: true,
            transaction_hash: None,
        };
        assert!(matches!(response.into_outcome(), Err(MintError::Decode(_))));
        assert!(MintResponse::minted("").into_outcome().is_err());
    }
}
