//! In-process minter with scripted per-wallet results.
//!
//! Used by tests and benches.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{MintError, MintRequest, MintResponse, Minter};

/// What a scripted mint call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MintBehavior {
    /// Report success with [`ScriptedMinter::tx_hash_for`] as the hash.
    #[default]
    Succeed,
    /// Report failure (`success: false`).
    Refuse,
    /// Fail the call itself with a transport error.
    Throw,
}

#[derive(Debug, Default)]
struct Script {
    overrides: HashMap<String, MintBehavior>,
    calls: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ScriptedMinter {
    default: MintBehavior,
    delay: Option<Duration>,
    script: Mutex<Script>,
}

impl ScriptedMinter {
    pub fn new(default: MintBehavior) -> Self {
        Self {
            default,
            ..Self::default()
        }
    }

    /// Sleep this long inside every call (tokio time).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn script(&self, wallet: &str, behavior: MintBehavior) {
        self.lock().overrides.insert(wallet.to_string(), behavior);
    }

    /// Receiving addresses in call order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, wallet: &str) -> usize {
        self.lock().calls.iter().filter(|w| *w == wallet).count()
    }

    pub fn tx_hash_for(wallet: &str) -> String {
        format!("0xmint{wallet}")
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Minter for ScriptedMinter {
    async fn mint(&self, request: MintRequest) -> Result<MintResponse, MintError> {
        let behavior = {
            let mut script = self.lock();
            script.calls.push(request.receiving_address.clone());
            script
                .overrides
                .get(&request.receiving_address)
                .copied()
                .unwrap_or(self.default)
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match behavior {
            MintBehavior::Succeed => Ok(MintResponse::minted(Self::tx_hash_for(
                &request.receiving_address,
            ))),
            MintBehavior::Refuse => Ok(MintResponse::failed()),
            MintBehavior::Throw => Err(MintError::Transport(format!(
                "scripted failure for {}",
                request.receiving_address
            ))),
        }
    }
}
