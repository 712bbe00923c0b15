//! One bounded batch of claim → mint → record.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use airdrop_core::{MintOutcome, RecipientId};

use crate::mint::{MintRequest, MintResponse, Minter};
use crate::recipients::{RecipientClaim, RecipientStore};

/// Counters for one batch run.
///
/// `processed` counts every claim attempt that was not "nothing left",
/// including ones that rolled back. `completed + errored + rolled_back`
/// can be less than `processed` when a claim itself failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub completed: usize,
    pub errored: usize,
    pub rolled_back: usize,
}

/// Claim errors in a row after which a run gives up until the next tick.
pub const MAX_CONSECUTIVE_CLAIM_FAILURES: usize = 3;

/// Drains up to `max_items` claimable recipients through the minter.
pub struct BatchProcessor<S, M> {
    store: Arc<S>,
    minter: Arc<M>,
}

impl<S, M> BatchProcessor<S, M>
where
    S: RecipientStore,
    M: Minter,
{
    pub fn new(store: Arc<S>, minter: Arc<M>) -> Self {
        Self { store, minter }
    }

    /// Process at most `max_items` recipients, one transaction each.
    ///
    /// Never fails as a whole: every per-item failure is logged and the loop
    /// moves on. A recipient claimed in this run is not offered again in the
    /// same run, even if its claim was rolled back. After
    /// [`MAX_CONSECUTIVE_CLAIM_FAILURES`] claim errors in a row the run ends
    /// early, since the store is most likely unreachable.
    #[instrument(skip(self, max_items), fields(batch_size = max_items))]
    pub async fn run_batch(&self, max_items: usize) -> BatchReport {
        let mut report = BatchReport::default();
        let mut attempted: Vec<RecipientId> = Vec::new();
        let mut claim_failures = 0;

        while report.processed < max_items {
            let claim = match self.store.claim_one_pending(&attempted).await {
                Ok(Some(claim)) => claim,
                Ok(None) => {
                    debug!("no claimable recipients left");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "claim failed");
                    report.processed += 1;
                    claim_failures += 1;
                    if claim_failures >= MAX_CONSECUTIVE_CLAIM_FAILURES {
                        error!(claim_failures, "recipient store keeps failing; ending run early");
                        break;
                    }
                    continue;
                }
            };
            claim_failures = 0;

            let recipient = claim.recipient().clone();
            attempted.push(recipient.id);

            let minted = self
                .minter
                .mint(MintRequest::single(&recipient.wallet))
                .await
                .and_then(MintResponse::into_outcome);

            let outcome = match minted {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        recipient_id = %recipient.id,
                        wallet = %recipient.wallet,
                        error = %e,
                        "mint call failed; recipient left pending"
                    );
                    if let Err(e) = claim.release().await {
                        warn!(recipient_id = %recipient.id, error = %e, "rollback failed");
                    }
                    report.rolled_back += 1;
                    report.processed += 1;
                    continue;
                }
            };

            match claim.record_outcome(&outcome).await {
                Ok(_) => match &outcome {
                    MintOutcome::Minted { tx_hash } => {
                        info!(
                            recipient_id = %recipient.id,
                            wallet = %recipient.wallet,
                            tx_hash = %tx_hash,
                            "airdrop completed"
                        );
                        report.completed += 1;
                    }
                    MintOutcome::Failed => {
                        warn!(
                            recipient_id = %recipient.id,
                            wallet = %recipient.wallet,
                            "mint refused; recipient marked as error"
                        );
                        report.errored += 1;
                    }
                },
                Err(e) => {
                    match &outcome {
                        // The token exists on chain but the row still says Pending.
                        MintOutcome::Minted { tx_hash } => error!(
                            recipient_id = %recipient.id,
                            wallet = %recipient.wallet,
                            tx_hash = %tx_hash,
                            error = %e,
                            "minted but failed to record outcome; reconcile manually"
                        ),
                        MintOutcome::Failed => warn!(
                            recipient_id = %recipient.id,
                            wallet = %recipient.wallet,
                            error = %e,
                            "failed to record mint refusal; recipient left pending"
                        ),
                    }
                    report.rolled_back += 1;
                }
            }

            report.processed += 1;
        }

        info!(
            processed = report.processed,
            completed = report.completed,
            errored = report.errored,
            rolled_back = report.rolled_back,
            "batch finished"
        );
        report
    }
}
