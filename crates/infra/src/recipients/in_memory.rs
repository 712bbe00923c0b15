//! In-memory recipient store for tests/dev.
//!
//! Mirrors the Postgres claim semantics: a claimed row is marked locked until
//! the claim records an outcome or is released/dropped, and other claimers
//! skip locked rows instead of waiting on them.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use airdrop_core::{
    AirdropStatistics, AirdropStatus, MintOutcome, Recipient, RecipientId, RecordStatus,
    WalletAddress,
};

use super::{RecipientClaim, RecipientStore, StoreConnector, StoreError};

#[derive(Debug, Default)]
struct State {
    // Keyed by UUIDv7 id, so iteration order is registration order.
    rows: BTreeMap<RecipientId, Recipient>,
    locked: HashSet<RecipientId>,
    failing_writes: usize,
    closed: bool,
    connects: usize,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-local recipient store.
///
/// Clones share the same rows, so a clone can stand in for "another
/// connection" in concurrency tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecipientStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryRecipientStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row verbatim (any status), e.g. to seed a test fixture.
    pub fn seed(&self, recipient: Recipient) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        if state.rows.values().any(|r| r.wallet == recipient.wallet) {
            return Err(StoreError::DuplicateWallet(recipient.wallet.to_string()));
        }
        state.rows.insert(recipient.id, recipient);
        Ok(())
    }

    /// Make the next `n` outcome writes fail as if the database rejected them.
    pub fn fail_next_writes(&self, n: usize) {
        lock(&self.state).failing_writes = n;
    }

    /// All rows in registration order.
    pub fn snapshot(&self) -> Vec<Recipient> {
        lock(&self.state).rows.values().cloned().collect()
    }

    /// Number of rows currently held by an open claim.
    pub fn locked_count(&self) -> usize {
        lock(&self.state).locked.len()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// How many times a scheduler has connected to this store.
    pub fn connect_count(&self) -> usize {
        lock(&self.state).connects
    }

    fn ensure_open(state: &State) -> Result<(), StoreError> {
        if state.closed {
            Err(StoreError::Connection("store is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecipientStore for InMemoryRecipientStore {
    type Claim = InMemoryClaim;

    async fn register(&self, wallet: WalletAddress) -> Result<Recipient, StoreError> {
        let recipient = Recipient::register(wallet, Utc::now());
        {
            let state = lock(&self.state);
            Self::ensure_open(&state)?;
        }
        self.seed(recipient.clone())?;
        Ok(recipient)
    }

    async fn get(&self, id: RecipientId) -> Result<Option<Recipient>, StoreError> {
        let state = lock(&self.state);
        Self::ensure_open(&state)?;
        Ok(state.rows.get(&id).cloned())
    }

    async fn find_by_wallet(
        &self,
        wallet: &WalletAddress,
    ) -> Result<Option<Recipient>, StoreError> {
        let state = lock(&self.state);
        Self::ensure_open(&state)?;
        Ok(state.rows.values().find(|r| &r.wallet == wallet).cloned())
    }

    async fn deactivate(&self, id: RecipientId) -> Result<Recipient, StoreError> {
        let mut state = lock(&self.state);
        Self::ensure_open(&state)?;
        let row = state.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        row.record_status = RecordStatus::Inactive;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn claim_one_pending(
        &self,
        exclude: &[RecipientId],
    ) -> Result<Option<InMemoryClaim>, StoreError> {
        let mut state = lock(&self.state);
        Self::ensure_open(&state)?;

        let candidate = state
            .rows
            .values()
            .find(|r| r.is_claimable() && !state.locked.contains(&r.id) && !exclude.contains(&r.id))
            .cloned();

        Ok(candidate.map(|recipient| {
            state.locked.insert(recipient.id);
            InMemoryClaim {
                state: Arc::clone(&self.state),
                recipient,
                finished: false,
            }
        }))
    }

    async fn confirm_all(&self) -> Result<u64, StoreError> {
        let mut state = lock(&self.state);
        Self::ensure_open(&state)?;
        let now = Utc::now();
        let mut confirmed = 0;
        for row in state.rows.values_mut() {
            if row.record_status == RecordStatus::Active
                && row.airdrop_status == AirdropStatus::Unconfirmed
            {
                row.confirm(now)?;
                confirmed += 1;
            }
        }
        Ok(confirmed)
    }

    async fn statistics(&self) -> Result<AirdropStatistics, StoreError> {
        let state = lock(&self.state);
        Self::ensure_open(&state)?;
        Ok(state.rows.values().map(|r| r.airdrop_status).collect())
    }

    async fn close(&self) {
        lock(&self.state).closed = true;
    }
}

#[async_trait]
impl StoreConnector for InMemoryRecipientStore {
    type Store = InMemoryRecipientStore;

    async fn connect(&self) -> Result<InMemoryRecipientStore, StoreError> {
        let mut state = lock(&self.state);
        state.closed = false;
        state.connects += 1;
        Ok(self.clone())
    }
}

/// Claim on an in-memory row. Dropping it without recording releases the lock.
#[derive(Debug)]
pub struct InMemoryClaim {
    state: Arc<Mutex<State>>,
    recipient: Recipient,
    finished: bool,
}

#[async_trait]
impl RecipientClaim for InMemoryClaim {
    fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    async fn record_outcome(mut self, outcome: &MintOutcome) -> Result<Recipient, StoreError> {
        let id = self.recipient.id;
        let mut state = lock(&self.state);
        state.locked.remove(&id);
        self.finished = true;

        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(StoreError::Storage(format!(
                "injected write failure for recipient {id}"
            )));
        }

        // Apply to a copy so a rejected transition leaves the row untouched.
        let current = state.rows.get(&id).ok_or(StoreError::NotFound(id))?;
        let mut updated = current.clone();
        updated.apply_outcome(outcome, Utc::now())?;
        state.rows.insert(id, updated.clone());
        Ok(updated)
    }

    async fn release(mut self) -> Result<(), StoreError> {
        lock(&self.state).locked.remove(&self.recipient.id);
        self.finished = true;
        Ok(())
    }
}

impl Drop for InMemoryClaim {
    fn drop(&mut self) {
        if !self.finished {
            lock(&self.state).locked.remove(&self.recipient.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(s: &str) -> WalletAddress {
        WalletAddress::parse(s).unwrap()
    }

    fn recipient_with(store: &InMemoryRecipientStore, w: &str, status: AirdropStatus) -> Recipient {
        let mut r = Recipient::register(wallet(w), Utc::now());
        r.airdrop_status = status;
        if status == AirdropStatus::Completed {
            r.tx_hash = Some(format!("0xtx{w}"));
        }
        store.seed(r.clone()).unwrap();
        r
    }

    #[tokio::test]
    async fn register_rejects_duplicate_wallet() {
        let store = InMemoryRecipientStore::new();
        store.register(wallet("0xaaa")).await.unwrap();
        let err = store.register(wallet("0xaaa")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateWallet(w) if w == "0xaaa"));
    }

    #[tokio::test]
    async fn claim_skips_rows_held_by_other_claims() {
        let store = InMemoryRecipientStore::new();
        let a = recipient_with(&store, "0xa", AirdropStatus::Pending);
        let b = recipient_with(&store, "0xb", AirdropStatus::Pending);

        let first = store.claim_one_pending(&[]).await.unwrap().unwrap();
        let second = store.claim_one_pending(&[]).await.unwrap().unwrap();
        assert_ne!(first.recipient().id, second.recipient().id);
        let claimed: HashSet<_> = [first.recipient().id, second.recipient().id].into();
        assert_eq!(claimed, HashSet::from([a.id, b.id]));

        assert!(store.claim_one_pending(&[]).await.unwrap().is_none());
        assert_eq!(store.locked_count(), 2);
    }

    #[tokio::test]
    async fn claim_ignores_non_pending_and_inactive_rows() {
        let store = InMemoryRecipientStore::new();
        recipient_with(&store, "0xu", AirdropStatus::Unconfirmed);
        recipient_with(&store, "0xc", AirdropStatus::Completed);
        recipient_with(&store, "0xe", AirdropStatus::Error);
        let inactive = recipient_with(&store, "0xi", AirdropStatus::Pending);
        store.deactivate(inactive.id).await.unwrap();

        assert!(store.claim_one_pending(&[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_honours_exclusions() {
        let store = InMemoryRecipientStore::new();
        let a = recipient_with(&store, "0xa", AirdropStatus::Pending);
        assert!(store.claim_one_pending(&[a.id]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dropping_a_claim_releases_the_row() {
        let store = InMemoryRecipientStore::new();
        let a = recipient_with(&store, "0xa", AirdropStatus::Pending);

        let claim = store.claim_one_pending(&[]).await.unwrap().unwrap();
        drop(claim);
        assert_eq!(store.locked_count(), 0);

        let again = store.claim_one_pending(&[]).await.unwrap().unwrap();
        assert_eq!(again.recipient().id, a.id);
        again.release().await.unwrap();
        assert_eq!(store.get(a.id).await.unwrap().unwrap().airdrop_status, AirdropStatus::Pending);
    }

    #[tokio::test]
    async fn record_outcome_commits_terminal_status() {
        let store = InMemoryRecipientStore::new();
        let a = recipient_with(&store, "0xa", AirdropStatus::Pending);

        let claim = store.claim_one_pending(&[]).await.unwrap().unwrap();
        let updated = claim
            .record_outcome(&MintOutcome::Minted { tx_hash: "0xhash".into() })
            .await
            .unwrap();
        assert_eq!(updated.airdrop_status, AirdropStatus::Completed);
        assert_eq!(updated.tx_hash.as_deref(), Some("0xhash"));
        assert_eq!(store.get(a.id).await.unwrap().unwrap(), updated);
        assert_eq!(store.locked_count(), 0);
    }

    #[tokio::test]
    async fn failed_write_rolls_back_to_pending() {
        let store = InMemoryRecipientStore::new();
        let a = recipient_with(&store, "0xa", AirdropStatus::Pending);
        store.fail_next_writes(1);

        let claim = store.claim_one_pending(&[]).await.unwrap().unwrap();
        let err = claim.record_outcome(&MintOutcome::Failed).await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));

        let row = store.get(a.id).await.unwrap().unwrap();
        assert_eq!(row.airdrop_status, AirdropStatus::Pending);
        assert_eq!(row.tx_hash, None);
        assert!(store.claim_one_pending(&[]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn confirm_all_only_touches_active_unconfirmed_rows() {
        let store = InMemoryRecipientStore::new();
        let u1 = recipient_with(&store, "0xu1", AirdropStatus::Unconfirmed);
        let u2 = recipient_with(&store, "0xu2", AirdropStatus::Unconfirmed);
        let inactive = recipient_with(&store, "0xu3", AirdropStatus::Unconfirmed);
        store.deactivate(inactive.id).await.unwrap();
        let p = recipient_with(&store, "0xp", AirdropStatus::Pending);
        let c = recipient_with(&store, "0xc", AirdropStatus::Completed);
        let e = recipient_with(&store, "0xe", AirdropStatus::Error);

        let before: Vec<_> = [p.id, c.id, e.id]
            .iter()
            .map(|id| store.snapshot().into_iter().find(|r| r.id == *id).unwrap())
            .collect();

        assert_eq!(store.confirm_all().await.unwrap(), 2);

        for id in [u1.id, u2.id] {
            let recipient = store.get(id).await.unwrap().unwrap();
            assert_eq!(recipient.airdrop_status, AirdropStatus::Pending);
        }
        assert_eq!(
            store.get(inactive.id).await.unwrap().unwrap().airdrop_status,
            AirdropStatus::Unconfirmed
        );
        for row in before {
            assert_eq!(store.get(row.id).await.unwrap().unwrap(), row);
        }
    }

    #[tokio::test]
    async fn statistics_count_every_row() {
        let store = InMemoryRecipientStore::new();
        recipient_with(&store, "0x1", AirdropStatus::Unconfirmed);
        recipient_with(&store, "0x2", AirdropStatus::Pending);
        recipient_with(&store, "0x3", AirdropStatus::Completed);
        recipient_with(&store, "0x4", AirdropStatus::Error);
        recipient_with(&store, "0x5", AirdropStatus::Unconfirmed);

        assert_eq!(
            store.statistics().await.unwrap(),
            AirdropStatistics {
                total: 5,
                unconfirmed: 2,
                pending: 1,
                completed: 1,
                error: 1,
            }
        );
    }

    #[tokio::test]
    async fn closed_store_refuses_work_until_reconnected() {
        let store = InMemoryRecipientStore::new();
        store.close().await;
        assert!(matches!(
            store.statistics().await,
            Err(StoreError::Connection(_))
        ));

        let reopened = store.connect().await.unwrap();
        assert!(reopened.statistics().await.is_ok());
        assert_eq!(store.connect_count(), 1);
    }
}
