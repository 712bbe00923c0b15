//! Read-only aggregate over recipient statuses.

use serde::{Deserialize, Serialize};

use crate::status::AirdropStatus;

/// Counts of recipients per airdrop status.
///
/// `total` counts every row regardless of status (inactive rows included).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirdropStatistics {
    pub total: u64,
    pub unconfirmed: u64,
    pub pending: u64,
    pub completed: u64,
    pub error: u64,
}

impl AirdropStatistics {
    pub fn record(&mut self, status: AirdropStatus) {
        self.total += 1;
        match status {
            AirdropStatus::Unconfirmed => self.unconfirmed += 1,
            AirdropStatus::Pending => self.pending += 1,
            AirdropStatus::Completed => self.completed += 1,
            AirdropStatus::Error => self.error += 1,
        }
    }
}

impl FromIterator<AirdropStatus> for AirdropStatistics {
    fn from_iter<I: IntoIterator<Item = AirdropStatus>>(iter: I) -> Self {
        let mut stats = Self::default();
        for status in iter {
            stats.record(status);
        }
        stats
    }
}
