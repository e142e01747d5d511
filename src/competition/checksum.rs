use crate::competition::types::{TraderState, PNL_CHECKSUM_SCALE};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateChecksum(pub u64);

impl StateChecksum {
    pub fn value(self) -> u64 {
        self.0
    }
}

fn rounded_pnl(pnl: f64) -> i64 {
    let scaled = (pnl * PNL_CHECKSUM_SCALE).round();
    if scaled.is_finite() {
        scaled as i64
    } else {
        0
    }
}

pub fn calculate_state_checksum(traders: &[TraderState]) -> StateChecksum {
    let mut tuples: Vec<(&str, u32, i64)> = traders
        .iter()
        .map(|trader| {
            (
                trader.address.as_str(),
                trader.current_rank.unwrap_or(0),
                rounded_pnl(trader.total_pnl),
            )
        })
        .collect();
    tuples.sort_unstable();

    let mut hasher = DefaultHasher::new();
    tuples.len().hash(&mut hasher);
    for tuple in &tuples {
        tuple.hash(&mut hasher);
    }
    StateChecksum(hasher.finish())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftOutcome {
    Baseline,
    Consistent,
    Drift {
        fast: StateChecksum,
        slow: StateChecksum,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftSnapshot {
    pub reconciliations: u64,
    pub drift_events: u64,
    pub last_fast_checksum: Option<u64>,
    pub last_slow_checksum: Option<u64>,
}

#[derive(Debug, Default)]
pub struct DriftTracker {
    reconciliations: u64,
    drift_events: u64,
    last_fast: Option<StateChecksum>,
    last_slow: Option<StateChecksum>,
}

impl DriftTracker {
    pub fn record_fast(&mut self, checksum: StateChecksum) {
        self.last_fast = Some(checksum);
    }

    /// `prior` is the checksum of the collection that was published right
    /// before this reconciliation, or `None` when nothing has been published.
    pub fn record_reconciliation(
        &mut self,
        prior: Option<StateChecksum>,
        slow: StateChecksum,
    ) -> DriftOutcome {
        self.reconciliations = self.reconciliations.saturating_add(1);
        self.last_slow = Some(slow);

        match prior {
            None => DriftOutcome::Baseline,
            Some(fast) if fast == slow => DriftOutcome::Consistent,
            Some(fast) => {
                self.drift_events = self.drift_events.saturating_add(1);
                DriftOutcome::Drift { fast, slow }
            }
        }
    }

    pub fn snapshot(&self) -> DriftSnapshot {
        DriftSnapshot {
            reconciliations: self.reconciliations,
            drift_events: self.drift_events,
            last_fast_checksum: self.last_fast.map(StateChecksum::value),
            last_slow_checksum: self.last_slow.map(StateChecksum::value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trader(address: &str, rank: u32, pnl: f64) -> TraderState {
        TraderState {
            address: address.to_string(),
            display_name: address.to_string(),
            exposures: Vec::new(),
            unused_balance: 100.0,
            total_pnl: pnl,
            total_equity: 100.0 + pnl,
            total_pnl_percentage: pnl,
            current_rank: Some(rank),
            previous_rank: Some(rank),
            rank_delta: 0,
            is_live: true,
            last_update_timestamp: 0,
            last_activity_ms: None,
            input_index: 0,
        }
    }

    #[test]
    fn permutations_checksum_equal() {
        let forward = vec![trader("a", 1, 10.0), trader("b", 2, 5.0), trader("c", 3, -1.0)];
        let mut reversed = forward.clone();
        reversed.reverse();
        let mut shuffled = vec![forward[1].clone(), forward[2].clone(), forward[0].clone()];
        shuffled[0].input_index = 9;

        let expected = calculate_state_checksum(&forward);
        assert_eq!(calculate_state_checksum(&reversed), expected);
        assert_eq!(calculate_state_checksum(&shuffled), expected);
    }

    #[test]
    fn sub_cent_noise_does_not_change_checksum() {
        let base = vec![trader("a", 1, 10.001)];
        let noisy = vec![trader("a", 1, 10.004)];
        assert_eq!(calculate_state_checksum(&base), calculate_state_checksum(&noisy));
    }

    #[test]
    fn negative_zero_pnl_matches_zero() {
        assert_eq!(
            calculate_state_checksum(&[trader("a", 1, -0.001)]),
            calculate_state_checksum(&[trader("a", 1, 0.0)])
        );
    }

    #[test]
    fn rank_or_pnl_change_alters_checksum() {
        let base = calculate_state_checksum(&[trader("a", 1, 10.0), trader("b", 2, 5.0)]);
        let swapped = calculate_state_checksum(&[trader("a", 2, 10.0), trader("b", 1, 5.0)]);
        let moved = calculate_state_checksum(&[trader("a", 1, 10.5), trader("b", 2, 5.0)]);
        let dropped = calculate_state_checksum(&[trader("a", 1, 10.0)]);

        assert_ne!(base, swapped);
        assert_ne!(base, moved);
        assert_ne!(base, dropped);
    }

    #[test]
    fn tracker_counts_drift_events() {
        let mut tracker = DriftTracker::default();
        let first = StateChecksum(1);
        let second = StateChecksum(2);

        assert_eq!(
            tracker.record_reconciliation(None, first),
            DriftOutcome::Baseline
        );
        assert_eq!(
            tracker.record_reconciliation(Some(first), first),
            DriftOutcome::Consistent
        );
        tracker.record_fast(first);
        assert_eq!(
            tracker.record_reconciliation(Some(first), second),
            DriftOutcome::Drift {
                fast: first,
                slow: second
            }
        );

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.reconciliations, 3);
        assert_eq!(snapshot.drift_events, 1);
        assert_eq!(snapshot.last_fast_checksum, Some(1));
        assert_eq!(snapshot.last_slow_checksum, Some(2));
    }
}
