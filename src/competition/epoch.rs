use crate::error::AppError;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EpochPhase {
    Pending,
    Active,
    Closed,
}

impl EpochPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Epoch {
    pub epoch_id: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

impl Epoch {
    pub fn new(epoch_id: impl Into<String>, start_ms: i64, end_ms: i64) -> Result<Self, AppError> {
        let epoch_id = epoch_id.into().trim().to_string();
        if epoch_id.is_empty() {
            return Err(AppError::InvalidArgument(
                "epochId must be non-empty".to_string(),
            ));
        }
        if end_ms <= start_ms {
            return Err(AppError::InvalidEpoch { start_ms, end_ms });
        }

        Ok(Self {
            epoch_id,
            start_ms,
            end_ms,
        })
    }

    pub fn phase_at(&self, now_ms: i64) -> EpochPhase {
        if now_ms < self.start_ms {
            EpochPhase::Pending
        } else if now_ms < self.end_ms {
            EpochPhase::Active
        } else {
            EpochPhase::Closed
        }
    }

    pub fn time_remaining_ms(&self, now_ms: i64) -> i64 {
        self.end_ms.saturating_sub(now_ms).max(0)
    }

    pub fn snapshot(&self, now_ms: i64) -> EpochSnapshot {
        EpochSnapshot {
            epoch_id: self.epoch_id.clone(),
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            phase: self.phase_at(now_ms),
            time_remaining_ms: self.time_remaining_ms(now_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochSnapshot {
    pub epoch_id: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub phase: EpochPhase,
    pub time_remaining_ms: i64,
}

#[derive(Debug, Default)]
pub struct EpochStateMachine {
    epoch: OnceLock<Epoch>,
}

impl EpochStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent create. Bounds are validated on every call; once an epoch
    /// is held any further call returns it unchanged.
    pub fn initialize_epoch(
        &self,
        epoch_id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<&Epoch, AppError> {
        let candidate = Epoch::new(epoch_id, start_ms, end_ms)?;
        let held = self.epoch.get_or_init(|| candidate.clone());
        if held.epoch_id != candidate.epoch_id {
            warn!(
                held_epoch = %held.epoch_id,
                requested_epoch = %candidate.epoch_id,
                "ignoring epoch initialization: a different epoch is already in flight"
            );
        }
        Ok(held)
    }

    pub fn epoch(&self) -> Option<&Epoch> {
        self.epoch.get()
    }

    pub fn current_phase(&self, now_ms: i64) -> Result<EpochPhase, AppError> {
        self.epoch
            .get()
            .map(|epoch| epoch.phase_at(now_ms))
            .ok_or(AppError::EpochNotInitialized)
    }

    pub fn time_remaining(&self, now_ms: i64) -> Result<i64, AppError> {
        self.epoch
            .get()
            .map(|epoch| epoch.time_remaining_ms(now_ms))
            .ok_or(AppError::EpochNotInitialized)
    }

    pub fn accrual_active(&self, now_ms: i64) -> bool {
        match self.epoch.get() {
            Some(epoch) => epoch.phase_at(now_ms) != EpochPhase::Pending,
            None => true,
        }
    }

    pub fn prices_frozen(&self, now_ms: i64) -> bool {
        self.epoch
            .get()
            .is_some_and(|epoch| epoch.phase_at(now_ms) == EpochPhase::Closed)
    }

    pub fn snapshot(&self, now_ms: i64) -> Option<EpochSnapshot> {
        self.epoch.get().map(|epoch| epoch.snapshot(now_ms))
    }
}

/// Remembers the furthest phase observed so a clock stepping backwards never
/// reports a transition out of `Active` or `Closed`.
#[derive(Debug, Default)]
pub struct PhaseTracker {
    furthest: Option<EpochPhase>,
}

impl PhaseTracker {
    pub fn observe(&mut self, phase: EpochPhase) -> Option<(Option<EpochPhase>, EpochPhase)> {
        match self.furthest {
            Some(current) if phase <= current => None,
            previous => {
                self.furthest = Some(phase);
                Some((previous, phase))
            }
        }
    }

    pub fn furthest(&self) -> Option<EpochPhase> {
        self.furthest
    }
}
