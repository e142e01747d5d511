use crate::competition::aggregator::{
    calculate_aggregate_stats, rank_map, reprice_trader_state,
    transform_api_response_to_trader_state, update_trader_rankings, PriorObservation,
    TransformContext,
};
use crate::competition::checksum::{calculate_state_checksum, DriftOutcome, DriftTracker};
use crate::competition::client::{now_unix_ms, CompetitionSource};
use crate::competition::epoch::{EpochPhase, EpochStateMachine, PhaseTracker};
use crate::competition::persistence::{load_rank_map, save_rank_map};
use crate::competition::types::{
    LeaderboardConfig, LeaderboardView, PriceSnapshot, SessionState, TraderState,
};
use crate::error::AppError;
use parking_lot::{Mutex, RwLock};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub struct PublishedView {
    current: RwLock<Arc<LeaderboardView>>,
}

impl PublishedView {
    pub fn new(view: LeaderboardView) -> Self {
        Self {
            current: RwLock::new(Arc::new(view)),
        }
    }

    pub fn load(&self) -> Arc<LeaderboardView> {
        Arc::clone(&self.current.read())
    }

    pub fn replace(&self, view: LeaderboardView) {
        *self.current.write() = Arc::new(view);
    }
}

#[derive(Debug, Default)]
struct ReconcileState {
    previous_ranks: HashMap<String, u32>,
    drift: DriftTracker,
    phase: PhaseTracker,
    has_reconciled: bool,
    /// Latest prices observed while the epoch was still open.
    latest_prices: Option<PriceSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlowPassOutcome {
    Reconciled {
        trader_count: usize,
        drift: DriftOutcome,
    },
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastPassOutcome {
    Repriced,
    Skipped,
    Failed,
    Cancelled,
}

pub struct RefreshController<S: CompetitionSource> {
    source: Arc<S>,
    config: LeaderboardConfig,
    epoch: Arc<EpochStateMachine>,
    view: Arc<PublishedView>,
    pool: Option<SqlitePool>,
    cancel_token: CancellationToken,
    writer: Mutex<ReconcileState>,
}

impl<S: CompetitionSource> RefreshController<S> {
    pub fn new(
        source: Arc<S>,
        config: LeaderboardConfig,
        epoch: Arc<EpochStateMachine>,
        view: Arc<PublishedView>,
        pool: Option<SqlitePool>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            source,
            config,
            epoch,
            view,
            pool,
            cancel_token,
            writer: Mutex::new(ReconcileState::default()),
        }
    }

    pub async fn seed_previous_ranks(&self) {
        let Some(pool) = self.pool.as_ref() else {
            return;
        };

        match load_rank_map(pool, &self.config.competition_id).await {
            Ok(ranks) => {
                debug!(
                    competition_id = %self.config.competition_id,
                    seeded = ranks.len(),
                    "seeded previous ranks"
                );
                self.writer.lock().previous_ranks = ranks;
            }
            Err(error) => {
                warn!(
                    competition_id = %self.config.competition_id,
                    %error,
                    "failed to load persisted ranks"
                );
            }
        }
    }

    fn observe_phase(&self, writer: &mut ReconcileState, now_ms: i64) -> bool {
        if let Ok(phase) = self.epoch.current_phase(now_ms) {
            if let Some((from, to)) = writer.phase.observe(phase) {
                info!(
                    competition_id = %self.config.competition_id,
                    from = from.map(EpochPhase::as_str).unwrap_or("none"),
                    to = to.as_str(),
                    "epoch phase changed"
                );
            }
        }
        self.epoch.prices_frozen(now_ms) || writer.phase.furthest() == Some(EpochPhase::Closed)
    }

    pub async fn slow_pass(&self) -> SlowPassOutcome {
        let fetched = tokio::select! {
            _ = self.cancel_token.cancelled() => return SlowPassOutcome::Cancelled,
            result = async {
                tokio::try_join!(
                    self.source.fetch_roster(&self.config.competition_id),
                    self.source.fetch_prices(&self.config.symbols),
                )
            } => result,
        };

        let (roster, fetched_prices) = match fetched {
            Ok(payload) => payload,
            Err(error) => {
                if self.cancel_token.is_cancelled() {
                    return SlowPassOutcome::Cancelled;
                }
                self.mark_stale(&error);
                return SlowPassOutcome::Failed;
            }
        };

        let (outcome, ranks) = {
            let mut writer = self.writer.lock();
            if self.cancel_token.is_cancelled() {
                return SlowPassOutcome::Cancelled;
            }

            let now_ms = now_unix_ms();
            let frozen = self.observe_phase(&mut writer, now_ms);
            let prices = if frozen {
                writer
                    .latest_prices
                    .get_or_insert_with(|| fetched_prices.clone())
                    .clone()
            } else {
                writer.latest_prices = Some(fetched_prices.clone());
                fetched_prices
            };

            let current = self.view.load();
            let context = TransformContext {
                now_ms,
                accrual_active: self.epoch.accrual_active(now_ms),
                live_window_ms: i64::try_from(self.config.slow_interval_ms).unwrap_or(i64::MAX),
            };
            let known: HashMap<&str, &TraderState> = current
                .traders
                .iter()
                .map(|trader| (trader.address.as_str(), trader))
                .collect();

            let transformed: Vec<TraderState> = roster
                .iter()
                .enumerate()
                .map(|(input_index, raw)| {
                    let rank = writer.previous_ranks.get(&raw.address).copied();
                    let prior = match known.get(raw.address.as_str()) {
                        Some(previous) => PriorObservation::from_state(previous, rank),
                        None => PriorObservation {
                            rank,
                            ..PriorObservation::default()
                        },
                    };
                    transform_api_response_to_trader_state(
                        raw,
                        &prices,
                        input_index,
                        prior,
                        &context,
                    )
                })
                .collect();

            let ranked = update_trader_rankings(transformed, &writer.previous_ranks);
            let stats = calculate_aggregate_stats(&ranked);
            let checksum = calculate_state_checksum(&ranked);
            let prior_checksum = if writer.has_reconciled {
                Some(calculate_state_checksum(&current.traders))
            } else {
                None
            };
            let drift = writer.drift.record_reconciliation(prior_checksum, checksum);
            if let DriftOutcome::Drift { fast, slow } = drift {
                info!(
                    competition_id = %self.config.competition_id,
                    fast_checksum = fast.value(),
                    slow_checksum = slow.value(),
                    drift_events = writer.drift.snapshot().drift_events,
                    "fast path drifted from reconciled state"
                );
            }

            writer.previous_ranks = rank_map(&ranked);
            writer.has_reconciled = true;
            let trader_count = ranked.len();

            self.view.replace(LeaderboardView {
                session_state: SessionState::Ready,
                competition_id: self.config.competition_id.clone(),
                traders: ranked,
                stats,
                epoch: self.epoch.snapshot(now_ms),
                checksum: checksum.value(),
                drift: writer.drift.snapshot(),
                last_full_refresh_ms: Some(now_ms),
                last_price_refresh_ms: Some(prices.observed_at_ms),
                stale: false,
                error: None,
            });

            (
                SlowPassOutcome::Reconciled {
                    trader_count,
                    drift,
                },
                writer.previous_ranks.clone(),
            )
        };

        debug!(
            competition_id = %self.config.competition_id,
            outcome = ?outcome,
            "reconciled leaderboard"
        );

        if let Some(pool) = self.pool.as_ref() {
            if let Err(error) = save_rank_map(pool, &self.config.competition_id, &ranks).await {
                warn!(
                    competition_id = %self.config.competition_id,
                    %error,
                    "failed to persist ranks"
                );
            }
        }

        outcome
    }

    pub async fn fast_pass(&self) -> FastPassOutcome {
        if self.view.load().traders.is_empty() {
            return FastPassOutcome::Skipped;
        }

        let fetched = tokio::select! {
            _ = self.cancel_token.cancelled() => return FastPassOutcome::Cancelled,
            result = self.source.fetch_prices(&self.config.symbols) => result,
        };

        let prices = match fetched {
            Ok(prices) => prices,
            Err(error) => {
                debug!(
                    competition_id = %self.config.competition_id,
                    %error,
                    "skipping price tick"
                );
                return FastPassOutcome::Failed;
            }
        };

        let mut writer = self.writer.lock();
        if self.cancel_token.is_cancelled() {
            return FastPassOutcome::Cancelled;
        }

        let now_ms = now_unix_ms();
        if self.observe_phase(&mut writer, now_ms) {
            return FastPassOutcome::Skipped;
        }

        let current = self.view.load();
        if current.traders.is_empty() {
            return FastPassOutcome::Skipped;
        }
        // A slow pass may have published fresher prices while this tick waited.
        if prices.observed_at_ms < current.last_price_refresh_ms.unwrap_or(i64::MIN) {
            return FastPassOutcome::Skipped;
        }

        let context = TransformContext {
            now_ms,
            accrual_active: self.epoch.accrual_active(now_ms),
            live_window_ms: i64::try_from(self.config.slow_interval_ms).unwrap_or(i64::MAX),
        };
        let traders: Vec<TraderState> = current
            .traders
            .iter()
            .map(|trader| reprice_trader_state(trader, &prices, &context))
            .collect();
        let stats = calculate_aggregate_stats(&traders);
        let checksum = calculate_state_checksum(&traders);
        writer.drift.record_fast(checksum);
        let last_price_refresh_ms = Some(prices.observed_at_ms);
        writer.latest_prices = Some(prices);

        self.view.replace(LeaderboardView {
            session_state: current.session_state,
            competition_id: current.competition_id.clone(),
            traders,
            stats,
            epoch: self.epoch.snapshot(now_ms),
            checksum: checksum.value(),
            drift: writer.drift.snapshot(),
            last_full_refresh_ms: current.last_full_refresh_ms,
            last_price_refresh_ms,
            stale: current.stale,
            error: current.error.clone(),
        });

        FastPassOutcome::Repriced
    }

    fn mark_stale(&self, error: &AppError) {
        if error.is_validation() {
            error!(
                competition_id = %self.config.competition_id,
                %error,
                "full refresh rejected"
            );
        } else {
            warn!(
                competition_id = %self.config.competition_id,
                %error,
                "full refresh failed; keeping last good leaderboard"
            );
        }

        let _writer = self.writer.lock();
        if self.cancel_token.is_cancelled() {
            return;
        }
        let current = self.view.load();
        let mut next = LeaderboardView::clone(&current);
        next.stale = true;
        next.error = Some(error.to_string());
        next.epoch = self.epoch.snapshot(now_unix_ms());
        self.view.replace(next);
    }

    async fn run_slow_loop(&self) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.slow_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    if self.slow_pass().await == SlowPassOutcome::Cancelled {
                        break;
                    }
                }
            }
        }
    }

    async fn run_fast_loop(&self) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.fast_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    if self.fast_pass().await == FastPassOutcome::Cancelled {
                        break;
                    }
                }
            }
        }
    }

    pub async fn run(self: Arc<Self>) {
        self.seed_previous_ranks().await;
        info!(
            competition_id = %self.config.competition_id,
            fast_interval_ms = self.config.fast_interval_ms,
            slow_interval_ms = self.config.slow_interval_ms,
            "leaderboard session started"
        );

        let slow_controller = Arc::clone(&self);
        let slow_handle = tokio::spawn(async move { slow_controller.run_slow_loop().await });
        let fast_controller = Arc::clone(&self);
        let fast_handle = tokio::spawn(async move { fast_controller.run_fast_loop().await });

        self.cancel_token.cancelled().await;
        let _ = slow_handle.await;
        let _ = fast_handle.await;

        {
            let _writer = self.writer.lock();
            let current = self.view.load();
            let mut stopped = LeaderboardView::clone(&current);
            stopped.session_state = SessionState::Stopped;
            self.view.replace(stopped);
        }

        info!(
            competition_id = %self.config.competition_id,
            "leaderboard session stopped"
        );
    }
}
