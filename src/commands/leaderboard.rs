use crate::competition::client::{now_unix_ms, CompetitionSource, HttpCompetitionSource};
use crate::competition::controller::RefreshController;
use crate::competition::types::{
    LeaderboardConfig, LeaderboardSession, LeaderboardStatusSnapshot, LeaderboardStopResult,
    LeaderboardView, SessionState, StartLeaderboardArgs,
};
use crate::error::AppError;
use crate::state::{AppState, LeaderboardHandle};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn start_leaderboard_session(
    state: &AppState,
    args: Option<StartLeaderboardArgs>,
) -> Result<LeaderboardSession, AppError> {
    let config = args.unwrap_or_default().normalize()?;
    let source = Arc::new(HttpCompetitionSource::new(
        &config.api_base_url,
        config.request_timeout_ms,
    )?);
    start_leaderboard_session_with_source(state, config, source).await
}

/// Replaces any running session. The previous controller is cancelled and
/// awaited before the new one can publish.
pub async fn start_leaderboard_session_with_source<S: CompetitionSource>(
    state: &AppState,
    config: LeaderboardConfig,
    source: Arc<S>,
) -> Result<LeaderboardSession, AppError> {
    if let Some(epoch) = config.epoch.as_ref() {
        state
            .epoch
            .initialize_epoch(&epoch.epoch_id, epoch.start_ms, epoch.end_ms)?;
    }

    // The slot stays locked until the new handle is stored, so concurrent
    // starts and stops queue behind each other.
    let mut session_slot = state.leaderboard.lock().await;
    if let Some(handle) = session_slot.take() {
        handle.cancellation_token.cancel();
        let _ = handle.join_handle.await;
    }

    state.view.replace(LeaderboardView::initializing(
        config.competition_id.clone(),
    ));

    let cancellation_token = CancellationToken::new();
    let controller = Arc::new(RefreshController::new(
        source,
        config.clone(),
        Arc::clone(&state.epoch),
        Arc::clone(&state.view),
        state.db_pool.clone(),
        cancellation_token.clone(),
    ));
    let join_handle = tokio::spawn(controller.run());

    *session_slot = Some(LeaderboardHandle {
        competition_id: config.competition_id.clone(),
        cancellation_token,
        join_handle,
    });
    drop(session_slot);

    let mut session = LeaderboardSession::from_config(&config);
    session.epoch_id = state.epoch.epoch().map(|epoch| epoch.epoch_id.clone());
    Ok(session)
}

pub async fn stop_leaderboard_session(state: &AppState) -> Result<LeaderboardStopResult, AppError> {
    let mut session_slot = state.leaderboard.lock().await;

    let stopped = if let Some(handle) = session_slot.take() {
        handle.cancellation_token.cancel();
        let _ = handle.join_handle.await;
        tracing::debug!(competition_id = %handle.competition_id, "session slot cleared");
        true
    } else {
        false
    };

    Ok(LeaderboardStopResult { stopped })
}

pub fn leaderboard_view(state: &AppState) -> Result<Arc<LeaderboardView>, AppError> {
    let view = state.view.load();
    if view.competition_id.is_empty() {
        return Err(AppError::SessionNotRunning);
    }
    Ok(view)
}

pub fn leaderboard_status(state: &AppState) -> Result<LeaderboardStatusSnapshot, AppError> {
    let view = leaderboard_view(state)?;
    let now_ms = now_unix_ms();

    Ok(LeaderboardStatusSnapshot {
        session_state: view.session_state,
        competition_id: view.competition_id.clone(),
        trader_count: view.traders.len(),
        phase: state.epoch.current_phase(now_ms).ok(),
        time_remaining_ms: state.epoch.time_remaining(now_ms).ok(),
        stale: view.stale,
        error: view.error.clone(),
        reconciliations: view.drift.reconciliations,
        drift_events: view.drift.drift_events,
        last_full_refresh_ms: view.last_full_refresh_ms,
        last_price_refresh_ms: view.last_price_refresh_ms,
    })
}

pub fn is_session_ready(state: &AppState) -> bool {
    state.view.load().session_state == SessionState::Ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::competition::epoch::EpochPhase;
    use crate::competition::types::{EpochArgs, PriceSnapshot, RawTraderRecord};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticSource {
        roster: Vec<RawTraderRecord>,
        fetches: AtomicUsize,
    }

    impl CompetitionSource for StaticSource {
        async fn fetch_roster(
            &self,
            _competition_id: &str,
        ) -> Result<Vec<RawTraderRecord>, AppError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.roster.clone())
        }

        async fn fetch_prices(&self, _symbols: &[String]) -> Result<PriceSnapshot, AppError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(PriceSnapshot::new(
                HashMap::from([("BTC".to_string(), 100.0)]),
                now_unix_ms(),
            ))
        }
    }

    fn source() -> Arc<StaticSource> {
        Arc::new(StaticSource {
            roster: vec![
                RawTraderRecord {
                    address: "0xa".to_string(),
                    display_name: "alpha".to_string(),
                    exposures: Vec::new(),
                    unused_balance: 250.0,
                    last_activity_ms: None,
                },
                RawTraderRecord {
                    address: "0xb".to_string(),
                    display_name: "beta".to_string(),
                    exposures: Vec::new(),
                    unused_balance: 500.0,
                    last_activity_ms: None,
                },
            ],
            fetches: AtomicUsize::new(0),
        })
    }

    fn config(competition_id: &str) -> LeaderboardConfig {
        StartLeaderboardArgs {
            competition_id: Some(competition_id.to_string()),
            symbols: Some(vec!["btc".to_string()]),
            ..StartLeaderboardArgs::default()
        }
        .normalize()
        .expect("config should normalize")
    }

    #[tokio::test]
    async fn view_requires_a_started_session() {
        let state = AppState::new(None);
        assert!(matches!(
            leaderboard_view(&state),
            Err(AppError::SessionNotRunning)
        ));
        assert!(matches!(
            leaderboard_status(&state),
            Err(AppError::SessionNotRunning)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn started_session_publishes_ranked_view() {
        let state = AppState::new(None);
        let session = start_leaderboard_session_with_source(&state, config("cup"), source())
            .await
            .expect("session should start");
        assert!(session.running);
        assert_eq!(session.symbols, vec!["BTC".to_string()]);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(is_session_ready(&state));

        let view = leaderboard_view(&state).expect("view");
        let order: Vec<&str> = view.traders.iter().map(|t| t.address.as_str()).collect();
        assert_eq!(order, vec!["0xb", "0xa"]);

        let status = leaderboard_status(&state).expect("status");
        assert_eq!(status.trader_count, 2);
        assert_eq!(status.reconciliations, 1);
        assert!(status.phase.is_none());

        stop_leaderboard_session(&state).await.expect("stop");
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_replaces_the_running_session() {
        let state = AppState::new(None);
        start_leaderboard_session_with_source(&state, config("cup"), source())
            .await
            .expect("first session");
        tokio::time::sleep(Duration::from_millis(10)).await;

        start_leaderboard_session_with_source(&state, config("league"), source())
            .await
            .expect("second session");
        assert_eq!(
            state.leaderboard.lock().await.as_ref().map(|h| h.competition_id.clone()),
            Some("league".to_string())
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        let view = leaderboard_view(&state).expect("view");
        assert_eq!(view.competition_id, "league");
        assert_eq!(view.session_state, SessionState::Ready);

        stop_leaderboard_session(&state).await.expect("stop");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_restarts_leave_nothing_running_after_stop() {
        let state = AppState::new(None);
        start_leaderboard_session_with_source(&state, config("first"), source())
            .await
            .expect("first session");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let cup = source();
        let league = source();
        let (cup_started, league_started) = tokio::join!(
            start_leaderboard_session_with_source(&state, config("cup"), Arc::clone(&cup)),
            start_leaderboard_session_with_source(&state, config("league"), Arc::clone(&league)),
        );
        cup_started.expect("cup session");
        league_started.expect("league session");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let result = stop_leaderboard_session(&state).await.expect("stop");
        assert!(result.stopped);
        assert!(state.leaderboard.lock().await.is_none());

        let before = (
            cup.fetches.load(Ordering::SeqCst),
            league.fetches.load(Ordering::SeqCst),
        );
        tokio::time::sleep(Duration::from_millis(60_000)).await;
        let after = (
            cup.fetches.load(Ordering::SeqCst),
            league.fetches.load(Ordering::SeqCst),
        );
        assert_eq!(after, before);

        let view = leaderboard_view(&state).expect("view survives stop");
        assert_eq!(view.session_state, SessionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_tears_down_once() {
        let state = AppState::new(None);
        start_leaderboard_session_with_source(&state, config("cup"), source())
            .await
            .expect("session should start");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let first = stop_leaderboard_session(&state).await.expect("stop");
        assert!(first.stopped);
        let second = stop_leaderboard_session(&state).await.expect("stop");
        assert!(!second.stopped);

        let view = leaderboard_view(&state).expect("view survives stop");
        assert_eq!(view.session_state, SessionState::Stopped);
        assert_eq!(view.traders.len(), 2);
    }

    #[tokio::test]
    async fn invalid_epoch_is_rejected_before_starting() {
        let state = AppState::new(None);
        let mut config = config("cup");
        config.epoch = Some(EpochArgs {
            epoch_id: "season-1".to_string(),
            start_ms: 2_000,
            end_ms: 1_000,
        });

        let result = start_leaderboard_session_with_source(&state, config, source()).await;

        assert!(matches!(result, Err(AppError::InvalidEpoch { .. })));
        assert!(state.leaderboard.lock().await.is_none());
        assert!(state.epoch.epoch().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_epoch_phase() {
        let state = AppState::new(None);
        let now = now_unix_ms();
        let mut config = config("cup");
        config.epoch = Some(EpochArgs {
            epoch_id: "season-1".to_string(),
            start_ms: now - 1_000,
            end_ms: now + 86_400_000,
        });

        let session = start_leaderboard_session_with_source(&state, config, source())
            .await
            .expect("session should start");
        assert_eq!(session.epoch_id.as_deref(), Some("season-1"));

        let status = leaderboard_status(&state).expect("status");
        assert_eq!(status.phase, Some(EpochPhase::Active));
        assert!(status.time_remaining_ms.is_some_and(|remaining| remaining > 0));

        stop_leaderboard_session(&state).await.expect("stop");
    }

    #[tokio::test]
    async fn rejects_invalid_arguments() {
        let state = AppState::new(None);
        let result = start_leaderboard_session(&state, None).await;
        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
    }
}
