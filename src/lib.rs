pub mod commands;
pub mod competition;
pub mod db;
pub mod error;
pub mod state;

use commands::{
    app_info::app_info,
    health::health,
    leaderboard::{
        is_session_ready, leaderboard_status, leaderboard_view, start_leaderboard_session,
        stop_leaderboard_session,
    },
};
use competition::types::StartLeaderboardArgs;
use db::initialize_pool;
use error::AppError;
use state::AppState;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const TOP_TRADERS_LOGGED: usize = 10;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn log_leaderboard(state: &AppState) {
    let status = match leaderboard_status(state) {
        Ok(status) => status,
        Err(error) => {
            debug!(%error, "no leaderboard to report");
            return;
        }
    };
    info!(
        competition_id = %status.competition_id,
        traders = status.trader_count,
        phase = status.phase.map(|phase| phase.as_str()).unwrap_or("none"),
        time_remaining_ms = ?status.time_remaining_ms,
        stale = status.stale,
        drift_events = status.drift_events,
        "leaderboard status"
    );

    if !is_session_ready(state) {
        return;
    }
    let Ok(view) = leaderboard_view(state) else {
        return;
    };
    for trader in view.traders.iter().take(TOP_TRADERS_LOGGED) {
        info!(
            rank = trader.current_rank.unwrap_or_default(),
            delta = trader.rank_delta,
            address = %trader.address,
            name = %trader.display_name,
            equity = trader.total_equity,
            pnl = trader.total_pnl,
            live = trader.is_live,
            "standing"
        );
    }
}

async fn run_headless() -> Result<(), AppError> {
    let about = app_info();
    info!(
        product = %about.product_name,
        version = %about.version,
        platform = %about.platform,
        arch = %about.arch,
        "starting"
    );

    let db_pool = match initialize_pool().await {
        Ok(pool) => Some(pool),
        Err(error) => {
            warn!(%error, "rank persistence disabled");
            None
        }
    };
    let state = AppState::new(db_pool);

    let args = StartLeaderboardArgs::from_env()?;
    let session = start_leaderboard_session(&state, Some(args)).await?;
    info!(
        competition_id = %session.competition_id,
        symbols = %session.symbols.join(","),
        epoch_id = session.epoch_id.as_deref().unwrap_or("none"),
        "session configured"
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(session.slow_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately, before any reconciliation has landed.
    ticker.tick().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            _ = ticker.tick() => log_leaderboard(&state),
        }
    }

    stop_leaderboard_session(&state).await?;
    let report = health(&state).await?;
    info!(
        uptime_ms = report.uptime_ms as u64,
        db = report.db,
        "shutdown complete"
    );
    Ok(())
}

pub fn run() -> Result<(), AppError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_headless())
}
