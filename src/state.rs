use crate::competition::controller::PublishedView;
use crate::competition::epoch::EpochStateMachine;
use crate::competition::types::LeaderboardView;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct LeaderboardHandle {
    pub competition_id: String,
    pub cancellation_token: CancellationToken,
    pub join_handle: JoinHandle<()>,
}

pub struct AppState {
    pub started_at: Instant,
    pub db_pool: Option<SqlitePool>,
    pub epoch: Arc<EpochStateMachine>,
    pub leaderboard: Mutex<Option<LeaderboardHandle>>,
    pub view: Arc<PublishedView>,
}

impl AppState {
    pub fn new(db_pool: Option<SqlitePool>) -> Self {
        Self {
            started_at: Instant::now(),
            db_pool,
            epoch: Arc::new(EpochStateMachine::new()),
            leaderboard: Mutex::new(None),
            view: Arc::new(PublishedView::new(LeaderboardView::initializing(
                String::new(),
            ))),
        }
    }
}
