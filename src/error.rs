use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid epoch bounds: end ({end_ms}) must be after start ({start_ms})")]
    InvalidEpoch { start_ms: i64, end_ms: i64 },
    #[error("epoch has not been initialized")]
    EpochNotInitialized,
    #[error("leaderboard session is not running")]
    SessionNotRunning,
    #[error("provider payload rejected: {0}")]
    Provider(String),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("json decode error: {0}")]
    SimdJson(#[from] simd_json::Error),
    #[error("float parse error: {0}")]
    ParseFloat(#[from] std::num::ParseFloatError),
}

impl AppError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::InvalidEpoch { .. } | Self::EpochNotInitialized
        )
    }
}
