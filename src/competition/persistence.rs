use crate::error::AppError;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

fn now_unix_ms() -> i64 {
    crate::competition::client::now_unix_ms()
}

fn map_rank_row(row: &sqlx::sqlite::SqliteRow) -> Result<(String, u32), AppError> {
    let address: String = row.try_get("address")?;
    let rank_raw: i64 = row.try_get("rank")?;
    let rank = u32::try_from(rank_raw).map_err(|_| {
        AppError::InvalidArgument(format!("stored rank {rank_raw} for {address} is out of range"))
    })?;
    Ok((address, rank))
}

pub async fn load_rank_map(
    pool: &SqlitePool,
    competition_id: &str,
) -> Result<HashMap<String, u32>, AppError> {
    let rows = sqlx::query(
        "SELECT address, rank FROM rank_snapshots WHERE competition_id = ? ORDER BY rank ASC",
    )
    .bind(competition_id)
    .fetch_all(pool)
    .await?;

    let mut ranks = HashMap::with_capacity(rows.len());
    for row in rows {
        let (address, rank) = map_rank_row(&row)?;
        ranks.insert(address, rank);
    }

    Ok(ranks)
}

/// Replaces the stored map so traders dropped from the roster disappear too.
pub async fn save_rank_map(
    pool: &SqlitePool,
    competition_id: &str,
    ranks: &HashMap<String, u32>,
) -> Result<(), AppError> {
    let updated_at_ms = now_unix_ms();
    let mut transaction = pool.begin().await?;

    sqlx::query("DELETE FROM rank_snapshots WHERE competition_id = ?")
        .bind(competition_id)
        .execute(&mut *transaction)
        .await?;

    for (address, rank) in ranks {
        sqlx::query(
            "INSERT INTO rank_snapshots (competition_id, address, rank, updated_at_ms) VALUES (?, ?, ?, ?)",
        )
        .bind(competition_id)
        .bind(address)
        .bind(i64::from(*rank))
        .bind(updated_at_ms)
        .execute(&mut *transaction)
        .await?;
    }

    transaction.commit().await?;
    Ok(())
}
