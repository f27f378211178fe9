use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{LeaderboardEntry, Point};

/// Inserts the award unless one already exists for the pair. Returns
/// whether a row was written.
#[instrument(skip(conn))]
pub async fn insert_point(
    conn: &mut SqliteConnection,
    user_id: i64,
    module_id: i64,
    count: i64,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let res = sqlx::query(
        "INSERT INTO points (user_id, module_id, count, created_at) VALUES (?, ?, ?, ?)
         ON CONFLICT (user_id, module_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(module_id)
    .bind(count)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    info!(inserted = res.rows_affected(), "Recorded points");
    Ok(res.rows_affected() == 1)
}

#[instrument(skip(conn))]
pub async fn get_point(
    conn: &mut SqliteConnection,
    user_id: i64,
    module_id: i64,
) -> Result<Option<Point>, AppError> {
    let point = sqlx::query_as::<_, Point>(
        "SELECT id, user_id, module_id, count, created_at FROM points
         WHERE user_id = ? AND module_id = ?",
    )
    .bind(user_id)
    .bind(module_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(point)
}

#[instrument(skip(conn))]
pub async fn leaderboard(
    conn: &mut SqliteConnection,
    course_id: i64,
) -> Result<Vec<LeaderboardEntry>, AppError> {
    let rows = sqlx::query_as::<_, LeaderboardEntry>(
        "SELECT p.user_id AS user_id, SUM(p.count) AS total, MAX(p.created_at) AS last_awarded_at
         FROM points p
         JOIN modules m ON m.id = p.module_id
         WHERE m.course_id = ?
         GROUP BY p.user_id
         ORDER BY total DESC, last_awarded_at ASC, p.user_id ASC",
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}
