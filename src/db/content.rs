//! Content-addressed text storage.
//!
//! Every piece of authored text (block bodies, question bodies, choices,
//! explanations) lives in `contents`, keyed by a unique index on the exact
//! text. Rows are never updated. They are removed only by
//! [`reclaim_unreferenced`], once nothing points at them any more.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::{debug, info, instrument};

use crate::error::AppError;

/// Every place a content id can be referenced from.
const REFERENCED_CONTENT: &str = "SELECT content_id FROM content_blocks
     UNION SELECT content_id FROM questions
     UNION SELECT content_id FROM choices
     UNION SELECT content_id FROM explanations";

/// Returns the id of the row holding exactly `text`, creating it if needed.
/// A row written by a concurrent transaction is reused, not reported.
#[instrument(skip(conn, text), fields(len = text.len()))]
pub async fn put_content(conn: &mut SqliteConnection, text: &str) -> Result<i64, AppError> {
    let res = sqlx::query("INSERT INTO contents (text) VALUES (?) ON CONFLICT (text) DO NOTHING")
        .bind(text)
        .execute(&mut *conn)
        .await?;

    if res.rows_affected() == 1 {
        return Ok(res.last_insert_rowid());
    }

    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM contents WHERE text = ?")
        .bind(text)
        .fetch_one(&mut *conn)
        .await?;

    debug!(content_id = id, "Reusing existing content");
    Ok(id)
}

#[instrument(skip(conn))]
pub async fn content_text(conn: &mut SqliteConnection, id: i64) -> Result<String, AppError> {
    let text = sqlx::query_scalar::<_, String>("SELECT text FROM contents WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    text.ok_or_else(|| AppError::NotFound(format!("Content with id {} not found", id)))
}

#[instrument(skip(conn))]
pub async fn content_count(conn: &mut SqliteConnection) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM contents")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// Deletes the members of `scope` that nothing references any more.
///
/// Must run after the structural deletion it accompanies, inside the same
/// transaction.
#[instrument(skip(conn, scope), fields(scope_len = scope.len()))]
pub async fn reclaim_unreferenced(
    conn: &mut SqliteConnection,
    scope: &[i64],
) -> Result<u64, AppError> {
    if scope.is_empty() {
        return Ok(0);
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM contents WHERE id IN (");
    let mut ids = builder.separated(", ");
    for id in scope {
        ids.push_bind(*id);
    }
    builder.push(") AND id NOT IN (");
    builder.push(REFERENCED_CONTENT);
    builder.push(")");

    let res = builder.build().execute(&mut *conn).await?;

    info!(reclaimed = res.rows_affected(), "Reclaimed unreferenced content");
    Ok(res.rows_affected())
}
