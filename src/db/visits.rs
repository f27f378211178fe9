use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{info, instrument, warn};

use crate::db::versions::require_latest_version;
use crate::error::AppError;
use crate::models::{QuestionOrder, Visit};

#[instrument(skip(conn))]
pub async fn find_visit(
    conn: &mut SqliteConnection,
    user_id: i64,
    module_id: i64,
) -> Result<Option<Visit>, AppError> {
    let visit = sqlx::query_as::<_, Visit>(
        "SELECT v.id, v.user_id, v.module_version_id, v.block_index FROM visits v
         JOIN module_versions mv ON mv.id = v.module_version_id
         WHERE v.user_id = ? AND mv.module_id = ?
         ORDER BY mv.version_number DESC
         LIMIT 1",
    )
    .bind(user_id)
    .bind(module_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(visit)
}

#[instrument(skip(conn))]
pub async fn require_visit(
    conn: &mut SqliteConnection,
    user_id: i64,
    module_id: i64,
) -> Result<Visit, AppError> {
    find_visit(conn, user_id, module_id).await?.ok_or_else(|| {
        AppError::NotFound(format!(
            "User {} has not started module {}",
            user_id, module_id
        ))
    })
}

/// Returns the user's visit for the module, pinning a new one to the latest
/// version on first access. An existing visit is never moved to a newer
/// version.
#[instrument(skip(conn))]
pub async fn get_or_create_visit(
    conn: &mut SqliteConnection,
    user_id: i64,
    module_id: i64,
) -> Result<Visit, AppError> {
    if let Some(visit) = find_visit(conn, user_id, module_id).await? {
        return Ok(visit);
    }

    let version = require_latest_version(conn, module_id).await?;
    info!(version_number = version.version_number, "Creating visit");

    let res = sqlx::query(
        "INSERT INTO visits (user_id, module_version_id, block_index) VALUES (?, ?, 0)",
    )
    .bind(user_id)
    .bind(version.id)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::from_constraint(e, "Visit was created concurrently"))?;

    Ok(Visit {
        id: res.last_insert_rowid(),
        user_id,
        module_version_id: version.id,
        block_index: 0,
    })
}

/// Moves the cursor to `requested`. Going back is allowed but never lowers
/// the stored frontier; going forward is limited to one block at a time.
#[instrument(skip(conn, visit), fields(visit_id = visit.id, block_index = visit.block_index))]
pub async fn advance(
    conn: &mut SqliteConnection,
    visit: &Visit,
    requested: i64,
    block_count: i64,
) -> Result<Visit, AppError> {
    if requested < 0 || requested >= block_count {
        return Err(AppError::Validation(format!(
            "Block index {} is outside the module's {} blocks",
            requested, block_count
        )));
    }

    if requested > visit.block_index + 1 {
        warn!(requested, "Attempt to skip ahead");
        return Err(AppError::Authorization(format!(
            "Block {} is not unlocked yet",
            requested
        )));
    }

    let block_index = visit.block_index.max(requested);
    if block_index != visit.block_index {
        set_block_index(conn, visit.id, block_index).await?;
    }

    Ok(Visit {
        block_index,
        ..visit.clone()
    })
}

#[instrument(skip(conn))]
pub async fn set_block_index(
    conn: &mut SqliteConnection,
    visit_id: i64,
    block_index: i64,
) -> Result<(), AppError> {
    sqlx::query("UPDATE visits SET block_index = ? WHERE id = ? AND block_index <= ?")
        .bind(block_index)
        .bind(visit_id)
        .bind(block_index)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[instrument(skip(conn))]
pub async fn recorded_order(
    conn: &mut SqliteConnection,
    visit_id: i64,
    knowledge_point_id: i64,
) -> Result<Option<QuestionOrder>, AppError> {
    let order = sqlx::query_as::<_, QuestionOrder>(
        "SELECT id, visit_id, knowledge_point_id, question_id, question_index FROM question_orders
         WHERE visit_id = ? AND knowledge_point_id = ?
         ORDER BY question_index
         LIMIT 1",
    )
    .bind(visit_id)
    .bind(knowledge_point_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(order)
}

/// Appends an order at the next free `question_index` for the pair.
#[instrument(skip(conn))]
pub async fn append_order(
    conn: &mut SqliteConnection,
    visit_id: i64,
    knowledge_point_id: i64,
    question_id: i64,
) -> Result<QuestionOrder, AppError> {
    let question_index = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM question_orders WHERE visit_id = ? AND knowledge_point_id = ?",
    )
    .bind(visit_id)
    .bind(knowledge_point_id)
    .fetch_one(&mut *conn)
    .await?;

    let res = sqlx::query(
        "INSERT INTO question_orders (visit_id, knowledge_point_id, question_id, question_index)
         VALUES (?, ?, ?, ?)",
    )
    .bind(visit_id)
    .bind(knowledge_point_id)
    .bind(question_id)
    .bind(question_index)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::from_constraint(e, "Question was already allocated"))?;

    Ok(QuestionOrder {
        id: res.last_insert_rowid(),
        visit_id,
        knowledge_point_id,
        question_id,
        question_index,
    })
}

#[instrument(skip(conn))]
pub async fn upsert_answer(
    conn: &mut SqliteConnection,
    user_id: i64,
    question_id: i64,
    choice_id: i64,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO answers (user_id, question_id, choice_id, updated_at) VALUES (?, ?, ?, ?)
         ON CONFLICT (user_id, question_id)
         DO UPDATE SET choice_id = excluded.choice_id, updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(question_id)
    .bind(choice_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[instrument(skip(conn))]
pub async fn answer_for(
    conn: &mut SqliteConnection,
    user_id: i64,
    question_id: i64,
) -> Result<Option<i64>, AppError> {
    let choice = sqlx::query_scalar::<_, i64>(
        "SELECT choice_id FROM answers WHERE user_id = ? AND question_id = ?",
    )
    .bind(user_id)
    .bind(question_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(choice)
}
