use sqlx::SqliteConnection;
use tracing::instrument;

use crate::error::AppError;
use crate::models::{Block, BlockKind, DbBlock};

#[instrument(skip(conn))]
pub async fn insert_block(
    conn: &mut SqliteConnection,
    version_id: i64,
    index: i64,
    kind: BlockKind,
) -> Result<i64, AppError> {
    let res = sqlx::query("INSERT INTO blocks (module_version_id, block_index, kind) VALUES (?, ?, ?)")
        .bind(version_id)
        .bind(index)
        .bind(kind.as_str())
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            AppError::from_constraint(e, &format!("Block index {} is already taken", index))
        })?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(conn))]
pub async fn bind_content(
    conn: &mut SqliteConnection,
    block_id: i64,
    content_id: i64,
) -> Result<(), AppError> {
    sqlx::query("INSERT INTO content_blocks (block_id, content_id) VALUES (?, ?)")
        .bind(block_id)
        .bind(content_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[instrument(skip(conn))]
pub async fn bind_knowledge_point(
    conn: &mut SqliteConnection,
    block_id: i64,
    knowledge_point_id: i64,
) -> Result<(), AppError> {
    sqlx::query("INSERT INTO knowledge_point_blocks (block_id, knowledge_point_id) VALUES (?, ?)")
        .bind(block_id)
        .bind(knowledge_point_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            AppError::from_constraint(
                e,
                &format!("Knowledge point {} does not exist", knowledge_point_id),
            )
        })?;

    Ok(())
}

#[instrument(skip(conn))]
pub async fn blocks_for_version(
    conn: &mut SqliteConnection,
    version_id: i64,
) -> Result<Vec<Block>, AppError> {
    let rows = sqlx::query_as::<_, DbBlock>(
        "SELECT id, module_version_id, block_index, kind FROM blocks
         WHERE module_version_id = ?
         ORDER BY block_index",
    )
    .bind(version_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(Block::try_from).collect()
}

#[instrument(skip(conn))]
pub async fn block_count(conn: &mut SqliteConnection, version_id: i64) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM blocks WHERE module_version_id = ?")
        .bind(version_id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(count)
}

#[instrument(skip(conn))]
pub async fn block_at(
    conn: &mut SqliteConnection,
    version_id: i64,
    index: i64,
) -> Result<Block, AppError> {
    let row = sqlx::query_as::<_, DbBlock>(
        "SELECT id, module_version_id, block_index, kind FROM blocks
         WHERE module_version_id = ? AND block_index = ?",
    )
    .bind(version_id)
    .bind(index)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(block) => Block::try_from(block),
        None => Err(AppError::NotFound(format!(
            "Block {} not found in module version {}",
            index, version_id
        ))),
    }
}

#[instrument(skip(conn))]
pub async fn content_of_block(conn: &mut SqliteConnection, block_id: i64) -> Result<i64, AppError> {
    let id = sqlx::query_scalar::<_, i64>("SELECT content_id FROM content_blocks WHERE block_id = ?")
        .bind(block_id)
        .fetch_optional(&mut *conn)
        .await?;

    id.ok_or_else(|| AppError::Internal(format!("Content block {} has no content", block_id)))
}

#[instrument(skip(conn))]
pub async fn knowledge_point_of_block(
    conn: &mut SqliteConnection,
    block_id: i64,
) -> Result<i64, AppError> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT knowledge_point_id FROM knowledge_point_blocks WHERE block_id = ?",
    )
    .bind(block_id)
    .fetch_optional(&mut *conn)
    .await?;

    id.ok_or_else(|| {
        AppError::Internal(format!(
            "Knowledge point block {} has no knowledge point",
            block_id
        ))
    })
}

/// Knowledge point ids of the version's question blocks, in block order.
#[instrument(skip(conn))]
pub async fn knowledge_points_in_version(
    conn: &mut SqliteConnection,
    version_id: i64,
) -> Result<Vec<i64>, AppError> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT kpb.knowledge_point_id FROM knowledge_point_blocks kpb
         JOIN blocks b ON b.id = kpb.block_id
         WHERE b.module_version_id = ?
         ORDER BY b.block_index",
    )
    .bind(version_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids)
}
