use sqlx::SqliteConnection;
use tracing::{info, instrument, warn};

use crate::db::content::reclaim_unreferenced;
use crate::error::AppError;
use crate::models::ModuleVersion;

const VERSION_COLUMNS: &str = "id, module_id, version_number, title, description";

#[instrument(skip(conn))]
pub async fn latest_version(
    conn: &mut SqliteConnection,
    module_id: i64,
) -> Result<Option<ModuleVersion>, AppError> {
    let version = sqlx::query_as::<_, ModuleVersion>(&format!(
        "SELECT {} FROM module_versions
         WHERE module_id = ?
         ORDER BY version_number DESC
         LIMIT 1",
        VERSION_COLUMNS
    ))
    .bind(module_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(version)
}

#[instrument(skip(conn))]
pub async fn require_latest_version(
    conn: &mut SqliteConnection,
    module_id: i64,
) -> Result<ModuleVersion, AppError> {
    latest_version(conn, module_id).await?.ok_or_else(|| {
        AppError::NotFound(format!("Module {} has no published version", module_id))
    })
}

#[instrument(skip(conn))]
pub async fn get_version(
    conn: &mut SqliteConnection,
    module_id: i64,
    version_number: i64,
) -> Result<ModuleVersion, AppError> {
    let version = sqlx::query_as::<_, ModuleVersion>(&format!(
        "SELECT {} FROM module_versions WHERE module_id = ? AND version_number = ?",
        VERSION_COLUMNS
    ))
    .bind(module_id)
    .bind(version_number)
    .fetch_optional(&mut *conn)
    .await?;

    version.ok_or_else(|| {
        AppError::NotFound(format!(
            "Version {} of module {} not found",
            version_number, module_id
        ))
    })
}

#[instrument(skip(conn))]
pub async fn version_numbers(
    conn: &mut SqliteConnection,
    module_id: i64,
) -> Result<Vec<i64>, AppError> {
    let numbers = sqlx::query_scalar::<_, i64>(
        "SELECT version_number FROM module_versions
         WHERE module_id = ?
         ORDER BY version_number",
    )
    .bind(module_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(numbers)
}

/// Writes version `max + 1` for the module. Two concurrent creators cannot
/// both win. The loser either hits the `(module_id, version_number)` unique
/// index or is refused the write lock, and gets a `Conflict` either way.
#[instrument(skip(conn, title, description))]
pub async fn create_version(
    conn: &mut SqliteConnection,
    module_id: i64,
    title: &str,
    description: &str,
) -> Result<ModuleVersion, AppError> {
    let current = sqlx::query_scalar::<_, Option<i64>>(
        "SELECT MAX(version_number) FROM module_versions WHERE module_id = ?",
    )
    .bind(module_id)
    .fetch_one(&mut *conn)
    .await?
    .unwrap_or(0);

    let version_number = current + 1;
    info!(version_number, "Creating module version");

    let res = sqlx::query(
        "INSERT INTO module_versions (module_id, version_number, title, description)
         VALUES (?, ?, ?, ?)",
    )
    .bind(module_id)
    .bind(version_number)
    .bind(title)
    .bind(description)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        AppError::from_constraint(
            e,
            &format!(
                "Version {} of module {} was created concurrently",
                version_number, module_id
            ),
        )
    })?;

    Ok(ModuleVersion {
        id: res.last_insert_rowid(),
        module_id,
        version_number,
        title: title.to_string(),
        description: description.to_string(),
    })
}

/// Title and description edits do not bump the version.
#[instrument(skip(conn, title, description))]
pub async fn update_version_metadata(
    conn: &mut SqliteConnection,
    version_id: i64,
    title: &str,
    description: &str,
) -> Result<(), AppError> {
    sqlx::query("UPDATE module_versions SET title = ?, description = ? WHERE id = ?")
        .bind(title)
        .bind(description)
        .bind(version_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Visits still working through the version. A visit stops pinning once its
/// user holds the module's point, which is written by completion together
/// with `block_index = block_count`.
#[instrument(skip(conn))]
pub async fn pinned_visit_count(
    conn: &mut SqliteConnection,
    module_id: i64,
    version_number: i64,
) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM visits v
         JOIN module_versions mv ON mv.id = v.module_version_id
         WHERE mv.module_id = ? AND mv.version_number = ?
           AND NOT EXISTS (
               SELECT 1 FROM points p
               WHERE p.user_id = v.user_id AND p.module_id = mv.module_id
           )",
    )
    .bind(module_id)
    .bind(version_number)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

/// Content ids bound to content blocks of the versions matched by `filter`.
async fn version_content_ids(
    conn: &mut SqliteConnection,
    filter: &str,
    id: i64,
) -> Result<Vec<i64>, AppError> {
    let ids = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT DISTINCT cb.content_id FROM content_blocks cb
         JOIN blocks b ON b.id = cb.block_id
         JOIN module_versions mv ON mv.id = b.module_version_id
         WHERE {} = ?",
        filter
    ))
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids)
}

/// Deletes the version and the content only it referenced, unless an
/// unfinished visit is pinned to it. Returns whether the version was deleted.
#[instrument(skip(conn))]
pub async fn delete_version_if_unpinned(
    conn: &mut SqliteConnection,
    module_id: i64,
    version_number: i64,
) -> Result<bool, AppError> {
    let pinned = pinned_visit_count(conn, module_id, version_number).await?;
    if pinned > 0 {
        info!(pinned, "Version is pinned by visits, keeping it");
        return Ok(false);
    }

    let version = match get_version(conn, module_id, version_number).await {
        Ok(version) => version,
        Err(AppError::NotFound(_)) => {
            warn!("Version already gone");
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    let scope = version_content_ids(conn, "mv.id", version.id).await?;

    sqlx::query("DELETE FROM module_versions WHERE id = ?")
        .bind(version.id)
        .execute(&mut *conn)
        .await?;

    reclaim_unreferenced(conn, &scope).await?;

    info!("Deleted unpinned module version");
    Ok(true)
}

/// Removes the module with every version, block and visit under it, then
/// reclaims the content that only this module used.
#[instrument(skip(conn))]
pub async fn delete_module_rows(
    conn: &mut SqliteConnection,
    module_id: i64,
) -> Result<u64, AppError> {
    let scope = version_content_ids(conn, "mv.module_id", module_id).await?;

    let res = sqlx::query("DELETE FROM modules WHERE id = ?")
        .bind(module_id)
        .execute(&mut *conn)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Module with id {} not found",
            module_id
        )));
    }

    reclaim_unreferenced(conn, &scope).await
}
