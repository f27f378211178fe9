use sqlx::SqliteConnection;
use tracing::{info, instrument, warn};

use crate::error::AppError;
use crate::models::{Course, Module};

#[instrument(skip(conn, name))]
pub async fn create_course(
    conn: &mut SqliteConnection,
    owner_id: i64,
    name: &str,
) -> Result<i64, AppError> {
    info!("Creating course");
    let res = sqlx::query("INSERT INTO courses (owner_id, name) VALUES (?, ?)")
        .bind(owner_id)
        .bind(name)
        .execute(&mut *conn)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(conn))]
pub async fn get_course(conn: &mut SqliteConnection, id: i64) -> Result<Course, AppError> {
    let course = sqlx::query_as::<_, Course>("SELECT id, owner_id, name FROM courses WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    course.ok_or_else(|| AppError::NotFound(format!("Course with id {} not found", id)))
}

/// Loads the course and fails unless `user_id` owns it.
#[instrument(skip(conn))]
pub async fn require_owner(
    conn: &mut SqliteConnection,
    course_id: i64,
    user_id: i64,
) -> Result<Course, AppError> {
    let course = get_course(conn, course_id).await?;
    if course.owner_id != user_id {
        warn!(course_id, user_id, "User does not own course");
        return Err(AppError::Authorization(format!(
            "User {} does not own course {}",
            user_id, course_id
        )));
    }
    Ok(course)
}

#[instrument(skip(conn))]
pub async fn create_module(conn: &mut SqliteConnection, course_id: i64) -> Result<i64, AppError> {
    let res = sqlx::query("INSERT INTO modules (course_id) VALUES (?)")
        .bind(course_id)
        .execute(&mut *conn)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(conn))]
pub async fn get_module(conn: &mut SqliteConnection, id: i64) -> Result<Module, AppError> {
    let module = sqlx::query_as::<_, Module>("SELECT id, course_id FROM modules WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    module.ok_or_else(|| AppError::NotFound(format!("Module with id {} not found", id)))
}
