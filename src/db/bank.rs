use sqlx::SqliteConnection;
use tracing::{info, instrument};

use crate::db::content::{content_text, put_content, reclaim_unreferenced};
use crate::error::AppError;
use crate::models::{ChoiceView, KnowledgePoint, Question, QuestionDetail};

#[derive(sqlx::FromRow)]
struct DbChoice {
    id: i64,
    text: String,
    correct: bool,
}

#[instrument(skip(conn, name))]
pub async fn create_knowledge_point(
    conn: &mut SqliteConnection,
    course_id: i64,
    name: &str,
) -> Result<KnowledgePoint, AppError> {
    let res = sqlx::query("INSERT INTO knowledge_points (course_id, name) VALUES (?, ?)")
        .bind(course_id)
        .bind(name)
        .execute(&mut *conn)
        .await?;

    Ok(KnowledgePoint {
        id: res.last_insert_rowid(),
        course_id,
        name: name.to_string(),
    })
}

#[instrument(skip(conn))]
pub async fn get_knowledge_point(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<KnowledgePoint, AppError> {
    let kp = sqlx::query_as::<_, KnowledgePoint>(
        "SELECT id, course_id, name FROM knowledge_points WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    kp.ok_or_else(|| AppError::NotFound(format!("Knowledge point with id {} not found", id)))
}

#[instrument(skip(conn))]
pub async fn knowledge_points_for_course(
    conn: &mut SqliteConnection,
    course_id: i64,
) -> Result<Vec<KnowledgePoint>, AppError> {
    let rows = sqlx::query_as::<_, KnowledgePoint>(
        "SELECT id, course_id, name FROM knowledge_points
         WHERE course_id = ?
         ORDER BY name, id",
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}

#[instrument(skip(conn, name))]
pub async fn rename_knowledge_point(
    conn: &mut SqliteConnection,
    id: i64,
    name: &str,
) -> Result<(), AppError> {
    sqlx::query("UPDATE knowledge_points SET name = ? WHERE id = ?")
        .bind(name)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Inserts a question with its choices and optional explanation.
///
/// The caller guarantees `correct_index < choice_texts.len()`; exactly that
/// choice is marked correct.
#[instrument(skip(conn, text, choice_texts, explanation), fields(choices = choice_texts.len()))]
pub async fn insert_question(
    conn: &mut SqliteConnection,
    knowledge_point_id: i64,
    text: &str,
    choice_texts: &[String],
    correct_index: usize,
    explanation: Option<&str>,
) -> Result<i64, AppError> {
    let content_id = put_content(conn, text).await?;

    let res = sqlx::query(
        "INSERT INTO questions (knowledge_point_id, content_id, latest) VALUES (?, ?, TRUE)",
    )
    .bind(knowledge_point_id)
    .bind(content_id)
    .execute(&mut *conn)
    .await?;
    let question_id = res.last_insert_rowid();

    for (i, choice) in choice_texts.iter().enumerate() {
        let choice_content = put_content(conn, choice).await?;
        sqlx::query("INSERT INTO choices (question_id, content_id, correct) VALUES (?, ?, ?)")
            .bind(question_id)
            .bind(choice_content)
            .bind(i == correct_index)
            .execute(&mut *conn)
            .await?;
    }

    if let Some(explanation) = explanation {
        let explanation_content = put_content(conn, explanation).await?;
        sqlx::query("INSERT INTO explanations (question_id, content_id) VALUES (?, ?)")
            .bind(question_id)
            .bind(explanation_content)
            .execute(&mut *conn)
            .await?;
    }

    info!(question_id, "Inserted question");
    Ok(question_id)
}

#[instrument(skip(conn))]
pub async fn mark_questions_old(
    conn: &mut SqliteConnection,
    knowledge_point_id: i64,
) -> Result<u64, AppError> {
    let res = sqlx::query("UPDATE questions SET latest = FALSE WHERE knowledge_point_id = ? AND latest")
        .bind(knowledge_point_id)
        .execute(&mut *conn)
        .await?;

    info!(retired = res.rows_affected(), "Marked questions old");
    Ok(res.rows_affected())
}

#[instrument(skip(conn))]
pub async fn questions_for(
    conn: &mut SqliteConnection,
    knowledge_point_id: i64,
    latest_only: bool,
) -> Result<Vec<Question>, AppError> {
    let query = if latest_only {
        "SELECT id, knowledge_point_id, content_id, latest FROM questions
         WHERE knowledge_point_id = ? AND latest
         ORDER BY id"
    } else {
        "SELECT id, knowledge_point_id, content_id, latest FROM questions
         WHERE knowledge_point_id = ?
         ORDER BY id"
    };

    let rows = sqlx::query_as::<_, Question>(query)
        .bind(knowledge_point_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows)
}

#[instrument(skip(conn))]
pub async fn get_question(conn: &mut SqliteConnection, id: i64) -> Result<Question, AppError> {
    let question = sqlx::query_as::<_, Question>(
        "SELECT id, knowledge_point_id, content_id, latest FROM questions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    question.ok_or_else(|| AppError::NotFound(format!("Question with id {} not found", id)))
}

#[instrument(skip(conn))]
pub async fn question_detail(
    conn: &mut SqliteConnection,
    question_id: i64,
) -> Result<QuestionDetail, AppError> {
    let question = get_question(conn, question_id).await?;
    let text = content_text(conn, question.content_id).await?;

    let choices = sqlx::query_as::<_, DbChoice>(
        "SELECT ch.id, c.text, ch.correct FROM choices ch
         JOIN contents c ON c.id = ch.content_id
         WHERE ch.question_id = ?
         ORDER BY ch.id",
    )
    .bind(question_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|c| ChoiceView {
        id: c.id,
        text: c.text,
        correct: c.correct,
    })
    .collect();

    let explanation = sqlx::query_scalar::<_, String>(
        "SELECT c.text FROM explanations e
         JOIN contents c ON c.id = e.content_id
         WHERE e.question_id = ?",
    )
    .bind(question_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(QuestionDetail {
        id: question.id,
        knowledge_point_id: question.knowledge_point_id,
        latest: question.latest,
        text,
        choices,
        explanation,
    })
}

/// Whether `choice_id` belongs to `question_id`, and if so whether it is correct.
#[instrument(skip(conn))]
pub async fn choice_correctness(
    conn: &mut SqliteConnection,
    question_id: i64,
    choice_id: i64,
) -> Result<Option<bool>, AppError> {
    let correct = sqlx::query_scalar::<_, bool>(
        "SELECT correct FROM choices WHERE id = ? AND question_id = ?",
    )
    .bind(choice_id)
    .bind(question_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(correct)
}

async fn question_content_ids(
    conn: &mut SqliteConnection,
    filter: &str,
    id: i64,
) -> Result<Vec<i64>, AppError> {
    let ids = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT q.content_id FROM questions q WHERE {filter} = ?
         UNION SELECT ch.content_id FROM choices ch
             JOIN questions q ON q.id = ch.question_id WHERE {filter} = ?
         UNION SELECT e.content_id FROM explanations e
             JOIN questions q ON q.id = e.question_id WHERE {filter} = ?"
    ))
    .bind(id)
    .bind(id)
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids)
}

#[instrument(skip(conn))]
pub async fn question_order_references(
    conn: &mut SqliteConnection,
    filter_column: &str,
    id: i64,
) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM question_orders WHERE {} = ?",
        filter_column
    ))
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

#[instrument(skip(conn))]
pub async fn block_references(
    conn: &mut SqliteConnection,
    knowledge_point_id: i64,
) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM knowledge_point_blocks WHERE knowledge_point_id = ?",
    )
    .bind(knowledge_point_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

/// Deletes a question (choices and explanation cascade) and reclaims the
/// content nothing else uses. Callers check that no question order
/// references it first.
#[instrument(skip(conn))]
pub async fn delete_question_rows(
    conn: &mut SqliteConnection,
    question_id: i64,
) -> Result<u64, AppError> {
    let scope = question_content_ids(conn, "q.id", question_id).await?;

    sqlx::query("DELETE FROM questions WHERE id = ?")
        .bind(question_id)
        .execute(&mut *conn)
        .await?;

    reclaim_unreferenced(conn, &scope).await
}

/// Deletes the pool's retired questions that were never issued, with the
/// content only they used. Returns how many questions were removed.
#[instrument(skip(conn))]
pub async fn delete_retired_unissued(
    conn: &mut SqliteConnection,
    knowledge_point_id: i64,
) -> Result<u64, AppError> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT q.id FROM questions q
         WHERE q.knowledge_point_id = ? AND NOT q.latest
           AND NOT EXISTS (SELECT 1 FROM question_orders o WHERE o.question_id = q.id)",
    )
    .bind(knowledge_point_id)
    .fetch_all(&mut *conn)
    .await?;

    for id in &ids {
        delete_question_rows(conn, *id).await?;
    }

    info!(deleted = ids.len(), "Deleted retired questions");
    Ok(ids.len() as u64)
}

#[instrument(skip(conn))]
pub async fn delete_knowledge_point_rows(
    conn: &mut SqliteConnection,
    knowledge_point_id: i64,
) -> Result<u64, AppError> {
    let scope = question_content_ids(conn, "q.knowledge_point_id", knowledge_point_id).await?;

    sqlx::query("DELETE FROM questions WHERE knowledge_point_id = ?")
        .bind(knowledge_point_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM knowledge_points WHERE id = ?")
        .bind(knowledge_point_id)
        .execute(&mut *conn)
        .await?;

    reclaim_unreferenced(conn, &scope).await
}
