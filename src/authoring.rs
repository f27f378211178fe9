//! Author-facing operations: module editing and the question bank.
//!
//! Every public function here is one unit of work. It opens a transaction,
//! validates its input before writing anything, and commits only if every
//! step succeeded.

use std::collections::{BTreeSet, HashSet};

use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument};

use crate::db::{bank, blocks, content, courses, versions};
use crate::error::AppError;
use crate::models::{
    BlockInput, BlockKind, BlockView, Course, KnowledgePoint, ModuleVersion, ModuleView,
    QuestionDetail, QuestionInput,
};

fn validate_title(title: &str) -> Result<(), AppError> {
    if title.trim().is_empty() {
        return Err(AppError::Validation("Title cannot be empty".to_string()));
    }
    Ok(())
}

/// Checks the invariants `bank::insert_question` relies on.
pub fn validate_question(question: &QuestionInput) -> Result<(), AppError> {
    if question.text.is_empty() {
        return Err(AppError::Validation("Question text cannot be empty".to_string()));
    }
    if question.choices.len() < 2 {
        return Err(AppError::Validation(
            "A question needs at least two choices".to_string(),
        ));
    }
    if question.choices.iter().any(|c| c.is_empty()) {
        return Err(AppError::Validation("Choices cannot be empty".to_string()));
    }
    if question.correct_choice >= question.choices.len() {
        return Err(AppError::Validation(format!(
            "Correct choice {} is out of range for {} choices",
            question.correct_choice,
            question.choices.len()
        )));
    }
    Ok(())
}

fn explanation_of(question: &QuestionInput) -> Option<&str> {
    question
        .explanation
        .as_deref()
        .filter(|text| !text.trim().is_empty())
}

async fn validate_blocks(
    conn: &mut SqliteConnection,
    course_id: i64,
    input: &[BlockInput],
) -> Result<(), AppError> {
    let mut regenerated = HashSet::new();

    for (index, block) in input.iter().enumerate() {
        match block {
            BlockInput::Content { text } => {
                if text.is_empty() {
                    return Err(AppError::Validation(format!(
                        "Block {} has no content",
                        index
                    )));
                }
            }
            BlockInput::KnowledgePoint {
                knowledge_point_id,
                questions,
            } => {
                let kp = match bank::get_knowledge_point(conn, *knowledge_point_id).await {
                    Ok(kp) => kp,
                    Err(AppError::NotFound(msg)) => return Err(AppError::Validation(msg)),
                    Err(e) => return Err(e),
                };
                if kp.course_id != course_id {
                    return Err(AppError::Validation(format!(
                        "Knowledge point {} belongs to another course",
                        kp.id
                    )));
                }

                if questions.is_empty() {
                    if bank::questions_for(conn, kp.id, true).await?.is_empty() {
                        return Err(AppError::Validation(format!(
                            "Knowledge point {} has no questions",
                            kp.id
                        )));
                    }
                } else {
                    if !regenerated.insert(kp.id) {
                        return Err(AppError::Validation(format!(
                            "Questions for knowledge point {} supplied more than once",
                            kp.id
                        )));
                    }
                    for question in questions {
                        validate_question(question)?;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Inserts the version's blocks in index order together with their bindings.
#[instrument(skip(conn, input), fields(blocks = input.len()))]
pub async fn replace_blocks(
    conn: &mut SqliteConnection,
    version_id: i64,
    input: &[BlockInput],
) -> Result<(), AppError> {
    for (index, block) in input.iter().enumerate() {
        let index = index as i64;
        match block {
            BlockInput::Content { text } => {
                let block_id = blocks::insert_block(conn, version_id, index, BlockKind::Content).await?;
                let content_id = content::put_content(conn, text).await?;
                blocks::bind_content(conn, block_id, content_id).await?;
            }
            BlockInput::KnowledgePoint {
                knowledge_point_id,
                questions,
            } => {
                if !questions.is_empty() {
                    bank::mark_questions_old(conn, *knowledge_point_id).await?;
                    for question in questions {
                        bank::insert_question(
                            conn,
                            *knowledge_point_id,
                            &question.text,
                            &question.choices,
                            question.correct_choice,
                            explanation_of(question),
                        )
                        .await?;
                    }
                }

                let block_id =
                    blocks::insert_block(conn, version_id, index, BlockKind::KnowledgePoint).await?;
                blocks::bind_knowledge_point(conn, block_id, *knowledge_point_id).await?;
            }
        }
    }

    Ok(())
}

async fn owned_module(
    conn: &mut SqliteConnection,
    user_id: i64,
    module_id: i64,
) -> Result<i64, AppError> {
    let module = courses::get_module(conn, module_id).await?;
    courses::require_owner(conn, module.course_id, user_id).await?;
    Ok(module.course_id)
}

#[instrument(skip(pool, name))]
pub async fn create_course(pool: &Pool<Sqlite>, user_id: i64, name: &str) -> Result<Course, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("Course name cannot be empty".to_string()));
    }

    let mut tx = pool.begin().await?;
    let id = courses::create_course(&mut tx, user_id, name).await?;
    tx.commit().await?;

    Ok(Course {
        id,
        owner_id: user_id,
        name: name.to_string(),
    })
}

#[instrument(skip(pool, title, description, input), fields(blocks = input.len()))]
pub async fn create_module(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
    title: &str,
    description: &str,
    input: &[BlockInput],
) -> Result<ModuleVersion, AppError> {
    let mut tx = pool.begin().await?;

    courses::require_owner(&mut tx, course_id, user_id).await?;
    validate_title(title)?;
    validate_blocks(&mut tx, course_id, input).await?;

    let module_id = courses::create_module(&mut tx, course_id).await?;
    let version = versions::create_version(&mut tx, module_id, title, description).await?;
    replace_blocks(&mut tx, version.id, input).await?;

    tx.commit().await?;
    info!(module_id, "Created module");
    Ok(version)
}

/// Publishes a new version of the module and drops the previous one if no
/// visit is pinned to it.
///
/// Only the immediately preceding version is considered. A version skipped
/// here because it was pinned is left alone by later edits; use
/// [`sweep_unpinned_versions`] to collect those.
#[instrument(skip(pool, title, description, input), fields(blocks = input.len()))]
pub async fn apply_module_edit(
    pool: &Pool<Sqlite>,
    user_id: i64,
    module_id: i64,
    title: &str,
    description: &str,
    input: &[BlockInput],
) -> Result<ModuleVersion, AppError> {
    let mut tx = pool.begin().await?;

    let course_id = owned_module(&mut tx, user_id, module_id).await?;
    validate_title(title)?;
    validate_blocks(&mut tx, course_id, input).await?;

    let previous = versions::latest_version(&mut tx, module_id).await?;
    let version = versions::create_version(&mut tx, module_id, title, description).await?;
    replace_blocks(&mut tx, version.id, input).await?;

    if let Some(previous) = previous {
        let deleted =
            versions::delete_version_if_unpinned(&mut tx, module_id, previous.version_number)
                .await?;
        info!(
            previous = previous.version_number,
            deleted, "Checked previous version"
        );
    }

    tx.commit().await?;
    Ok(version)
}

#[instrument(skip(pool, title, description))]
pub async fn update_module_metadata(
    pool: &Pool<Sqlite>,
    user_id: i64,
    module_id: i64,
    title: &str,
    description: &str,
) -> Result<ModuleVersion, AppError> {
    let mut tx = pool.begin().await?;

    owned_module(&mut tx, user_id, module_id).await?;
    validate_title(title)?;

    let latest = versions::require_latest_version(&mut tx, module_id).await?;
    versions::update_version_metadata(&mut tx, latest.id, title, description).await?;

    tx.commit().await?;
    Ok(ModuleVersion {
        title: title.to_string(),
        description: description.to_string(),
        ..latest
    })
}

/// Deletes the module and every version under it. Returns how many content
/// rows were reclaimed.
#[instrument(skip(pool))]
pub async fn delete_module(pool: &Pool<Sqlite>, user_id: i64, module_id: i64) -> Result<u64, AppError> {
    let mut tx = pool.begin().await?;

    owned_module(&mut tx, user_id, module_id).await?;
    let reclaimed = versions::delete_module_rows(&mut tx, module_id).await?;

    tx.commit().await?;
    info!(reclaimed, "Deleted module");
    Ok(reclaimed)
}

/// Deletes every older version of the module that no visit is pinned to,
/// then the never-issued retired questions of the pools the module uses.
/// Returns the version numbers that were removed.
#[instrument(skip(pool))]
pub async fn sweep_unpinned_versions(
    pool: &Pool<Sqlite>,
    user_id: i64,
    module_id: i64,
) -> Result<Vec<i64>, AppError> {
    let mut tx = pool.begin().await?;

    owned_module(&mut tx, user_id, module_id).await?;
    let latest = versions::require_latest_version(&mut tx, module_id).await?;

    let mut deleted = Vec::new();
    let mut pools = BTreeSet::new();
    for number in versions::version_numbers(&mut tx, module_id).await? {
        let version = versions::get_version(&mut tx, module_id, number).await?;
        pools.extend(blocks::knowledge_points_in_version(&mut tx, version.id).await?);

        if number == latest.version_number {
            continue;
        }
        if versions::delete_version_if_unpinned(&mut tx, module_id, number).await? {
            deleted.push(number);
        }
    }

    let mut questions = 0;
    for kp_id in pools {
        questions += bank::delete_retired_unissued(&mut tx, kp_id).await?;
    }

    tx.commit().await?;
    info!(deleted = ?deleted, questions, "Swept unpinned versions");
    Ok(deleted)
}

pub(crate) async fn module_view(
    conn: &mut SqliteConnection,
    version: ModuleVersion,
) -> Result<ModuleView, AppError> {
    let mut views = Vec::new();
    for block in blocks::blocks_for_version(conn, version.id).await? {
        let view = match block.kind {
            BlockKind::Content => {
                let content_id = blocks::content_of_block(conn, block.id).await?;
                BlockView::Content {
                    index: block.index,
                    text: content::content_text(conn, content_id).await?,
                }
            }
            BlockKind::KnowledgePoint => {
                let kp_id = blocks::knowledge_point_of_block(conn, block.id).await?;
                let kp = bank::get_knowledge_point(conn, kp_id).await?;
                BlockView::KnowledgePoint {
                    index: block.index,
                    knowledge_point_id: kp.id,
                    name: kp.name,
                }
            }
        };
        views.push(view);
    }

    Ok(ModuleView {
        version,
        blocks: views,
    })
}

/// Loads a version for rendering, the latest one when `version_number` is
/// `None`.
#[instrument(skip(pool))]
pub async fn load_module_version(
    pool: &Pool<Sqlite>,
    module_id: i64,
    version_number: Option<i64>,
) -> Result<ModuleView, AppError> {
    let mut conn = pool.acquire().await?;

    let version = match version_number {
        Some(number) => versions::get_version(&mut conn, module_id, number).await?,
        None => versions::require_latest_version(&mut conn, module_id).await?,
    };

    module_view(&mut conn, version).await
}

#[instrument(skip(pool, name))]
pub async fn create_knowledge_point(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
    name: &str,
) -> Result<KnowledgePoint, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation(
            "Knowledge point name cannot be empty".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    courses::require_owner(&mut tx, course_id, user_id).await?;
    let kp = bank::create_knowledge_point(&mut tx, course_id, name).await?;
    tx.commit().await?;

    Ok(kp)
}

#[instrument(skip(pool))]
pub async fn list_knowledge_points(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
) -> Result<Vec<KnowledgePoint>, AppError> {
    let mut conn = pool.acquire().await?;
    courses::require_owner(&mut conn, course_id, user_id).await?;
    bank::knowledge_points_for_course(&mut conn, course_id).await
}

async fn owned_knowledge_point(
    conn: &mut SqliteConnection,
    user_id: i64,
    knowledge_point_id: i64,
) -> Result<KnowledgePoint, AppError> {
    let kp = bank::get_knowledge_point(conn, knowledge_point_id).await?;
    courses::require_owner(conn, kp.course_id, user_id).await?;
    Ok(kp)
}

#[instrument(skip(pool, name))]
pub async fn rename_knowledge_point(
    pool: &Pool<Sqlite>,
    user_id: i64,
    knowledge_point_id: i64,
    name: &str,
) -> Result<KnowledgePoint, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation(
            "Knowledge point name cannot be empty".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let kp = owned_knowledge_point(&mut tx, user_id, knowledge_point_id).await?;
    bank::rename_knowledge_point(&mut tx, kp.id, name).await?;
    tx.commit().await?;

    Ok(KnowledgePoint {
        name: name.to_string(),
        ..kp
    })
}

/// Removes a pool and its questions. Refused while a block or an issued
/// question order still uses it.
#[instrument(skip(pool))]
pub async fn delete_knowledge_point(
    pool: &Pool<Sqlite>,
    user_id: i64,
    knowledge_point_id: i64,
) -> Result<u64, AppError> {
    let mut tx = pool.begin().await?;

    let kp = owned_knowledge_point(&mut tx, user_id, knowledge_point_id).await?;
    if bank::block_references(&mut tx, kp.id).await? > 0 {
        return Err(AppError::Conflict(format!(
            "Knowledge point {} is used by module blocks",
            kp.id
        )));
    }
    if bank::question_order_references(&mut tx, "knowledge_point_id", kp.id).await? > 0 {
        return Err(AppError::Conflict(format!(
            "Knowledge point {} has questions issued to students",
            kp.id
        )));
    }

    let reclaimed = bank::delete_knowledge_point_rows(&mut tx, kp.id).await?;
    tx.commit().await?;
    Ok(reclaimed)
}

#[instrument(skip(pool, question))]
pub async fn add_question(
    pool: &Pool<Sqlite>,
    user_id: i64,
    knowledge_point_id: i64,
    question: &QuestionInput,
) -> Result<QuestionDetail, AppError> {
    validate_question(question)?;

    let mut tx = pool.begin().await?;
    let kp = owned_knowledge_point(&mut tx, user_id, knowledge_point_id).await?;
    let question_id = bank::insert_question(
        &mut tx,
        kp.id,
        &question.text,
        &question.choices,
        question.correct_choice,
        explanation_of(question),
    )
    .await?;
    let detail = bank::question_detail(&mut tx, question_id).await?;
    tx.commit().await?;

    Ok(detail)
}

/// Retires the pool's current generation. Retired questions stay
/// addressable by orders already issued but are no longer drawn.
#[instrument(skip(pool))]
pub async fn retire_questions(
    pool: &Pool<Sqlite>,
    user_id: i64,
    knowledge_point_id: i64,
) -> Result<u64, AppError> {
    let mut tx = pool.begin().await?;
    let kp = owned_knowledge_point(&mut tx, user_id, knowledge_point_id).await?;
    let retired = bank::mark_questions_old(&mut tx, kp.id).await?;
    tx.commit().await?;
    Ok(retired)
}

#[instrument(skip(pool))]
pub async fn list_questions(
    pool: &Pool<Sqlite>,
    user_id: i64,
    knowledge_point_id: i64,
    latest_only: bool,
) -> Result<Vec<QuestionDetail>, AppError> {
    let mut conn = pool.acquire().await?;
    let kp = owned_knowledge_point(&mut conn, user_id, knowledge_point_id).await?;

    let mut details = Vec::new();
    for question in bank::questions_for(&mut conn, kp.id, latest_only).await? {
        details.push(bank::question_detail(&mut conn, question.id).await?);
    }
    Ok(details)
}

#[instrument(skip(pool))]
pub async fn get_question(
    pool: &Pool<Sqlite>,
    user_id: i64,
    question_id: i64,
) -> Result<QuestionDetail, AppError> {
    let mut conn = pool.acquire().await?;
    let question = bank::get_question(&mut conn, question_id).await?;
    owned_knowledge_point(&mut conn, user_id, question.knowledge_point_id).await?;
    bank::question_detail(&mut conn, question_id).await
}

/// Deletes a question nobody has been shown yet. Returns how many content
/// rows were reclaimed.
#[instrument(skip(pool))]
pub async fn delete_question(
    pool: &Pool<Sqlite>,
    user_id: i64,
    question_id: i64,
) -> Result<u64, AppError> {
    let mut tx = pool.begin().await?;

    let question = bank::get_question(&mut tx, question_id).await?;
    owned_knowledge_point(&mut tx, user_id, question.knowledge_point_id).await?;
    if bank::question_order_references(&mut tx, "question_id", question.id).await? > 0 {
        return Err(AppError::Conflict(format!(
            "Question {} has been issued to students",
            question.id
        )));
    }

    let reclaimed = bank::delete_question_rows(&mut tx, question.id).await?;
    tx.commit().await?;
    Ok(reclaimed)
}
