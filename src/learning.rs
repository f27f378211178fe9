//! Student-facing operations: visiting a module, answering its questions,
//! and completing it for points.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument, warn};

use crate::allocator::{QuestionSelector, reveal_question};
use crate::db::{bank, blocks, courses, points, visits};
use crate::error::AppError;
use crate::models::{
    Block, BlockKind, BlockPage, Completion, LeaderboardEntry, RenderedBlock, RenderedChoice,
    Visit,
};
use crate::scoring::compute_points;

#[instrument(skip(pool))]
pub async fn start_visit(
    pool: &Pool<Sqlite>,
    user_id: i64,
    module_id: i64,
) -> Result<Visit, AppError> {
    let mut tx = pool.begin().await?;
    courses::get_module(&mut tx, module_id).await?;
    let visit = visits::get_or_create_visit(&mut tx, user_id, module_id).await?;
    tx.commit().await?;
    Ok(visit)
}

/// The stored choice for the question allocated to a knowledge point in this
/// visit, if it has been both revealed and answered.
async fn answered_choice(
    conn: &mut SqliteConnection,
    visit: &Visit,
    knowledge_point_id: i64,
) -> Result<Option<(i64, i64)>, AppError> {
    let Some(order) = visits::recorded_order(conn, visit.id, knowledge_point_id).await? else {
        return Ok(None);
    };

    let choice = visits::answer_for(conn, visit.user_id, order.question_id).await?;
    Ok(choice.map(|choice_id| (order.question_id, choice_id)))
}

/// Moving past a question block requires having answered it.
async fn ensure_frontier_answered(conn: &mut SqliteConnection, visit: &Visit) -> Result<(), AppError> {
    let block = blocks::block_at(conn, visit.module_version_id, visit.block_index).await?;
    if block.kind != BlockKind::KnowledgePoint {
        return Ok(());
    }

    let kp_id = blocks::knowledge_point_of_block(conn, block.id).await?;
    if answered_choice(conn, visit, kp_id).await?.is_none() {
        warn!(block_index = visit.block_index, "Question not answered yet");
        return Err(AppError::Conflict(format!(
            "Block {} must be answered before moving on",
            visit.block_index
        )));
    }

    Ok(())
}

async fn render_block(
    conn: &mut SqliteConnection,
    selector: &dyn QuestionSelector,
    visit: &Visit,
    block: &Block,
) -> Result<RenderedBlock, AppError> {
    match block.kind {
        BlockKind::Content => {
            let content_id = blocks::content_of_block(conn, block.id).await?;
            Ok(RenderedBlock::Content {
                index: block.index,
                text: crate::db::content::content_text(conn, content_id).await?,
            })
        }
        BlockKind::KnowledgePoint => {
            let kp_id = blocks::knowledge_point_of_block(conn, block.id).await?;
            let question = reveal_question(conn, selector, visit, kp_id).await?;
            let detail = bank::question_detail(conn, question.id).await?;
            let selected = visits::answer_for(conn, visit.user_id, question.id).await?;
            let answered = selected.is_some();

            Ok(RenderedBlock::Question {
                index: block.index,
                knowledge_point_id: kp_id,
                question_id: question.id,
                text: detail.text,
                choices: detail
                    .choices
                    .into_iter()
                    .map(|c| RenderedChoice {
                        id: c.id,
                        text: c.text,
                        correct: answered.then_some(c.correct),
                    })
                    .collect(),
                selected_choice_id: selected,
                explanation: if answered { detail.explanation } else { None },
            })
        }
    }
}

/// Opens block `index` of the module for the user, creating the visit on
/// first access and advancing its frontier by at most one block.
#[instrument(skip(pool, selector))]
pub async fn take_block(
    pool: &Pool<Sqlite>,
    selector: &dyn QuestionSelector,
    user_id: i64,
    module_id: i64,
    index: i64,
) -> Result<BlockPage, AppError> {
    let mut tx = pool.begin().await?;

    courses::get_module(&mut tx, module_id).await?;
    let visit = visits::get_or_create_visit(&mut tx, user_id, module_id).await?;
    let block_count = blocks::block_count(&mut tx, visit.module_version_id).await?;

    if index == visit.block_index + 1 && index < block_count {
        ensure_frontier_answered(&mut tx, &visit).await?;
    }

    let visit = visits::advance(&mut tx, &visit, index, block_count).await?;
    let block = blocks::block_at(&mut tx, visit.module_version_id, index).await?;
    let rendered = render_block(&mut tx, selector, &visit, &block).await?;

    tx.commit().await?;
    Ok(BlockPage {
        visit,
        block_count,
        block: rendered,
    })
}

/// Records the user's choice for the question shown at block `index`.
/// Answering again overwrites the previous choice.
#[instrument(skip(pool, selector))]
pub async fn submit_answer(
    pool: &Pool<Sqlite>,
    selector: &dyn QuestionSelector,
    user_id: i64,
    module_id: i64,
    index: i64,
    choice_id: i64,
    now: DateTime<Utc>,
) -> Result<BlockPage, AppError> {
    let mut tx = pool.begin().await?;

    let visit = visits::require_visit(&mut tx, user_id, module_id).await?;
    if index < 0 || index > visit.block_index {
        return Err(AppError::Authorization(format!(
            "Block {} is not unlocked yet",
            index
        )));
    }

    let block_count = blocks::block_count(&mut tx, visit.module_version_id).await?;
    let block = blocks::block_at(&mut tx, visit.module_version_id, index).await?;
    if block.kind != BlockKind::KnowledgePoint {
        return Err(AppError::Validation(format!("Block {} is not a question", index)));
    }

    let kp_id = blocks::knowledge_point_of_block(&mut tx, block.id).await?;
    let order = visits::recorded_order(&mut tx, visit.id, kp_id)
        .await?
        .ok_or_else(|| {
            AppError::Conflict(format!("Question at block {} has not been shown yet", index))
        })?;

    if bank::choice_correctness(&mut tx, order.question_id, choice_id)
        .await?
        .is_none()
    {
        return Err(AppError::Validation(format!(
            "Choice {} does not belong to question {}",
            choice_id, order.question_id
        )));
    }

    visits::upsert_answer(&mut tx, user_id, order.question_id, choice_id, now).await?;
    let rendered = render_block(&mut tx, selector, &visit, &block).await?;

    tx.commit().await?;
    info!(question_id = order.question_id, "Answer recorded");
    Ok(BlockPage {
        visit,
        block_count,
        block: rendered,
    })
}

/// Scores the visit and awards points once the last block has been reached.
/// Completing an already completed module changes nothing.
#[instrument(skip(pool))]
pub async fn complete_module(
    pool: &Pool<Sqlite>,
    user_id: i64,
    module_id: i64,
    now: DateTime<Utc>,
) -> Result<Completion, AppError> {
    let mut tx = pool.begin().await?;

    // The finished visit may be gone with its version; the point outlives it.
    if let Some(point) = points::get_point(&mut tx, user_id, module_id).await? {
        info!("Module already completed");
        return Ok(Completion {
            point,
            newly_awarded: false,
        });
    }

    let visit = visits::require_visit(&mut tx, user_id, module_id).await?;
    let block_count = blocks::block_count(&mut tx, visit.module_version_id).await?;

    if visit.block_index < block_count - 1 {
        return Err(AppError::Conflict(format!(
            "Module {} has not been worked through yet",
            module_id
        )));
    }

    let kp_ids = blocks::knowledge_points_in_version(&mut tx, visit.module_version_id).await?;
    let question_count = kp_ids.len() as i64;
    let mut correct_answers = 0;
    for kp_id in kp_ids {
        if let Some((question_id, choice_id)) = answered_choice(&mut tx, &visit, kp_id).await? {
            if bank::choice_correctness(&mut tx, question_id, choice_id).await? == Some(true) {
                correct_answers += 1;
            }
        }
    }

    let count = compute_points(block_count, question_count, correct_answers);
    info!(
        block_count,
        question_count, correct_answers, count, "Scored module"
    );

    visits::set_block_index(&mut tx, visit.id, block_count).await?;
    let newly_awarded = points::insert_point(&mut tx, user_id, module_id, count, now).await?;
    let point = points::get_point(&mut tx, user_id, module_id)
        .await?
        .ok_or_else(|| AppError::Internal("Point row missing after insert".to_string()))?;

    tx.commit().await?;
    Ok(Completion {
        point,
        newly_awarded,
    })
}

#[instrument(skip(pool))]
pub async fn leaderboard(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<LeaderboardEntry>, AppError> {
    let mut conn = pool.acquire().await?;
    courses::get_course(&mut conn, course_id).await?;
    points::leaderboard(&mut conn, course_id).await
}
