//! Once-per-(visit, knowledge point) question selection.
//!
//! The first reveal of a knowledge-point block draws a question from the
//! pool's latest generation and records it as a `QuestionOrder`. Every later
//! reveal replays that record, so a student stepping back through a module
//! always sees the question they were given. Rows are only ever appended.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sqlx::SqliteConnection;
use tracing::{debug, info, instrument};

use crate::db::{bank, visits};
use crate::error::AppError;
use crate::models::{Question, Visit};

/// Source of the random index used to pick from a pool.
pub trait QuestionSelector: Send + Sync {
    /// Returns an index in `0..pool_len`. `pool_len` is never zero.
    fn select(&self, pool_len: usize) -> usize;
}

pub type SharedSelector = Arc<dyn QuestionSelector>;

/// Draws from `rand::rng()`, a CSPRNG seeded from the operating system.
/// Ordering must not be guessable, or students could anticipate answers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSelector;

impl QuestionSelector for ThreadRngSelector {
    fn select(&self, pool_len: usize) -> usize {
        rand::rng().random_range(0..pool_len)
    }
}

/// Always picks the same position, clamped to the pool.
#[derive(Debug, Clone, Copy)]
pub struct FixedSelector(pub usize);

impl QuestionSelector for FixedSelector {
    fn select(&self, pool_len: usize) -> usize {
        self.0.min(pool_len - 1)
    }
}

/// Reproducible draws for tests and simulations.
pub struct SeededSelector {
    rng: Mutex<StdRng>,
}

impl SeededSelector {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl QuestionSelector for SeededSelector {
    fn select(&self, pool_len: usize) -> usize {
        match self.rng.lock() {
            Ok(mut rng) => rng.random_range(0..pool_len),
            Err(poisoned) => poisoned.into_inner().random_range(0..pool_len),
        }
    }
}

pub fn default_selector() -> SharedSelector {
    Arc::new(ThreadRngSelector)
}

/// Returns the question shown for `knowledge_point_id` in this visit,
/// allocating one on first reveal.
#[instrument(skip(conn, selector, visit), fields(visit_id = visit.id))]
pub async fn reveal_question(
    conn: &mut SqliteConnection,
    selector: &dyn QuestionSelector,
    visit: &Visit,
    knowledge_point_id: i64,
) -> Result<Question, AppError> {
    if let Some(order) = visits::recorded_order(conn, visit.id, knowledge_point_id).await? {
        debug!(question_id = order.question_id, "Replaying recorded question");
        return bank::get_question(conn, order.question_id).await;
    }

    let pool = bank::questions_for(conn, knowledge_point_id, true).await?;
    if pool.is_empty() {
        return Err(AppError::NotFound(format!(
            "Knowledge point {} has no questions",
            knowledge_point_id
        )));
    }

    let picked = selector.select(pool.len()).min(pool.len() - 1);
    let question = pool[picked].clone();

    let order = visits::append_order(conn, visit.id, knowledge_point_id, question.id).await?;
    info!(
        question_id = question.id,
        question_index = order.question_index,
        pool_size = pool.len(),
        "Allocated question"
    );

    Ok(question)
}
