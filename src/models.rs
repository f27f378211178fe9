use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Course {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Module {
    pub id: i64,
    pub course_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ModuleVersion {
    pub id: i64,
    pub module_id: i64,
    pub version_number: i64,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Content,
    KnowledgePoint,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Content => "content",
            BlockKind::KnowledgePoint => "knowledge_point",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "content" => Ok(BlockKind::Content),
            "knowledge_point" => Ok(BlockKind::KnowledgePoint),
            _ => Err(AppError::Internal(format!("Unknown block kind: {}", s))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: i64,
    pub module_version_id: i64,
    pub index: i64,
    pub kind: BlockKind,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbBlock {
    pub id: i64,
    pub module_version_id: i64,
    pub block_index: i64,
    pub kind: String,
}

impl TryFrom<DbBlock> for Block {
    type Error = AppError;

    fn try_from(block: DbBlock) -> Result<Self, Self::Error> {
        Ok(Self {
            id: block.id,
            module_version_id: block.module_version_id,
            index: block.block_index,
            kind: BlockKind::parse(&block.kind)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct KnowledgePoint {
    pub id: i64,
    pub course_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Question {
    pub id: i64,
    pub knowledge_point_id: i64,
    pub content_id: i64,
    pub latest: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceView {
    pub id: i64,
    pub text: String,
    pub correct: bool,
}

/// Author-facing view of a question with all of its text resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionDetail {
    pub id: i64,
    pub knowledge_point_id: i64,
    pub latest: bool,
    pub text: String,
    pub choices: Vec<ChoiceView>,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Visit {
    pub id: i64,
    pub user_id: i64,
    pub module_version_id: i64,
    pub block_index: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QuestionOrder {
    pub id: i64,
    pub visit_id: i64,
    pub knowledge_point_id: i64,
    pub question_id: i64,
    pub question_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Point {
    pub id: i64,
    pub user_id: i64,
    pub module_id: i64,
    pub count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub point: Point,
    pub newly_awarded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub total: i64,
    pub last_awarded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct QuestionInput {
    #[validate(length(min = 1, message = "Question text cannot be empty"))]
    pub text: String,
    #[validate(length(min = 2, message = "A question needs at least two choices"))]
    pub choices: Vec<String>,
    pub correct_choice: usize,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// One block of an edit, in the order it should appear in the new version.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockInput {
    Content {
        text: String,
    },
    KnowledgePoint {
        knowledge_point_id: i64,
        /// A non-empty list replaces the pool's latest generation of questions.
        #[serde(default)]
        questions: Vec<QuestionInput>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockView {
    Content {
        index: i64,
        text: String,
    },
    KnowledgePoint {
        index: i64,
        knowledge_point_id: i64,
        name: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleView {
    pub version: ModuleVersion,
    pub blocks: Vec<BlockView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedChoice {
    pub id: i64,
    pub text: String,
    /// Only revealed once the question has been answered.
    pub correct: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderedBlock {
    Content {
        index: i64,
        text: String,
    },
    Question {
        index: i64,
        knowledge_point_id: i64,
        question_id: i64,
        text: String,
        choices: Vec<RenderedChoice>,
        selected_choice_id: Option<i64>,
        explanation: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockPage {
    pub visit: Visit,
    pub block_count: i64,
    pub block: RenderedBlock,
}
