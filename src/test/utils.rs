use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Once;
use std::time::Duration;

use rocket::local::asynchronous::Client;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::allocator::SharedSelector;
use crate::error::AppError;
use crate::models::{BlockInput, QuestionInput, RenderedBlock, RenderedChoice};
use crate::{authoring, db, init_rocket};

static INIT: Once = Once::new();

pub const AUTHOR: i64 = 1;
pub const STUDENT: i64 = 100;
pub const OTHER_STUDENT: i64 = 101;

/// A single-connection in-memory database with the schema applied. The
/// connection is never recycled, so the database lives as long as the pool.
pub async fn test_pool() -> Result<Pool<Sqlite>, AppError> {
    INIT.call_once(|| {
        let _ = env_logger::builder()
            .parse_filters("debug")
            .is_test(true)
            .try_init();
    });

    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    db::migrate(&pool).await?;
    Ok(pool)
}

/// A file-backed database for tests that need two live connections. Lock
/// waits are kept short so contention surfaces quickly.
pub async fn file_test_pool(name: &str) -> Result<(Pool<Sqlite>, PathBuf), AppError> {
    let path = std::env::temp_dir().join(format!(
        "course-engine-{}-{}.db",
        name,
        std::process::id()
    ));
    remove_db_files(&path);

    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(50));
    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await?;

    db::migrate(&pool).await?;
    Ok((pool, path))
}

pub fn remove_db_files(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
    }
}

pub fn mcq(text: &str, choices: &[&str], correct_choice: usize) -> QuestionInput {
    QuestionInput {
        text: text.to_string(),
        choices: choices.iter().map(|c| c.to_string()).collect(),
        correct_choice,
        explanation: None,
    }
}

pub fn text_block(text: &str) -> BlockInput {
    BlockInput::Content {
        text: text.to_string(),
    }
}

pub fn kp_block(knowledge_point_id: i64) -> BlockInput {
    BlockInput::KnowledgePoint {
        knowledge_point_id,
        questions: Vec::new(),
    }
}

/// Choices of a rendered question block.
pub fn rendered_choices(block: &RenderedBlock) -> &[RenderedChoice] {
    match block {
        RenderedBlock::Question { choices, .. } => choices,
        other => panic!("Expected a question block, got {:?}", other),
    }
}

pub fn rendered_question_id(block: &RenderedBlock) -> i64 {
    match block {
        RenderedBlock::Question { question_id, .. } => *question_id,
        other => panic!("Expected a question block, got {:?}", other),
    }
}

pub enum TestBlock {
    Content(String),
    KnowledgePoint(String),
}

pub fn content(text: &str) -> TestBlock {
    TestBlock::Content(text.to_string())
}

pub fn question_slot(knowledge_point: &str) -> TestBlock {
    TestBlock::KnowledgePoint(knowledge_point.to_string())
}

pub struct TestCourse {
    pub name: String,
    pub owner_id: i64,
}

pub struct TestKnowledgePoint {
    pub course: String,
    pub name: String,
    pub questions: Vec<QuestionInput>,
}

pub struct TestModule {
    pub course: String,
    pub title: String,
    pub blocks: Vec<TestBlock>,
}

#[derive(Default)]
pub struct TestDbBuilder {
    courses: Vec<TestCourse>,
    knowledge_points: Vec<TestKnowledgePoint>,
    modules: Vec<TestModule>,
}

impl TestDbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn course(mut self, name: &str) -> Self {
        self.courses.push(TestCourse {
            name: name.to_string(),
            owner_id: AUTHOR,
        });
        self
    }

    pub fn course_owned_by(mut self, name: &str, owner_id: i64) -> Self {
        self.courses.push(TestCourse {
            name: name.to_string(),
            owner_id,
        });
        self
    }

    pub fn knowledge_point(
        mut self,
        course: &str,
        name: &str,
        questions: Vec<QuestionInput>,
    ) -> Self {
        self.knowledge_points.push(TestKnowledgePoint {
            course: course.to_string(),
            name: name.to_string(),
            questions,
        });
        self
    }

    pub fn module(mut self, course: &str, title: &str, blocks: Vec<TestBlock>) -> Self {
        self.modules.push(TestModule {
            course: course.to_string(),
            title: title.to_string(),
            blocks,
        });
        self
    }

    pub async fn build(self) -> Result<TestDb, AppError> {
        let pool = test_pool().await?;

        let mut course_ids: HashMap<String, (i64, i64)> = HashMap::new();
        let mut knowledge_point_ids: HashMap<String, i64> = HashMap::new();
        let mut module_ids: HashMap<String, i64> = HashMap::new();

        for course in &self.courses {
            let created = authoring::create_course(&pool, course.owner_id, &course.name).await?;
            course_ids.insert(course.name.clone(), (created.id, course.owner_id));
        }

        for kp in &self.knowledge_points {
            let (course_id, owner_id) = course_ids[&kp.course];
            let created =
                authoring::create_knowledge_point(&pool, owner_id, course_id, &kp.name).await?;
            for question in &kp.questions {
                authoring::add_question(&pool, owner_id, created.id, question).await?;
            }
            knowledge_point_ids.insert(kp.name.clone(), created.id);
        }

        for module in &self.modules {
            let (course_id, owner_id) = course_ids[&module.course];
            let blocks: Vec<BlockInput> = module
                .blocks
                .iter()
                .map(|block| match block {
                    TestBlock::Content(text) => text_block(text),
                    TestBlock::KnowledgePoint(name) => kp_block(knowledge_point_ids[name]),
                })
                .collect();

            let version =
                authoring::create_module(&pool, owner_id, course_id, &module.title, "", &blocks)
                    .await?;
            module_ids.insert(module.title.clone(), version.module_id);
        }

        Ok(TestDb {
            pool,
            course_ids,
            knowledge_point_ids,
            module_ids,
        })
    }
}

pub struct TestDb {
    pub pool: Pool<Sqlite>,
    course_ids: HashMap<String, (i64, i64)>,
    knowledge_point_ids: HashMap<String, i64>,
    module_ids: HashMap<String, i64>,
}

impl TestDb {
    pub fn course_id(&self, name: &str) -> i64 {
        self.course_ids[name].0
    }

    pub fn knowledge_point_id(&self, name: &str) -> i64 {
        self.knowledge_point_ids[name]
    }

    pub fn module_id(&self, title: &str) -> i64 {
        self.module_ids[title]
    }

    pub async fn content_count(&self) -> i64 {
        let mut conn = self.pool.acquire().await.unwrap();
        db::content::content_count(&mut conn).await.unwrap()
    }

    pub async fn version_numbers(&self, module_id: i64) -> Vec<i64> {
        let mut conn = self.pool.acquire().await.unwrap();
        db::versions::version_numbers(&mut conn, module_id)
            .await
            .unwrap()
    }
}

/// One course, one knowledge point with two questions, and a three block
/// module: intro text, the question slot, closing text.
pub async fn create_standard_test_db() -> TestDb {
    TestDbBuilder::new()
        .course("Geography")
        .knowledge_point(
            "Geography",
            "Capitals",
            vec![
                mcq("Capital of France?", &["Paris", "Lyon", "Nice"], 0),
                mcq("Capital of Italy?", &["Milan", "Rome"], 1),
            ],
        )
        .module(
            "Geography",
            "Europe",
            vec![
                content("Welcome to Europe"),
                question_slot("Capitals"),
                content("That's all"),
            ],
        )
        .build()
        .await
        .expect("Failed to build standard test db")
}

pub async fn setup_test_client(test_db: TestDb, selector: SharedSelector) -> (Client, TestDb) {
    let rocket = init_rocket(test_db.pool.clone(), selector);
    let client = Client::tracked(rocket)
        .await
        .expect("valid rocket instance");
    (client, test_db)
}
