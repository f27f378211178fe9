use chrono::Utc;
use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::allocator::SharedSelector;
use crate::auth::CurrentUser;
use crate::models::{
    BlockInput, BlockPage, Completion, Course, KnowledgePoint, LeaderboardEntry, ModuleVersion,
    ModuleView, QuestionDetail, QuestionInput, Visit,
};
use crate::validation::{ApiError, AppErrorExt, JsonValidateExt};
use crate::{authoring, learning};

#[derive(Deserialize, Validate)]
pub struct CreateCourseRequest {
    #[validate(length(min = 1, max = 200, message = "Course name must be 1-200 characters"))]
    name: String,
}

#[derive(Serialize, Deserialize, Validate)]
pub struct ModuleRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub blocks: Vec<BlockInput>,
}

#[derive(Serialize, Deserialize, Validate)]
pub struct MetadataRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Serialize, Deserialize, Validate)]
pub struct KnowledgePointRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,
}

#[derive(Serialize, Deserialize)]
pub struct AnswerRequest {
    pub choice_id: i64,
}

#[derive(Serialize, Deserialize)]
pub struct ReclaimedResponse {
    pub reclaimed: u64,
}

#[derive(Serialize, Deserialize)]
pub struct SweepResponse {
    pub deleted_versions: Vec<i64>,
}

#[derive(Serialize, Deserialize)]
pub struct RetiredResponse {
    pub retired: u64,
}

#[post("/courses", data = "<request>")]
pub async fn api_create_course(
    request: Json<CreateCourseRequest>,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<Course>>, ApiError> {
    let validated = request.validate_custom()?;

    let course = authoring::create_course(db, user.id, &validated.name)
        .await
        .validate_custom()?;

    Ok(Custom(Status::Created, Json(course)))
}

#[get("/courses/<id>/leaderboard")]
pub async fn api_leaderboard(
    id: i64,
    _user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let entries = learning::leaderboard(db, id).await.validate_custom()?;
    Ok(Json(entries))
}

#[post("/courses/<course_id>/modules", data = "<request>")]
pub async fn api_create_module(
    course_id: i64,
    request: Json<ModuleRequest>,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<ModuleVersion>>, ApiError> {
    let validated = request.validate_custom()?;

    let version = authoring::create_module(
        db,
        user.id,
        course_id,
        &validated.title,
        &validated.description,
        &validated.blocks,
    )
    .await
    .validate_custom()?;

    Ok(Custom(Status::Created, Json(version)))
}

#[get("/modules/<id>?<version>")]
pub async fn api_get_module(
    id: i64,
    version: Option<i64>,
    _user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ModuleView>, ApiError> {
    let view = authoring::load_module_version(db, id, version)
        .await
        .validate_custom()?;
    Ok(Json(view))
}

#[put("/modules/<id>", data = "<request>")]
pub async fn api_edit_module(
    id: i64,
    request: Json<ModuleRequest>,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ModuleVersion>, ApiError> {
    let validated = request.validate_custom()?;

    let version = authoring::apply_module_edit(
        db,
        user.id,
        id,
        &validated.title,
        &validated.description,
        &validated.blocks,
    )
    .await
    .validate_custom()?;

    Ok(Json(version))
}

#[patch("/modules/<id>/metadata", data = "<request>")]
pub async fn api_update_module_metadata(
    id: i64,
    request: Json<MetadataRequest>,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ModuleVersion>, ApiError> {
    let validated = request.validate_custom()?;

    let version =
        authoring::update_module_metadata(db, user.id, id, &validated.title, &validated.description)
            .await
            .validate_custom()?;

    Ok(Json(version))
}

#[delete("/modules/<id>")]
pub async fn api_delete_module(
    id: i64,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ReclaimedResponse>, ApiError> {
    let reclaimed = authoring::delete_module(db, user.id, id)
        .await
        .validate_custom()?;
    Ok(Json(ReclaimedResponse { reclaimed }))
}

#[post("/modules/<id>/sweep")]
pub async fn api_sweep_module(
    id: i64,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<SweepResponse>, ApiError> {
    let deleted_versions = authoring::sweep_unpinned_versions(db, user.id, id)
        .await
        .validate_custom()?;
    Ok(Json(SweepResponse { deleted_versions }))
}

#[post("/courses/<course_id>/knowledge_points", data = "<request>")]
pub async fn api_create_knowledge_point(
    course_id: i64,
    request: Json<KnowledgePointRequest>,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<KnowledgePoint>>, ApiError> {
    let validated = request.validate_custom()?;

    let kp = authoring::create_knowledge_point(db, user.id, course_id, &validated.name)
        .await
        .validate_custom()?;

    Ok(Custom(Status::Created, Json(kp)))
}

#[get("/courses/<course_id>/knowledge_points")]
pub async fn api_list_knowledge_points(
    course_id: i64,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<KnowledgePoint>>, ApiError> {
    let kps = authoring::list_knowledge_points(db, user.id, course_id)
        .await
        .validate_custom()?;
    Ok(Json(kps))
}

#[patch("/knowledge_points/<id>", data = "<request>")]
pub async fn api_rename_knowledge_point(
    id: i64,
    request: Json<KnowledgePointRequest>,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<KnowledgePoint>, ApiError> {
    let validated = request.validate_custom()?;

    let kp = authoring::rename_knowledge_point(db, user.id, id, &validated.name)
        .await
        .validate_custom()?;
    Ok(Json(kp))
}

#[delete("/knowledge_points/<id>")]
pub async fn api_delete_knowledge_point(
    id: i64,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ReclaimedResponse>, ApiError> {
    let reclaimed = authoring::delete_knowledge_point(db, user.id, id)
        .await
        .validate_custom()?;
    Ok(Json(ReclaimedResponse { reclaimed }))
}

#[post("/knowledge_points/<id>/questions", data = "<request>")]
pub async fn api_add_question(
    id: i64,
    request: Json<QuestionInput>,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<QuestionDetail>>, ApiError> {
    let validated = request.validate_custom()?;

    let detail = authoring::add_question(db, user.id, id, &validated)
        .await
        .validate_custom()?;

    Ok(Custom(Status::Created, Json(detail)))
}

#[get("/knowledge_points/<id>/questions?<latest_only>")]
pub async fn api_list_questions(
    id: i64,
    latest_only: Option<bool>,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<QuestionDetail>>, ApiError> {
    let questions = authoring::list_questions(db, user.id, id, latest_only.unwrap_or(false))
        .await
        .validate_custom()?;
    Ok(Json(questions))
}

#[post("/knowledge_points/<id>/retire")]
pub async fn api_retire_questions(
    id: i64,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<RetiredResponse>, ApiError> {
    let retired = authoring::retire_questions(db, user.id, id)
        .await
        .validate_custom()?;
    Ok(Json(RetiredResponse { retired }))
}

#[get("/questions/<id>")]
pub async fn api_get_question(
    id: i64,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<QuestionDetail>, ApiError> {
    let detail = authoring::get_question(db, user.id, id)
        .await
        .validate_custom()?;
    Ok(Json(detail))
}

#[delete("/questions/<id>")]
pub async fn api_delete_question(
    id: i64,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ReclaimedResponse>, ApiError> {
    let reclaimed = authoring::delete_question(db, user.id, id)
        .await
        .validate_custom()?;
    Ok(Json(ReclaimedResponse { reclaimed }))
}

#[post("/modules/<id>/visit")]
pub async fn api_start_visit(
    id: i64,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Visit>, ApiError> {
    let visit = learning::start_visit(db, user.id, id).await.validate_custom()?;
    Ok(Json(visit))
}

#[get("/modules/<id>/blocks/<index>")]
pub async fn api_take_block(
    id: i64,
    index: i64,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
    selector: &State<SharedSelector>,
) -> Result<Json<BlockPage>, ApiError> {
    let page = learning::take_block(db, &**selector.inner(), user.id, id, index)
        .await
        .validate_custom()?;
    Ok(Json(page))
}

#[post("/modules/<id>/blocks/<index>/answer", data = "<request>")]
pub async fn api_submit_answer(
    id: i64,
    index: i64,
    request: Json<AnswerRequest>,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
    selector: &State<SharedSelector>,
) -> Result<Json<BlockPage>, ApiError> {
    let page = learning::submit_answer(
        db,
        &**selector.inner(),
        user.id,
        id,
        index,
        request.choice_id,
        Utc::now(),
    )
    .await
    .validate_custom()?;
    Ok(Json(page))
}

#[post("/modules/<id>/complete")]
pub async fn api_complete_module(
    id: i64,
    user: CurrentUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Completion>, ApiError> {
    let completion = learning::complete_module(db, user.id, id, Utc::now())
        .await
        .validate_custom()?;
    Ok(Json(completion))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
