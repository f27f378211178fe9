#[macro_use]
extern crate rocket;

pub mod allocator;
pub mod api;
pub mod auth;
pub mod authoring;
pub mod db;
pub mod env;
pub mod error;
pub mod learning;
pub mod models;
pub mod scoring;
pub mod telemetry;
pub mod validation;
#[cfg(test)]
mod test;

use api::{
    api_add_question, api_complete_module, api_create_course, api_create_knowledge_point,
    api_create_module, api_delete_knowledge_point, api_delete_module, api_delete_question,
    api_edit_module, api_get_module, api_get_question, api_leaderboard,
    api_list_knowledge_points, api_list_questions, api_rename_knowledge_point,
    api_retire_questions, api_start_visit, api_submit_answer, api_sweep_module, api_take_block,
    api_update_module_metadata, health,
};
use allocator::SharedSelector;
use auth::unauthorized_api;
use rocket::{Build, Rocket};
use sqlx::{Pool, Sqlite};
use telemetry::TelemetryFairing;
use tracing::info;

pub fn init_rocket(pool: Pool<Sqlite>, selector: SharedSelector) -> Rocket<Build> {
    info!("Starting course engine");

    rocket::build()
        .manage(pool)
        .manage(selector)
        .mount(
            "/api",
            routes![
                api_create_course,
                api_leaderboard,
                api_create_module,
                api_get_module,
                api_edit_module,
                api_update_module_metadata,
                api_delete_module,
                api_sweep_module,
                api_create_knowledge_point,
                api_list_knowledge_points,
                api_rename_knowledge_point,
                api_delete_knowledge_point,
                api_add_question,
                api_list_questions,
                api_retire_questions,
                api_get_question,
                api_delete_question,
                api_start_visit,
                api_take_block,
                api_submit_answer,
                api_complete_module,
            ],
        )
        .register("/api", catchers![unauthorized_api])
        .mount("/api", routes![health])
        .attach(TelemetryFairing)
}
