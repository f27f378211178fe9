use std::sync::Mutex;

use anyhow::Context;
use once_cell::sync::Lazy;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, launch};
use tracing::{error, info};

use course_engine::allocator::default_selector;
use course_engine::env::{Config, load_environment};
use course_engine::telemetry::{OtelGuard, init_tracing};
use course_engine::{db, init_rocket};

static TELEMETRY_GUARD: Lazy<Mutex<Option<OtelGuard>>> = Lazy::new(|| Mutex::new(None));

async fn build() -> anyhow::Result<Rocket<Build>> {
    load_environment().map_err(|e| anyhow::anyhow!("Failed to load environment: {}", e))?;
    let config = Config::from_env().context("Invalid configuration")?;

    let guard = init_tracing(&config).context("Failed to initialise tracing")?;
    if let Ok(mut slot) = TELEMETRY_GUARD.lock() {
        *slot = Some(guard);
    }

    let pool = db::connect(&config)
        .await
        .context("Failed to connect to SQLite database")?;
    db::migrate(&pool).await.context("Database migration failed")?;

    Ok(init_rocket(pool, default_selector()).attach(AdHoc::on_shutdown(
        "Flush telemetry",
        |_| {
            Box::pin(async move {
                info!("Shutting down telemetry");
                if let Ok(mut slot) = TELEMETRY_GUARD.lock() {
                    slot.take();
                }
            })
        },
    )))
}

#[launch]
async fn rocket() -> _ {
    match build().await {
        Ok(rocket) => rocket,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            panic!("Startup failed: {:#}", e);
        }
    }
}
