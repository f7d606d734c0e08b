#[macro_use]
extern crate rocket;

mod api;
mod attendance;
mod auth;
mod database;
mod db;
mod env;
mod error;
mod fees;
mod models;
mod repository;
mod stats;
mod telemetry;
mod validation;
#[cfg(test)]
mod test;

use api::{
    api_assign_coach, api_attendance_summary, api_create_batch, api_create_center,
    api_create_student, api_create_user, api_dashboard_stats, api_delete_payment,
    api_get_attendance, api_get_batches, api_get_centers, api_get_coaches, api_get_fee_payments,
    api_get_students, api_login, api_logout, api_mark_attendance, api_me, api_move_student,
    api_record_attendance, api_record_payment, api_refresh_overdue, api_retire_center,
    api_settle_due, api_upsert_due, health, unprocessable_api,
};
use auth::unauthorized_api;
use database::migrate_database;
use db::clean_expired_sessions;
use env::{AppConfig, load_environment};
use error::AppError;
use rocket::{Build, Rocket, tokio};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use telemetry::{TelemetryFairing, init_tracing};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Rocket(Box<rocket::Error>),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

impl From<rocket::Error> for Error {
    fn from(value: rocket::Error) -> Self {
        Error::Rocket(Box::new(value))
    }
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    if let Err(e) = load_environment() {
        eprintln!("Failed to load environment files: {}", e);
    }

    let config = AppConfig::from_env()?;
    init_tracing(&config);

    let pool = SqlitePoolOptions::new()
        .connect(&config.database_url)
        .await?;

    info!("Running database migrations...");
    if migrate_database(&pool).await? {
        info!("Schema created or upgraded");
    } else {
        info!("Schema already up to date");
    }

    let pool_clone = pool.clone();

    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool_clone).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
        }
    });

    init_rocket(pool, config).await.launch().await?;

    Ok(())
}

pub async fn init_rocket(pool: SqlitePool, config: AppConfig) -> Rocket<Build> {
    info!("Starting academy console");

    rocket::build()
        .manage(pool)
        .manage(config)
        .mount(
            "/api",
            routes![
                api_login,
                api_logout,
                api_me,
                api_create_user,
                api_get_centers,
                api_create_center,
                api_retire_center,
                api_get_students,
                api_create_student,
                api_move_student,
                api_get_batches,
                api_create_batch,
                api_assign_coach,
                api_get_coaches,
                api_get_attendance,
                api_record_attendance,
                api_mark_attendance,
                api_attendance_summary,
                api_get_fee_payments,
                api_record_payment,
                api_upsert_due,
                api_settle_due,
                api_refresh_overdue,
                api_delete_payment,
                api_dashboard_stats,
            ],
        )
        .register("/api", catchers![unauthorized_api, unprocessable_api])
        .mount("/api", routes![health])
        .attach(TelemetryFairing)
}
