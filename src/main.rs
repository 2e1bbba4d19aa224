#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod config;
mod database;
mod db;
mod env;
mod error;
mod models;
mod reporting;
mod roster;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use api::{
    api_audit_rosters, api_create_team_leader, api_dashboard, api_export_students,
    api_export_teams, api_get_students, api_get_teams, api_login, api_logout, api_me,
    api_me_unauthorized, api_reassign_student, api_register_student, api_repair_rosters,
    api_staff_signup, health,
};
use auth::{forbidden_api, unauthorized_api};
use config::AppConfig;
use database::{CURRENT_SCHEMA, migrate_database_declaratively};
use db::{clean_expired_sessions, ensure_default_principal};
use error::AppError;
use rocket::{Build, Rocket, tokio};
use roster::RosterManager;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use telemetry::{TelemetryFairing, init_tracing};
use thiserror::Error;
use tracing::info;
use validation::{bad_request_api, unprocessable_api};

const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Figment(#[from] rocket::figment::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
    #[error("Launch error: {0}")]
    Launch(Box<rocket::Error>),
    #[error("Environment error: {0}")]
    Environment(#[from] dotenvy::Error),
}

impl From<rocket::Error> for Error {
    fn from(value: rocket::Error) -> Self {
        Error::Launch(Box::new(value))
    }
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    env::load_environment()?;
    let config = AppConfig::from_figment(&rocket::Config::figment())?;
    let _otel_guard = init_tracing(&config.telemetry)?;

    let pool = connect_pool(&config).await?;

    info!("Running database migrations...");
    migrate_database_declaratively(pool.clone(), CURRENT_SCHEMA, false).await?;

    let bootstrap = &config.bootstrap;
    if ensure_default_principal(
        &pool,
        &bootstrap.principal_username,
        &bootstrap.principal_password,
    )
    .await?
    {
        tracing::warn!("Default principal created, change its password");
    }

    spawn_session_cleanup(pool.clone());

    let roster = RosterManager::new(pool.clone(), config.roster.policy());
    if let Err(e) = roster.audit_rosters().await {
        e.log_and_record("Startup roster audit");
    }

    init_rocket(pool, roster, config).launch().await?;
    Ok(())
}

async fn connect_pool(config: &AppConfig) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
}

fn spawn_session_cleanup(pool: SqlitePool) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) if count > 0 => info!("Cleaned up {} expired sessions", count),
                Ok(_) => {}
                Err(e) => e.log_and_record("Session cleanup"),
            }

            tokio::time::sleep(SESSION_CLEANUP_INTERVAL).await;
        }
    });
}

pub fn init_rocket(pool: SqlitePool, roster: RosterManager, config: AppConfig) -> Rocket<Build> {
    info!("Starting student registry");

    rocket::build()
        .manage(pool)
        .manage(roster)
        .manage(config)
        .mount(
            "/api",
            routes![
                api_login,
                api_logout,
                api_staff_signup,
                api_me,
                api_me_unauthorized,
                api_dashboard,
                api_register_student,
                api_get_students,
                api_get_teams,
                api_create_team_leader,
                api_reassign_student,
                api_export_students,
                api_export_teams,
                api_audit_rosters,
                api_repair_rosters,
                health,
            ],
        )
        .register(
            "/api",
            catchers![
                bad_request_api,
                unauthorized_api,
                forbidden_api,
                unprocessable_api
            ],
        )
        .attach(TelemetryFairing)
}
