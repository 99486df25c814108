#![allow(async_fn_in_trait)]

#[macro_use]
extern crate rocket;
#[macro_use]
extern crate serde;

use error::BackendError;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedHeaders, AllowedOrigins};
use tokio::sync::OnceCell;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::db::Db;
use crate::error::{ConfigurationError, SecurityError};
use crate::route::mount_api;
use crate::security::{security_dir, Security};

pub mod config;
pub mod data;
pub mod db;
pub mod error;
pub mod notify;
pub mod resp;
pub mod route;
pub mod security;
pub mod status;
pub mod util;

static SECURITY: OnceCell<Security> = OnceCell::const_new();

/// Session signing keys, read (or generated) once per process.
pub async fn security() -> Result<&'static Security, SecurityError> {
    SECURITY
        .get_or_try_init(|| async { Security::load(security_dir()) })
        .await
}

pub async fn create(log_level: Option<Level>) -> Result<Rocket<Build>, BackendError> {
    if let Some(l) = log_level {
        let subscriber = FmtSubscriber::builder().with_max_level(l).finish();

        if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Unable to set global logger: {}", err);
        };
        if let Err(err) = tracing_log::LogTracer::init() {
            eprintln!("Unable to forward log records: {}", err);
        }
    }

    tracing::info!("Reading .env file...");
    if dotenv::dotenv().is_err() {
        tracing::warn!("Unable to load .env file.");
    }

    tracing::info!("Loading configuration...");
    let c = match Config::load() {
        Ok(c) => {
            tracing::info!("Configuration loaded.");
            c
        }
        Err(ConfigurationError::NotFound(dir)) => {
            tracing::info!(
                "No configuration in '{}', using defaults.",
                dir.display()
            );
            let c = Config::default();
            if c.save().is_err() {
                tracing::warn!("Unable to save generated configuration.");
            }
            c
        }
        Err(other) => {
            tracing::error!("Configuration error: {}", other);
            return Err(other.into());
        }
    };

    tracing::info!("Initializing session signing keys...");
    let security = security().await?.clone();

    build(c, security)
}

/// Assembles the server from already loaded configuration and keys.
///
/// The database is connected lazily by the first request that needs it.
pub fn build(c: Config, security: Security) -> Result<Rocket<Build>, BackendError> {
    tracing::info!("Using MongoDB database '{}'", c.mongodb_db);
    let db = Db::new(&c.mongodb_uri, &c.mongodb_db);

    tracing::info!("Setting up CORS...");
    let cors = rocket_cors::CorsOptions {
        allowed_origins: AllowedOrigins::All,
        allowed_methods: vec![Method::Get, Method::Put, Method::Post, Method::Delete]
            .into_iter()
            .map(From::from)
            .collect(),
        allowed_headers: AllowedHeaders::All,
        allow_credentials: true,
        ..Default::default()
    }
    .to_cors()?;

    let r = rocket::build()
        .manage(c)
        .manage(db)
        .manage(security)
        .attach(cors);

    Ok(mount_api(r))
}
