use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};

const DEFAULT_DATABASE_URL: &str = "sqlite://academy.db?mode=rwc";
const DEFAULT_SESSION_HOURS: i64 = 12;

pub fn is_production() -> bool {
    dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production"
}

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let env_files = if is_production() {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Warning: Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

#[cfg(test)]
pub fn load_test_environment() -> Result<(), Box<dyn std::error::Error>> {
    let test_env_files = vec!["config/common.env", ".secrets.env"];

    for env_file in test_env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

/// Settings read once at startup and managed as Rocket state.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub session_hours: i64,
    pub otlp_endpoint: Option<String>,
    pub environment: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            dotenvy::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let session_hours = match dotenvy::var("SESSION_HOURS") {
            Ok(raw) => raw
                .parse::<i64>()
                .with_context(|| format!("SESSION_HOURS must be a whole number, got '{}'", raw))?,
            Err(_) => DEFAULT_SESSION_HOURS,
        };
        anyhow::ensure!(session_hours > 0, "SESSION_HOURS must be positive");

        let otlp_endpoint = dotenvy::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|endpoint| !endpoint.trim().is_empty());

        let environment = if is_production() {
            "production".to_string()
        } else {
            "development".to_string()
        };

        Ok(Self {
            database_url,
            session_hours,
            otlp_endpoint,
            environment,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            session_hours: DEFAULT_SESSION_HOURS,
            otlp_endpoint: None,
            environment: "development".to_string(),
        }
    }
}
