//! # Structured Logging Module
//!
//! Environment-aware console logging on the tracing ecosystem. Production emits
//! JSON lines; development and test use the human-readable formatter.

use chrono::Utc;
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let console_layer = if environment == "production" {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(std::io::stdout().is_terminal())
                .with_filter(filter)
                .boxed()
        };

        // Host applications may already own the global subscriber
        if tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            environment = %environment,
            pid = std::process::id(),
            "Structured logging initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("NAVETTE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for conversion operations
pub fn log_conversion_operation(
    operation: &str,
    fiche_navette_id: i64,
    package_id: Option<i64>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        fiche_navette_id = fiche_navette_id,
        package_id = package_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "CONVERSION_OPERATION"
    );
}

/// Log structured data for background job transitions
pub fn log_job_operation(
    operation: &str,
    job_id: &str,
    queue: &str,
    attempt: u32,
    state: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = %job_id,
        queue = %queue,
        attempt = attempt,
        state = %state,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "JOB_OPERATION"
    );
}
