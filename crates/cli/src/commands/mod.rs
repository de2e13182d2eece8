pub mod config;
pub mod migrate;
pub mod pipeline;
pub mod seed;

use std::future::Future;

use dealflow_core::config::{AppConfig, LoadOptions, LogFormat};
use dealflow_core::errors::{ApplicationError, InterfaceError};
use dealflow_db::{connect_with_config, migrations, DbPool};
use serde::Serialize;
use serde_json::Value;

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_RUNTIME: u8 = 3;
pub const EXIT_DB: u8 = 4;
pub const EXIT_EXECUTION: u8 = 5;
pub const EXIT_DOMAIN: u8 = 6;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remedy: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            remedy: None,
            hint: None,
            correlation_id: None,
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &'static str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::from_failure(command, Failure::new(error_class, message, exit_code))
    }

    pub fn from_failure(command: &str, failure: Failure) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(failure.error_class.to_string()),
            message: failure.message,
            remedy: failure.remedy,
            hint: failure.hint,
            correlation_id: failure.correlation_id,
            data: None,
        };
        Self { exit_code: failure.exit_code, output: serialize_payload(payload) }
    }
}

/// Successful command body: a human line plus optional structured data.
#[derive(Debug)]
pub struct Success {
    pub message: String,
    pub data: Option<Value>,
}

impl Success {
    pub fn message(message: impl Into<String>) -> Self {
        Self { message: message.into(), data: None }
    }

    pub fn with_data(message: impl Into<String>, data: Value) -> Self {
        Self { message: message.into(), data: Some(data) }
    }
}

/// A failed command body. `remedy` names the edit that would let the same
/// request succeed; `hint` is the generic line meant for an end user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub error_class: &'static str,
    pub message: String,
    pub exit_code: u8,
    pub remedy: Option<&'static str>,
    pub hint: Option<&'static str>,
    pub correlation_id: Option<String>,
}

impl Failure {
    pub fn new(error_class: &'static str, message: impl Into<String>, exit_code: u8) -> Self {
        Self {
            error_class,
            message: message.into(),
            exit_code,
            remedy: None,
            hint: None,
            correlation_id: None,
        }
    }
}

/// Loads config, starts logging, opens and migrates the database, then runs
/// `job` on a current-thread runtime.
pub fn execute<F, Fut>(command: &'static str, options: LoadOptions, job: F) -> CommandResult
where
    F: FnOnce(AppConfig, DbPool) -> Fut,
    Fut: Future<Output = Result<Success, Failure>>,
{
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                EXIT_CONFIG,
            );
        }
    };
    init_logging(&config);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| Failure::new("db_connectivity", error.to_string(), EXIT_DB))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| Failure::new("migration", error.to_string(), EXIT_EXECUTION))?;

        let outcome = job(config, pool.clone()).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(success) => CommandResult::success_with_data(command, success.message, success.data),
        Err(failure) => {
            tracing::warn!(
                event_name = "cli.command.failed",
                command,
                error_class = failure.error_class,
                exit_code = failure.exit_code,
                correlation_id = failure.correlation_id.as_deref().unwrap_or("none"),
                "command failed"
            );
            CommandResult::from_failure(command, failure)
        }
    }
}

pub fn correlation_id() -> String {
    format!("cli-{}", uuid::Uuid::new_v4())
}

/// Maps a service error through the interface layer. Validation failures keep
/// their own code as the error class so callers can branch on it.
pub fn application_failure(error: ApplicationError, correlation_id: &str) -> Failure {
    let validation = error.validation().map(|error| (error.code(), error.remedy()));
    let configuration = matches!(error, ApplicationError::Configuration(_));
    let message = error.to_string();

    let interface = error.into_interface(correlation_id);
    let (error_class, exit_code) = match &interface {
        InterfaceError::BadRequest { .. } => {
            (validation.map(|(code, _)| code).unwrap_or("bad_request"), EXIT_DOMAIN)
        }
        InterfaceError::NotFound { .. } => ("not_found", EXIT_DOMAIN),
        InterfaceError::Conflict { .. } => ("version_conflict", EXIT_DOMAIN),
        InterfaceError::ServiceUnavailable { .. } => ("persistence", EXIT_EXECUTION),
        InterfaceError::Internal { .. } if configuration => ("config_validation", EXIT_CONFIG),
        InterfaceError::Internal { .. } => ("internal", EXIT_EXECUTION),
    };

    Failure {
        error_class,
        message,
        exit_code,
        remedy: validation.and_then(|(_, remedy)| remedy),
        hint: Some(interface.user_message()),
        correlation_id: Some(correlation_id.to_string()),
    }
}

/// Logs go to stderr so stdout stays a single JSON payload.
fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed when several commands run in one process.
    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
