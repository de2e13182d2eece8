use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dealflow_core::config::{AppConfig, LoadOptions};
use serde_json::json;
use toml::Value;

use crate::commands::{CommandResult, EXIT_CONFIG};

pub fn run(options: LoadOptions) -> CommandResult {
    let config_file_path =
        options.config_path.clone().filter(|path| path.exists()).or_else(detect_config_path);
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let fields = [
        ("database.url", config.database.url.clone(), &["DEALFLOW_DATABASE_URL"][..]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["DEALFLOW_DATABASE_MAX_CONNECTIONS"][..],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["DEALFLOW_DATABASE_TIMEOUT_SECS"][..],
        ),
        (
            "workflow.max_tree_depth",
            config.workflow.max_tree_depth.to_string(),
            &["DEALFLOW_WORKFLOW_MAX_TREE_DEPTH"][..],
        ),
        (
            "workflow.require_approval_for_postprocess",
            config.workflow.require_approval_for_postprocess.to_string(),
            &["DEALFLOW_WORKFLOW_REQUIRE_APPROVAL"][..],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            &["DEALFLOW_LOGGING_LEVEL", "DEALFLOW_LOG_LEVEL"][..],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["DEALFLOW_LOGGING_FORMAT", "DEALFLOW_LOG_FORMAT"][..],
        ),
    ];

    let mut lines =
        vec!["effective config (source precedence: override > env > file > default):".to_string()];
    for (key, value, env_keys) in &fields {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, value, source));
    }

    let data = serde_json::to_value(&config).unwrap_or_else(|_| json!({}));
    CommandResult::success_with_data("config", lines.join("\n"), Some(data))
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("dealflow.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/dealflow.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
