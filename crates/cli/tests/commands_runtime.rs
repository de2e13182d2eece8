use std::env;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use dealflow_cli::commands::pipeline::{self, EditArgs, TransitionArgs};
use dealflow_cli::commands::{config, migrate, seed};
use dealflow_core::config::LoadOptions;
use serde_json::{json, Value};
use tempfile::TempDir;

#[test]
fn migrate_returns_success_with_valid_env() {
    let dir = TempDir::new().expect("temp dir");
    let url = database_url(dir.path());
    with_env(&[("DEALFLOW_DATABASE_URL", url.as_str())], || {
        let result = migrate::run(LoadOptions::default());
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_unknown_log_format() {
    with_env(&[("DEALFLOW_LOGGING_FORMAT", "xml")], || {
        let result = migrate::run(LoadOptions::default());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn missing_explicit_config_file_is_a_config_failure() {
    with_env(&[], || {
        let options = LoadOptions {
            config_path: Some("does-not-exist/dealflow.toml".into()),
            require_file: true,
            ..LoadOptions::default()
        };
        let result = config::run(options);
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "config_validation");
    });
}

#[test]
fn config_reports_env_sources() {
    with_env(&[("DEALFLOW_WORKFLOW_MAX_TREE_DEPTH", "6")], || {
        let result = config::run(LoadOptions::default());
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().unwrap_or_default();
        let expected =
            "- workflow.max_tree_depth = 6 (source: env (DEALFLOW_WORKFLOW_MAX_TREE_DEPTH))";
        assert!(message.contains(expected), "{message}");
        assert_eq!(payload["data"]["workflow"]["max_tree_depth"], 6);
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = TempDir::new().expect("temp dir");
    let url = database_url(dir.path());
    with_env(&[("DEALFLOW_DATABASE_URL", url.as_str())], || {
        let first = seed::run(LoadOptions::default());
        assert_eq!(first.exit_code, 0, "expected first seed invocation success: {}", first.output);
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["status"], "ok");
        assert_eq!(first_payload["data"]["root_pipeline_id"], "pl-demo-industrial");

        let second = seed::run(LoadOptions::default());
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);
        assert_eq!(second_payload["message"], "demo dataset already present");

        let tree = pipeline::tree(LoadOptions::default());
        let payload = parse_payload(&tree.output);
        assert_eq!(payload["message"], "3 pipelines");
        assert_eq!(payload["data"][0]["children"].as_array().map(Vec::len), Some(2));

        let totals = pipeline::totals(LoadOptions::default(), None);
        let payload = parse_payload(&totals.output);
        assert_eq!(payload["data"]["customer"], "60000");
        assert_eq!(payload["data"]["supplier"], "1250");
    });
}

#[test]
fn item_moves_through_cli_operations() {
    let dir = TempDir::new().expect("temp dir");
    let url = database_url(dir.path());
    with_env(&[("DEALFLOW_DATABASE_URL", url.as_str())], || {
        let created = pipeline::create_pipeline(LoadOptions::default(), "Industrial".into(), None);
        assert_eq!(created.exit_code, 0, "{}", created.output);
        let pipeline_id = string_at(&parse_payload(&created.output), "/data/id");

        let intake = json!({
            "date": "2024-03-01",
            "department": "Fabrication",
            "company_name": "Acme",
            "contact": "buyer@acme.example",
            "deadline": "2024-04-01",
            "priority": "High",
        });
        let item = pipeline::create_item(
            LoadOptions::default(),
            pipeline_id.clone(),
            intake.to_string(),
        );
        assert_eq!(item.exit_code, 0, "{}", item.output);
        let item_id = string_at(&parse_payload(&item.output), "/data/id");

        let accepted = pipeline::transition(
            LoadOptions::default(),
            transition_args(&pipeline_id, "rfq", &item_id, "accept", None),
        );
        assert_eq!(accepted.exit_code, 0, "{}", accepted.output);
        assert_eq!(parse_payload(&accepted.output)["data"]["to"], "feasibility");

        let without_notes = pipeline::transition(
            LoadOptions::default(),
            transition_args(&pipeline_id, "feasibility", &item_id, "accept", None),
        );
        assert_eq!(without_notes.exit_code, 6);
        let payload = parse_payload(&without_notes.output);
        assert_eq!(payload["error_class"], "notes_required");
        assert_eq!(payload["remedy"], "customer_notes");
        assert!(payload["correlation_id"].as_str().unwrap_or_default().starts_with("cli-"));

        let edited = pipeline::edit(
            LoadOptions::default(),
            EditArgs {
                pipeline: pipeline_id.clone(),
                stage: "feasibility".into(),
                item: item_id.clone(),
                edit_json: json!({"edit": "customer_notes", "notes": "Needs rollers"}).to_string(),
            },
        );
        assert_eq!(edited.exit_code, 0, "{}", edited.output);

        let rejected = pipeline::transition(
            LoadOptions::default(),
            transition_args(&pipeline_id, "feasibility", &item_id, "reject", Some("No capacity")),
        );
        assert_eq!(rejected.exit_code, 0, "{}", rejected.output);

        let closed = pipeline::stage(LoadOptions::default(), pipeline_id.clone(), "closed".into());
        let payload = parse_payload(&closed.output);
        assert_eq!(payload["data"].as_array().map(Vec::len), Some(1));
        assert_eq!(payload["data"][0]["details"]["rejection_reason"], "No capacity");

        let feasibility =
            pipeline::stage(LoadOptions::default(), pipeline_id, "feasibility".into());
        assert_eq!(parse_payload(&feasibility.output)["data"], json!([]));
    });
}

#[test]
fn unknown_verb_is_rejected_before_touching_storage() {
    let dir = TempDir::new().expect("temp dir");
    let url = database_url(dir.path());
    with_env(&[("DEALFLOW_DATABASE_URL", url.as_str())], || {
        let result = pipeline::transition(
            LoadOptions::default(),
            transition_args("pl-1", "rfq", "item-1", "promote", None),
        );
        assert_eq!(result.exit_code, 6);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "invalid_argument");
        assert!(payload["message"].as_str().unwrap_or_default().contains("promote"));
    });
}

fn transition_args(
    pipeline: &str,
    stage: &str,
    item: &str,
    verb: &str,
    reason: Option<&str>,
) -> TransitionArgs {
    TransitionArgs {
        pipeline: pipeline.to_string(),
        stage: stage.to_string(),
        item: item.to_string(),
        verb: verb.to_string(),
        reason: reason.map(str::to_string),
    }
}

fn database_url(dir: &Path) -> String {
    format!("sqlite://{}", dir.join("dealflow.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn string_at(payload: &Value, pointer: &str) -> String {
    payload.pointer(pointer).and_then(Value::as_str).expect("string field").to_string()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "DEALFLOW_DATABASE_URL",
        "DEALFLOW_DATABASE_MAX_CONNECTIONS",
        "DEALFLOW_DATABASE_TIMEOUT_SECS",
        "DEALFLOW_WORKFLOW_MAX_TREE_DEPTH",
        "DEALFLOW_WORKFLOW_REQUIRE_APPROVAL",
        "DEALFLOW_LOGGING_LEVEL",
        "DEALFLOW_LOGGING_FORMAT",
        "DEALFLOW_LOG_LEVEL",
        "DEALFLOW_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
