use dealflow_core::config::LoadOptions;
use dealflow_db::{DemoSeedDataset, PipelineRepository, SqlRecordStore};
use serde_json::json;

use crate::commands::{
    application_failure, correlation_id, execute, CommandResult, Failure, Success, EXIT_DOMAIN,
    EXIT_EXECUTION,
};

pub fn run(options: LoadOptions) -> CommandResult {
    execute("seed", options, |config, pool| async move {
        let repository = PipelineRepository::with_max_depth(
            SqlRecordStore::new(pool),
            config.workflow.max_tree_depth,
        );

        let correlation = correlation_id();

        let seed_result = DemoSeedDataset::load(&repository).await.map_err(|error| Failure {
            error_class: "seed_execution",
            exit_code: EXIT_EXECUTION,
            ..application_failure(error, &correlation)
        })?;
        let verification = DemoSeedDataset::verify(&repository).await.map_err(|error| Failure {
            error_class: "seed_verification",
            exit_code: EXIT_DOMAIN,
            ..application_failure(error, &correlation)
        })?;

        if !verification.all_present {
            let failed = failed_checks(&verification.checks);
            return Err(Failure::new(
                "seed_verification",
                verification_message(&failed),
                EXIT_DOMAIN,
            ));
        }

        let message = if seed_result.already_present {
            "demo dataset already present".to_string()
        } else {
            format!(
                "demo dataset loaded: {} pipelines, {} items, {} purchases",
                seed_result.pipelines, seed_result.items, seed_result.purchases
            )
        };
        Ok(Success::with_data(
            message,
            json!({
                "root_pipeline_id": DemoSeedDataset::ROOT_PIPELINE_ID,
                "checks": verification.checks.len(),
            }),
        ))
    })
}

fn failed_checks(checks: &[(String, bool)]) -> Vec<&str> {
    checks.iter().filter_map(|(check, passed)| (!passed).then_some(check.as_str())).collect()
}

fn verification_message(failed: &[&str]) -> String {
    if failed.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::{failed_checks, verification_message};

    #[test]
    fn verification_error_message_targets_failed_checks() {
        let checks = vec![
            ("pl-demo-industrial".to_string(), true),
            ("Contoso Metals in Feasibility".to_string(), false),
            ("supplier pending total".to_string(), false),
        ];

        let message = verification_message(&failed_checks(&checks));

        assert_eq!(
            message,
            "seed verification failed for checks: Contoso Metals in Feasibility, supplier pending total"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        let checks = vec![("pl-demo-industrial".to_string(), true)];
        assert_eq!(verification_message(&failed_checks(&checks)), "some seed data failed to load");
    }
}
