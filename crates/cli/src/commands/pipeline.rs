//! Pipeline operations exposed on the command line. Each invocation reads the
//! stored forest, applies one operation through the service and exits.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context};
use dealflow_core::audit::AuditContext;
use dealflow_core::config::{AppConfig, LoadOptions};
use dealflow_core::domain::item::{Intake, ItemId};
use dealflow_core::domain::node::{PipelineId, PipelineNode};
use dealflow_core::domain::stage::StageName;
use dealflow_core::flows::{Edit, Transition, TransitionVerb};
use dealflow_core::tree::PipelineTree;
use dealflow_db::{DbPool, PipelineService, SqlRecordStore};
use serde::Serialize;
use serde_json::json;

use crate::commands::{
    application_failure, correlation_id, execute, CommandResult, Failure, Success, EXIT_DOMAIN,
};

const ACTOR: &str = "cli";

#[derive(Debug, Clone)]
pub struct TransitionArgs {
    pub pipeline: String,
    pub stage: String,
    pub item: String,
    pub verb: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EditArgs {
    pub pipeline: String,
    pub stage: String,
    pub item: String,
    pub edit_json: String,
}

#[derive(Debug, Serialize)]
struct TreeView {
    id: PipelineId,
    name: String,
    items: BTreeMap<&'static str, usize>,
    children: Vec<TreeView>,
}

pub fn tree(options: LoadOptions) -> CommandResult {
    execute("tree", options, |config, pool| async move {
        let correlation = correlation_id();
        let tree = service(&config, pool)
            .tree()
            .await
            .map_err(|error| application_failure(error, &correlation))?;
        let roots: Vec<TreeView> = tree.roots().map(|root| tree_view(&tree, root)).collect();
        Ok(Success::with_data(format!("{} pipelines", tree.len()), json!(roots)))
    })
}

pub fn stage(options: LoadOptions, pipeline: String, stage: String) -> CommandResult {
    execute("stage", options, |config, pool| async move {
        let stage = parse_stage(&stage).map_err(bad_request)?;
        let pipeline_id = PipelineId(pipeline);
        let correlation = correlation_id();
        let items = service(&config, pool)
            .list_stage(&pipeline_id, stage)
            .await
            .map_err(|error| application_failure(error, &correlation))?;
        Ok(Success::with_data(format!("{} items in {stage}", items.len()), json!(items)))
    })
}

pub fn create_pipeline(
    options: LoadOptions,
    name: String,
    parent: Option<String>,
) -> CommandResult {
    execute("create-pipeline", options, |config, pool| async move {
        let context = audit_context();
        let node = service(&config, pool)
            .create_pipeline(&name, parent.map(PipelineId), &context)
            .await
            .map_err(|error| application_failure(error, &context.correlation_id))?;
        Ok(Success::with_data(format!("created pipeline {}", node.id), json!(node)))
    })
}

pub fn create_item(options: LoadOptions, pipeline: String, intake_json: String) -> CommandResult {
    execute("create-item", options, |config, pool| async move {
        let intake = parse_json::<Intake>("intake", &intake_json).map_err(bad_request)?;
        let context = audit_context();
        let item = service(&config, pool)
            .create_item(&PipelineId(pipeline), intake, &context)
            .await
            .map_err(|error| application_failure(error, &context.correlation_id))?;
        Ok(Success::with_data(format!("created rfq item {}", item.id), json!(item)))
    })
}

pub fn transition(options: LoadOptions, args: TransitionArgs) -> CommandResult {
    execute("transition", options, |config, pool| async move {
        let stage = parse_stage(&args.stage).map_err(bad_request)?;
        let verb = TransitionVerb::parse(&args.verb)
            .ok_or_else(|| anyhow!("unknown verb `{}`", args.verb))
            .map_err(bad_request)?;
        let transition = Transition::from_verb(verb, args.reason);

        let context = audit_context();
        let pipeline_id = PipelineId(args.pipeline);
        let outcome = service(&config, pool)
            .transition(&pipeline_id, stage, &ItemId(args.item), &transition, &context)
            .await
            .map_err(|error| application_failure(error, &context.correlation_id))?;

        let to = outcome.to.map(|to| to.label()).unwrap_or("removed");
        Ok(Success::with_data(
            format!("{} {} -> {to}", outcome.verb, outcome.from),
            json!({
                "item_id": outcome.item_id,
                "verb": outcome.verb.as_str(),
                "from": outcome.from,
                "to": outcome.to,
                "placed": outcome.placed,
            }),
        ))
    })
}

pub fn edit(options: LoadOptions, args: EditArgs) -> CommandResult {
    execute("edit", options, |config, pool| async move {
        let stage = parse_stage(&args.stage).map_err(bad_request)?;
        let edit = parse_json::<Edit>("edit", &args.edit_json).map_err(bad_request)?;
        let context = audit_context();
        let item = service(&config, pool)
            .edit(&PipelineId(args.pipeline), stage, &ItemId(args.item), &edit, &context)
            .await
            .map_err(|error| application_failure(error, &context.correlation_id))?;
        Ok(Success::with_data(format!("applied {}", edit.name()), json!(item)))
    })
}

pub fn totals(options: LoadOptions, pipeline: Option<String>) -> CommandResult {
    execute("totals", options, |config, pool| async move {
        let pipeline_id = pipeline.map(PipelineId);
        let correlation = correlation_id();
        let totals = service(&config, pool)
            .pending_totals(pipeline_id.as_ref())
            .await
            .map_err(|error| application_failure(error, &correlation))?;
        Ok(Success::with_data(
            format!("customer {} / supplier {}", totals.customer, totals.supplier),
            json!(totals),
        ))
    })
}

fn service(config: &AppConfig, pool: DbPool) -> PipelineService<SqlRecordStore> {
    PipelineService::from_config(SqlRecordStore::new(pool), &config.workflow)
}

fn audit_context() -> AuditContext {
    AuditContext::new(None, None, correlation_id(), ACTOR)
}

fn tree_view(tree: &PipelineTree, node: &PipelineNode) -> TreeView {
    TreeView {
        id: node.id.clone(),
        name: node.name.clone(),
        items: StageName::ALL
            .into_iter()
            .map(|stage| (stage.collection(), node.items(stage).len()))
            .collect(),
        children: tree
            .children_of(&node.id)
            .into_iter()
            .map(|child| tree_view(tree, child))
            .collect(),
    }
}

fn parse_stage(raw: &str) -> anyhow::Result<StageName> {
    StageName::parse(raw).ok_or_else(|| anyhow!("unknown stage `{raw}`"))
}

fn parse_json<T>(what: &str, raw: &str) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(raw).with_context(|| format!("invalid {what} JSON"))
}

fn bad_request(error: anyhow::Error) -> Failure {
    Failure::new("invalid_argument", format!("{error:#}"), EXIT_DOMAIN)
}
