//! Caller-facing pipeline operations.
//!
//! Every mutation follows the same cycle: load the `pipelines` collection with
//! its version, rebuild the tree, run the engine against one node, write the node
//! back into the tree, flatten and save with the version read at the start. The
//! in-process mutex orders writers that share a service; the version token
//! catches writers in other processes.

use tokio::sync::Mutex;
use tracing::{info, warn};

use dealflow_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use dealflow_core::config::WorkflowConfig;
use dealflow_core::domain::item::{Intake, ItemId, PipelineItem};
use dealflow_core::domain::node::{PipelineId, PipelineNode};
use dealflow_core::domain::purchase::PurchaseRecord;
use dealflow_core::domain::stage::StageName;
use dealflow_core::errors::{ApplicationError, NotFoundError, ValidationError};
use dealflow_core::finance::{
    customer_pending_total, customer_pending_total_tree, supplier_pending_total, PendingTotals,
};
use dealflow_core::flows::{
    transition_applied_event, transition_rejected_event, Edit, Transition, TransitionEngine,
    TransitionOutcome,
};
use dealflow_core::tree::{find_by_id, flatten_tree, update_in_tree, PipelineTree};

use crate::repositories::{PipelineRepository, RecordStore, RepositoryError};

pub struct PipelineService<S, A = TracingAuditSink> {
    repository: PipelineRepository<S>,
    engine: TransitionEngine,
    audit: A,
    writer: Mutex<()>,
}

impl<S> PipelineService<S, TracingAuditSink>
where
    S: RecordStore,
{
    pub fn new(store: S) -> Self {
        Self::with_parts(
            PipelineRepository::new(store),
            TransitionEngine::default(),
            TracingAuditSink,
        )
    }

    pub fn from_config(store: S, workflow: &WorkflowConfig) -> Self {
        Self::with_parts(
            PipelineRepository::with_max_depth(store, workflow.max_tree_depth),
            TransitionEngine::new(workflow.engine_settings()),
            TracingAuditSink,
        )
    }
}

impl<S, A> PipelineService<S, A>
where
    S: RecordStore,
    A: AuditSink,
{
    pub fn with_parts(
        repository: PipelineRepository<S>,
        engine: TransitionEngine,
        audit: A,
    ) -> Self {
        Self { repository, engine, audit, writer: Mutex::new(()) }
    }

    pub fn repository(&self) -> &PipelineRepository<S> {
        &self.repository
    }

    pub fn engine(&self) -> &TransitionEngine {
        &self.engine
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    pub async fn tree(&self) -> Result<PipelineTree, ApplicationError> {
        let (tree, _) = self.repository.load_tree().await?;
        Ok(tree)
    }

    /// Every pipeline, parents before children.
    pub async fn list_pipelines(&self) -> Result<Vec<PipelineNode>, ApplicationError> {
        Ok(flatten_tree(&self.tree().await?))
    }

    pub async fn pipeline(
        &self,
        pipeline_id: &PipelineId,
    ) -> Result<PipelineNode, ApplicationError> {
        let tree = self.tree().await?;
        find_by_id(&tree, pipeline_id)
            .cloned()
            .ok_or_else(|| NotFoundError::Pipeline(pipeline_id.clone()).into())
    }

    pub async fn list_stage(
        &self,
        pipeline_id: &PipelineId,
        stage: StageName,
    ) -> Result<Vec<PipelineItem>, ApplicationError> {
        let node = self.pipeline(pipeline_id).await?;
        Ok(node.items(stage).to_vec())
    }

    pub async fn create_pipeline(
        &self,
        name: &str,
        parent_id: Option<PipelineId>,
        context: &AuditContext,
    ) -> Result<PipelineNode, ApplicationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingField { field: "name" }.into());
        }

        let _writer = self.writer.lock().await;
        let (mut tree, version) = self.repository.load_tree().await?;
        if let Some(parent_id) = &parent_id {
            if find_by_id(&tree, parent_id).is_none() {
                return Err(NotFoundError::Pipeline(parent_id.clone()).into());
            }
        }

        let node = PipelineNode::new(name, parent_id);
        tree.insert(node.clone())?;
        let version = self.save(&tree, version, context).await?;

        info!(
            event_name = "pipeline.created",
            correlation_id = %context.correlation_id,
            pipeline_id = %node.id,
            parent_id = ?node.parent_id.as_ref().map(|id| id.0.as_str()),
            version,
            "pipeline created"
        );
        self.audit.emit(
            AuditEvent::new(
                &AuditContext { pipeline_id: Some(node.id.clone()), ..context.clone() },
                "pipeline.created",
                AuditCategory::Structure,
                AuditOutcome::Success,
            )
            .with_metadata("name", node.name.clone()),
        );
        Ok(node)
    }

    /// Creates an RFQ item from the intake form.
    pub async fn create_item(
        &self,
        pipeline_id: &PipelineId,
        intake: Intake,
        context: &AuditContext,
    ) -> Result<PipelineItem, ApplicationError> {
        let (item, version) = self
            .mutate(pipeline_id, context, |node| {
                let (updated, item_id) = self.engine.intake(node, intake)?;
                let item = updated
                    .stage(StageName::Rfq)
                    .and_then(|stage| stage.item(&item_id))
                    .cloned()
                    .ok_or_else(|| NotFoundError::Item {
                        pipeline_id: node.id.clone(),
                        stage: StageName::Rfq,
                        item_id: item_id.clone(),
                    })?;
                Ok((updated, item))
            })
            .await?;

        info!(
            event_name = "pipeline.item.created",
            correlation_id = %context.correlation_id,
            pipeline_id = %pipeline_id,
            item_id = %item.id,
            version,
            "rfq item created"
        );
        self.audit.emit(
            AuditEvent::new(
                &context.for_item(pipeline_id, &item.id),
                "pipeline.item_created",
                AuditCategory::Intake,
                AuditOutcome::Success,
            )
            .with_metadata("company_name", item.intake.company_name.clone()),
        );
        Ok(item)
    }

    pub async fn transition(
        &self,
        pipeline_id: &PipelineId,
        stage: StageName,
        item_id: &ItemId,
        transition: &Transition,
        context: &AuditContext,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let result = self
            .mutate(pipeline_id, context, |node| {
                let outcome = self.engine.apply(node, stage, item_id, transition)?;
                Ok((outcome.node.clone(), outcome))
            })
            .await;

        // Audited only once the save has settled; a lost write must not read as applied.
        match result {
            Ok((outcome, version)) => {
                info!(
                    event_name = "pipeline.transition.applied",
                    correlation_id = %context.correlation_id,
                    pipeline_id = %pipeline_id,
                    item_id = %item_id,
                    verb = %outcome.verb,
                    from = %outcome.from,
                    to = outcome.to.map(|to| to.label()).unwrap_or("removed"),
                    placed = outcome.placed.len(),
                    version,
                    "transition persisted"
                );
                self.audit.emit(transition_applied_event(context, pipeline_id, &outcome));
                Ok(outcome)
            }
            Err(error) => {
                warn!(
                    event_name = "pipeline.transition.rejected",
                    correlation_id = %context.correlation_id,
                    pipeline_id = %pipeline_id,
                    item_id = %item_id,
                    verb = %transition.verb(),
                    from = %stage,
                    retryable = error.is_retryable(),
                    error = %error,
                    "transition rejected"
                );
                self.audit.emit(transition_rejected_event(
                    context,
                    pipeline_id,
                    item_id,
                    stage,
                    transition.verb(),
                    &error,
                ));
                Err(error)
            }
        }
    }

    /// In-stage change; the item stays where it is and its history is untouched.
    pub async fn edit(
        &self,
        pipeline_id: &PipelineId,
        stage: StageName,
        item_id: &ItemId,
        edit: &Edit,
        context: &AuditContext,
    ) -> Result<PipelineItem, ApplicationError> {
        let (item, version) = self
            .mutate(pipeline_id, context, |node| {
                let outcome = self.engine.edit(node, stage, item_id, edit)?;
                Ok((outcome.node, outcome.item))
            })
            .await?;

        info!(
            event_name = "pipeline.item.edited",
            correlation_id = %context.correlation_id,
            pipeline_id = %pipeline_id,
            item_id = %item_id,
            edit = edit.name(),
            version,
            "item edited"
        );
        self.audit.emit(
            AuditEvent::new(
                &context.for_item(pipeline_id, item_id),
                "pipeline.item_edited",
                AuditCategory::Edit,
                AuditOutcome::Success,
            )
            .with_metadata("edit", edit.name())
            .with_metadata("stage", stage.label()),
        );
        Ok(item)
    }

    pub async fn record_purchase(
        &self,
        purchase: PurchaseRecord,
    ) -> Result<PurchaseRecord, ApplicationError> {
        if purchase.vendor.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "vendor" }.into());
        }
        if purchase.total.is_sign_negative() && !purchase.total.is_zero() {
            return Err(ValidationError::NegativeAmount { field: "total", value: purchase.total }
                .into());
        }

        let _writer = self.writer.lock().await;
        let (mut purchases, version) = self.repository.load_purchases().await?;
        purchases.push(purchase.clone());
        self.repository.save_purchases(&purchases, version).await?;
        Ok(purchase)
    }

    /// Customer balance due across execution items plus unpaid supplier bills.
    /// With a pipeline id only that node's items count on the customer side.
    pub async fn pending_totals(
        &self,
        pipeline_id: Option<&PipelineId>,
    ) -> Result<PendingTotals, ApplicationError> {
        let tree = self.tree().await?;
        let customer = match pipeline_id {
            Some(id) => {
                let node =
                    find_by_id(&tree, id).ok_or_else(|| NotFoundError::Pipeline(id.clone()))?;
                customer_pending_total(node)
            }
            None => customer_pending_total_tree(&tree),
        };
        let (purchases, _) = self.repository.load_purchases().await?;

        Ok(PendingTotals { customer, supplier: supplier_pending_total(&purchases) })
    }

    async fn mutate<T, F>(
        &self,
        pipeline_id: &PipelineId,
        context: &AuditContext,
        apply: F,
    ) -> Result<(T, u64), ApplicationError>
    where
        F: FnOnce(&PipelineNode) -> Result<(PipelineNode, T), ApplicationError>,
    {
        let _writer = self.writer.lock().await;
        let (tree, version) = self.repository.load_tree().await?;
        let node = find_by_id(&tree, pipeline_id)
            .ok_or_else(|| NotFoundError::Pipeline(pipeline_id.clone()))?;
        let (updated, value) = apply(node)?;
        let tree = update_in_tree(tree, updated);
        let version = self.save(&tree, version, context).await?;
        Ok((value, version))
    }

    async fn save(
        &self,
        tree: &PipelineTree,
        expected_version: u64,
        context: &AuditContext,
    ) -> Result<u64, ApplicationError> {
        match self.repository.save_tree(tree, expected_version).await {
            Ok(version) => Ok(version),
            Err(error) => {
                if let RepositoryError::Conflict { actual, .. } = &error {
                    warn!(
                        event_name = "pipeline.save.conflict",
                        correlation_id = %context.correlation_id,
                        expected_version,
                        actual_version = *actual,
                        "pipelines changed since they were loaded"
                    );
                }
                self.audit.emit(
                    AuditEvent::new(
                        context,
                        "pipeline.save_failed",
                        AuditCategory::Persistence,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", error.to_string()),
                );
                Err(error.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use serde_json::Value;

    use dealflow_core::audit::{AuditContext, InMemoryAuditSink};
    use dealflow_core::domain::item::{ApprovalStatus, Intake, ItemId, Priority, StageDetails};
    use dealflow_core::domain::node::PipelineId;
    use dealflow_core::domain::purchase::{PaymentStatus, PurchaseId, PurchaseRecord};
    use dealflow_core::domain::stage::StageName;
    use dealflow_core::errors::{ApplicationError, DomainError, NotFoundError, ValidationError};
    use dealflow_core::finance::AdvancePayment;
    use dealflow_core::flows::{Edit, ExecutionUpdate, Transition, TransitionEngine};

    use super::PipelineService;
    use crate::repositories::{
        InMemoryRecordStore, PipelineRepository, RecordStore, RepositoryError, Snapshot,
    };

    type Service = PipelineService<Arc<InMemoryRecordStore>, InMemoryAuditSink>;

    fn service(store: Arc<InMemoryRecordStore>) -> Service {
        PipelineService::with_parts(
            PipelineRepository::new(store),
            TransitionEngine::default(),
            InMemoryAuditSink::default(),
        )
    }

    /// Store whose saves start losing the version race once `contended` is set.
    #[derive(Default)]
    struct ContendedStore {
        inner: InMemoryRecordStore,
        contended: AtomicBool,
    }

    #[async_trait]
    impl RecordStore for ContendedStore {
        async fn load(&self, collection: &str) -> Result<Snapshot, RepositoryError> {
            self.inner.load(collection).await
        }

        async fn save(
            &self,
            collection: &str,
            records: Vec<Value>,
            expected_version: u64,
        ) -> Result<u64, RepositoryError> {
            if self.contended.load(Ordering::SeqCst) {
                return Err(RepositoryError::Conflict {
                    collection: collection.to_string(),
                    expected: expected_version,
                    actual: expected_version + 1,
                });
            }
            self.inner.save(collection, records, expected_version).await
        }
    }

    fn context() -> AuditContext {
        AuditContext::new(None, None, "req-test", "tester")
    }

    fn intake(company: &str) -> Intake {
        Intake {
            date: NaiveDate::from_ymd_opt(2024, 11, 4).expect("date"),
            department: "Fabrication".to_string(),
            company_name: company.to_string(),
            contact: "buyer@example.com".to_string(),
            state: String::new(),
            deadline: NaiveDate::from_ymd_opt(2025, 1, 15).expect("deadline"),
            description: String::new(),
            source: "Web".to_string(),
            priority: Priority::Medium,
            file_name: None,
        }
    }

    #[tokio::test]
    async fn create_pipeline_validates_parent_and_name() {
        let service = service(Arc::new(InMemoryRecordStore::new()));
        let root = service.create_pipeline("Industrial", None, &context()).await.expect("root");
        let child = service
            .create_pipeline("Fabrication", Some(root.id.clone()), &context())
            .await
            .expect("child");

        let listed: Vec<PipelineId> =
            service.list_pipelines().await.expect("list").into_iter().map(|node| node.id).collect();
        assert_eq!(listed, vec![root.id.clone(), child.id.clone()]);

        let orphan = service
            .create_pipeline("Orphan", Some(PipelineId("missing".to_string())), &context())
            .await
            .expect_err("unknown parent");
        assert!(matches!(
            orphan,
            ApplicationError::Domain(DomainError::NotFound(NotFoundError::Pipeline(_)))
        ));

        let blank = service.create_pipeline("  ", None, &context()).await.expect_err("blank");
        assert_eq!(blank.validation(), Some(&ValidationError::MissingField { field: "name" }));
    }

    #[tokio::test]
    async fn transition_persists_and_list_stage_reflects_it() {
        let service = service(Arc::new(InMemoryRecordStore::new()));
        let pipeline = service.create_pipeline("Industrial", None, &context()).await.expect("p");
        let item = service.create_item(&pipeline.id, intake("Northwind"), &context()).await.expect("i");

        let outcome = service
            .transition(&pipeline.id, StageName::Rfq, &item.id, &Transition::Accept, &context())
            .await
            .expect("accept");
        assert_eq!(outcome.to, Some(StageName::Feasibility));

        assert!(service.list_stage(&pipeline.id, StageName::Rfq).await.expect("rfq").is_empty());
        let feasibility =
            service.list_stage(&pipeline.id, StageName::Feasibility).await.expect("feasibility");
        assert_eq!(feasibility.len(), 1);
        assert_eq!(feasibility[0].stage_history.len(), 2);

        let events = service.audit().events();
        assert!(events.iter().any(|event| event.event_type == "pipeline.transition_applied"));
        assert!(events.iter().any(|event| event.event_type == "pipeline.item_created"));
    }

    #[tokio::test]
    async fn failed_validation_leaves_store_untouched() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(store.clone());
        let pipeline = service.create_pipeline("Industrial", None, &context()).await.expect("p");
        let item = service.create_item(&pipeline.id, intake("Northwind"), &context()).await.expect("i");
        service
            .transition(&pipeline.id, StageName::Rfq, &item.id, &Transition::Accept, &context())
            .await
            .expect("accept");
        let before = store.load("pipelines").await.expect("snapshot");

        let error = service
            .transition(
                &pipeline.id,
                StageName::Feasibility,
                &item.id,
                &Transition::Accept,
                &context(),
            )
            .await
            .expect_err("notes required");
        assert_eq!(
            error.validation(),
            Some(&ValidationError::NotesRequired { stage: StageName::Feasibility })
        );

        let after = store.load("pipelines").await.expect("snapshot");
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn unknown_pipeline_or_item_is_not_found() {
        let service = service(Arc::new(InMemoryRecordStore::new()));
        let missing = PipelineId("nowhere".to_string());
        let error = service.list_stage(&missing, StageName::Rfq).await.expect_err("missing");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::NotFound(NotFoundError::Pipeline(_)))
        ));

        let pipeline = service.create_pipeline("Industrial", None, &context()).await.expect("p");
        let error = service
            .transition(
                &pipeline.id,
                StageName::Rfq,
                &ItemId("ghost".to_string()),
                &Transition::Delete,
                &context(),
            )
            .await
            .expect_err("missing item");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::NotFound(NotFoundError::Item { .. }))
        ));
    }

    #[tokio::test]
    async fn concurrent_writer_in_another_process_is_detected() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service(store.clone());
        let pipeline = service.create_pipeline("Industrial", None, &context()).await.expect("p");
        let item = service.create_item(&pipeline.id, intake("Northwind"), &context()).await.expect("i");

        // Another writer reads the same version, then this service saves first.
        let other = PipelineRepository::new(store.clone());
        let (stale_tree, stale_version) = other.load_tree().await.expect("stale read");

        service
            .transition(&pipeline.id, StageName::Rfq, &item.id, &Transition::Accept, &context())
            .await
            .expect("accept");

        let error: ApplicationError =
            other.save_tree(&stale_tree, stale_version).await.expect_err("stale save").into();
        assert!(error.is_retryable());
        assert!(matches!(error, ApplicationError::Consistency { .. }));

        let feasibility =
            service.list_stage(&pipeline.id, StageName::Feasibility).await.expect("feasibility");
        assert_eq!(feasibility.len(), 1);
    }

    #[tokio::test]
    async fn writers_sharing_a_service_are_serialized() {
        let service = Arc::new(service(Arc::new(InMemoryRecordStore::new())));
        let pipeline = service.create_pipeline("Industrial", None, &context()).await.expect("p");

        let mut handles = Vec::new();
        for index in 0..8 {
            let service = service.clone();
            let pipeline_id = pipeline.id.clone();
            handles.push(tokio::spawn(async move {
                service.create_item(&pipeline_id, intake(&format!("Company {index}")), &context()).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("create item");
        }

        let rfq = service.list_stage(&pipeline.id, StageName::Rfq).await.expect("rfq");
        assert_eq!(rfq.len(), 8);
    }

    #[tokio::test]
    async fn pending_totals_follow_execution_financials_and_purchases() {
        let service = service(Arc::new(InMemoryRecordStore::new()));
        let pipeline = service.create_pipeline("Industrial", None, &context()).await.expect("p");
        let item = service.create_item(&pipeline.id, intake("Northwind"), &context()).await.expect("i");
        let ctx = context();
        let id = &pipeline.id;

        service.transition(id, StageName::Rfq, &item.id, &Transition::Accept, &ctx).await.expect("a");
        for stage in [StageName::Feasibility, StageName::Quotation] {
            service
                .edit(id, stage, &item.id, &Edit::CustomerNotes { notes: "ok".to_string() }, &ctx)
                .await
                .expect("notes");
            service.transition(id, stage, &item.id, &Transition::Accept, &ctx).await.expect("a");
        }
        service
            .transition(id, StageName::Negotiation, &item.id, &Transition::Convert, &ctx)
            .await
            .expect("convert");
        let update = ExecutionUpdate {
            order_value: Some(Decimal::new(100_000, 0)),
            expense: Some(Decimal::new(30_000, 0)),
            advance_payment: Some(AdvancePayment::new(Decimal::new(40_000, 0))),
            approval_status: Some(ApprovalStatus::Approved),
            ..ExecutionUpdate::default()
        };
        let edited = service
            .edit(id, StageName::Preprocess, &item.id, &Edit::Execution(update), &ctx)
            .await
            .expect("financials");
        let StageDetails::Preprocess(execution) = &edited.details else {
            panic!("expected preprocess details");
        };
        assert_eq!(execution.financials.profit(), Decimal::new(70_000, 0));

        service
            .record_purchase(PurchaseRecord {
                id: PurchaseId::generate(),
                vendor: "Acme Steel".to_string(),
                bill_number: None,
                total: Decimal::new(2_500, 0),
                payment_status: PaymentStatus::Unpaid,
            })
            .await
            .expect("purchase");

        let totals = service.pending_totals(Some(id)).await.expect("totals");
        assert_eq!(totals.customer, Decimal::new(60_000, 0));
        assert_eq!(totals.supplier, Decimal::new(2_500, 0));

        service
            .transition(id, StageName::Preprocess, &item.id, &Transition::Convert, &ctx)
            .await
            .expect("to postprocess");
        let whole = service.pending_totals(None).await.expect("tree totals");
        assert_eq!(whole.customer, Decimal::new(60_000, 0));
    }

    #[tokio::test]
    async fn lost_save_is_audited_as_rejected_not_applied() {
        let store = Arc::new(ContendedStore::default());
        let service = PipelineService::with_parts(
            PipelineRepository::new(store.clone()),
            TransitionEngine::default(),
            InMemoryAuditSink::default(),
        );
        let pipeline = service.create_pipeline("Industrial", None, &context()).await.expect("p");
        let item = service.create_item(&pipeline.id, intake("Northwind"), &context()).await.expect("i");

        store.contended.store(true, Ordering::SeqCst);
        let error = service
            .transition(&pipeline.id, StageName::Rfq, &item.id, &Transition::Accept, &context())
            .await
            .expect_err("save loses the race");
        assert!(matches!(error, ApplicationError::Consistency { .. }));
        assert!(error.is_retryable());

        store.contended.store(false, Ordering::SeqCst);
        let rfq = service.list_stage(&pipeline.id, StageName::Rfq).await.expect("rfq");
        assert_eq!(rfq.len(), 1);

        let events = service.audit().events();
        let types: Vec<&str> = events.iter().map(|event| event.event_type.as_str()).collect();
        assert!(!types.contains(&"pipeline.transition_applied"), "{types:?}");
        assert!(types.contains(&"pipeline.save_failed"));
        let rejected = events
            .iter()
            .find(|event| event.event_type == "pipeline.transition_rejected")
            .expect("rejected event");
        assert_eq!(rejected.item_id, Some(item.id.clone()));
        assert_eq!(rejected.metadata.get("verb").map(String::as_str), Some("accept"));
    }
}
