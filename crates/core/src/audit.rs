use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::item::ItemId;
use crate::domain::node::PipelineId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Intake,
    Transition,
    Edit,
    Structure,
    Persistence,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub pipeline_id: Option<PipelineId>,
    pub item_id: Option<ItemId>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        pipeline_id: Option<PipelineId>,
        item_id: Option<ItemId>,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self { pipeline_id, item_id, correlation_id: correlation_id.into(), actor: actor.into() }
    }

    pub fn for_item(&self, pipeline_id: &PipelineId, item_id: &ItemId) -> Self {
        Self {
            pipeline_id: Some(pipeline_id.clone()),
            item_id: Some(item_id.clone()),
            correlation_id: self.correlation_id.clone(),
            actor: self.actor.clone(),
        }
    }
}

/// Operator-level audit record. Complements the per-item stage history, which
/// stays the source of truth for how an item moved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub pipeline_id: Option<PipelineId>,
    pub item_id: Option<ItemId>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        context: &AuditContext,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            pipeline_id: context.pipeline_id.clone(),
            item_id: context.item_id.clone(),
            correlation_id: context.correlation_id.clone(),
            event_type: event_type.into(),
            category,
            actor: context.actor.clone(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Writes audit events to the `tracing` pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        let pipeline_id = event.pipeline_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown");
        let item_id = event.item_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown");
        match event.outcome {
            AuditOutcome::Success => tracing::info!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                pipeline_id,
                item_id,
                actor = %event.actor,
                metadata = %metadata,
                "audit event"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => tracing::warn!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                pipeline_id,
                item_id,
                actor = %event.actor,
                outcome = ?event.outcome,
                metadata = %metadata,
                "audit event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink},
        domain::{item::ItemId, node::PipelineId},
    };

    #[test]
    fn in_memory_sink_records_events_with_correlation_fields() {
        let sink = InMemoryAuditSink::default();
        let context = AuditContext::new(
            Some(PipelineId("pl-industrial".to_owned())),
            Some(ItemId("rfq-0042".to_owned())),
            "req-123",
            "pipeline-engine",
        );
        sink.emit(
            AuditEvent::new(
                &context,
                "pipeline.transition_applied",
                AuditCategory::Transition,
                AuditOutcome::Success,
            )
            .with_metadata("from", "RFQ")
            .with_metadata("to", "Feasibility"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-123");
        assert_eq!(events[0].pipeline_id.as_ref().map(|id| id.0.as_str()), Some("pl-industrial"));
        assert_eq!(events[0].item_id.as_ref().map(|id| id.0.as_str()), Some("rfq-0042"));
        assert!(events[0].metadata.contains_key("from"));
    }

    #[test]
    fn for_item_keeps_correlation_and_actor() {
        let base = AuditContext::new(None, None, "req-9", "cli");
        let scoped =
            base.for_item(&PipelineId("pl-1".to_owned()), &ItemId("item-1".to_owned()));

        assert_eq!(scoped.correlation_id, "req-9");
        assert_eq!(scoped.actor, "cli");
        assert_eq!(scoped.item_id, Some(ItemId("item-1".to_owned())));
    }
}
