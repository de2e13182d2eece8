use chrono::{DateTime, Utc};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome};
use crate::domain::history::StageHistoryEntry;
use crate::domain::item::{
    ApprovalStatus, ClosedDetails, CompletedDetails, ExecutionDetails, FeasibilityDetails, Intake,
    ItemId, NegotiationDetails, NegotiationEvent, PipelineItem, QuotationDetails, QuotationStatus,
    StageDetails, Subdeal, SubdealId, Timeline,
};
use crate::domain::node::{PipelineId, PipelineNode};
use crate::domain::stage::{ForwardVerb, StageName};
use crate::errors::{DomainError, NotFoundError, ValidationError};
use crate::flows::transition::{
    Edit, EditOutcome, ExecutionUpdate, Transition, TransitionOutcome, TransitionVerb,
};

pub const COMPLETED_STATUS: &str = "Completed";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    /// Preprocess items must be `Approved` before converting onward.
    pub require_approval_for_postprocess: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { require_approval_for_postprocess: true }
    }
}

/// Executes transitions and edits against one pipeline node.
///
/// Every operation works on a clone of the node and hands the result back, so a
/// failed validation leaves the caller's node exactly as it was.
#[derive(Clone, Debug, Default)]
pub struct TransitionEngine {
    settings: EngineSettings,
}

struct Placement {
    to: Option<StageName>,
    items: Vec<PipelineItem>,
    history_entry: Option<StageHistoryEntry>,
}

impl TransitionEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Creates an RFQ item from the intake form.
    pub fn intake(
        &self,
        node: &PipelineNode,
        intake: Intake,
    ) -> Result<(PipelineNode, ItemId), DomainError> {
        intake.validate()?;

        let item = PipelineItem::new_rfq(intake, Utc::now());
        let item_id = item.id.clone();
        let mut updated = node.clone();
        updated.stage_entry(StageName::Rfq).items.push(item);
        Ok((updated, item_id))
    }

    pub fn apply(
        &self,
        node: &PipelineNode,
        stage: StageName,
        item_id: &ItemId,
        transition: &Transition,
    ) -> Result<TransitionOutcome, DomainError> {
        self.apply_at(node, stage, item_id, transition, Utc::now())
    }

    pub fn apply_at(
        &self,
        node: &PipelineNode,
        stage: StageName,
        item_id: &ItemId,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DomainError> {
        let item = find_item(node, stage, item_id)?;
        let verb = transition.verb();
        if stage.is_terminal() {
            return Err(ValidationError::InvalidTransition { stage, verb }.into());
        }

        let placement = match transition {
            Transition::Accept => self.accept(stage, item, now)?,
            Transition::Convert => self.convert(stage, item, now)?,
            Transition::Reject { reason } => reject(stage, item, reason, now)?,
            Transition::Close { reason } => close(stage, item, reason, now)?,
            Transition::Delete => Placement { to: None, items: Vec::new(), history_entry: None },
        };

        let mut updated = node.clone();
        updated.stage_entry(stage).remove(item_id);
        let placed: Vec<ItemId> = placement.items.iter().map(|item| item.id.clone()).collect();
        if let Some(to) = placement.to {
            updated.stage_entry(to).items.extend(placement.items);
        }

        for id in placed.iter().chain(std::iter::once(item_id)) {
            if updated.locate_item(id).len() > 1 {
                return Err(DomainError::InvariantViolation(format!(
                    "item `{id}` would be held by more than one stage"
                )));
            }
        }

        Ok(TransitionOutcome {
            node: updated,
            verb,
            item_id: item_id.clone(),
            from: stage,
            to: placement.to,
            placed,
            history_entry: placement.history_entry,
        })
    }

    pub fn edit(
        &self,
        node: &PipelineNode,
        stage: StageName,
        item_id: &ItemId,
        edit: &Edit,
    ) -> Result<EditOutcome, DomainError> {
        let mut item = find_item(node, stage, item_id)?.clone();
        let not_allowed = || ValidationError::EditNotAllowed { stage, edit: edit.name() };

        match (edit, &mut item.details) {
            (
                Edit::CustomerNotes { notes },
                StageDetails::Feasibility(FeasibilityDetails { customer_notes }),
            )
            | (
                Edit::CustomerNotes { notes },
                StageDetails::Quotation(QuotationDetails { customer_notes, .. }),
            )
            | (
                Edit::CustomerNotes { notes },
                StageDetails::Negotiation(NegotiationDetails { customer_notes, .. }),
            ) => {
                *customer_notes = notes.trim().to_string();
            }
            (Edit::AddSubdeal { department, notes }, StageDetails::Quotation(details)) => {
                if department.trim().is_empty() {
                    return Err(ValidationError::MissingField { field: "department" }.into());
                }
                details.subdeals.push(Subdeal {
                    id: SubdealId::generate(),
                    department: department.trim().to_string(),
                    notes: notes.trim().to_string(),
                });
            }
            (Edit::RemoveSubdeal { subdeal_id }, StageDetails::Quotation(details)) => {
                let before = details.subdeals.len();
                details.subdeals.retain(|subdeal| &subdeal.id != subdeal_id);
                if details.subdeals.len() == before {
                    return Err(NotFoundError::Subdeal {
                        item_id: item_id.clone(),
                        subdeal_id: subdeal_id.clone(),
                    }
                    .into());
                }
            }
            (Edit::Followup { at, note }, StageDetails::Negotiation(details)) => {
                details.quotation_status = QuotationStatus::Followup;
                details.followup_datetime = Some(*at);
                if let Some(note) = note.as_deref().map(str::trim).filter(|note| !note.is_empty()) {
                    details.events.push(NegotiationEvent { date: Utc::now(), note: note.to_string() });
                }
            }
            (Edit::AssignTeamMember { team_member }, StageDetails::Negotiation(details)) => {
                if team_member.trim().is_empty() {
                    return Err(ValidationError::MissingField { field: "team_member" }.into());
                }
                details.team_member = Some(team_member.trim().to_string());
            }
            (Edit::Execution(update), StageDetails::Preprocess(execution))
            | (Edit::Execution(update), StageDetails::Postprocess(execution)) => {
                apply_execution_update(execution, update)?;
            }
            _ => return Err(not_allowed().into()),
        }

        let mut updated = node.clone();
        if let Some(slot) = updated.stage_entry(stage).item_mut(item_id) {
            *slot = item.clone();
        }
        Ok(EditOutcome { node: updated, item })
    }

    fn accept(
        &self,
        stage: StageName,
        item: &PipelineItem,
        now: DateTime<Utc>,
    ) -> Result<Placement, DomainError> {
        let to = forward_destination(stage, ForwardVerb::Accept, TransitionVerb::Accept)?;

        let details = match &item.details {
            StageDetails::Rfq => StageDetails::Feasibility(FeasibilityDetails::default()),
            StageDetails::Feasibility(details) => {
                let customer_notes = required_notes(stage, &details.customer_notes)?;
                StageDetails::Quotation(QuotationDetails { customer_notes, subdeals: Vec::new() })
            }
            StageDetails::Quotation(details) => {
                let customer_notes = required_notes(stage, &details.customer_notes)?;
                if !details.subdeals.is_empty() {
                    return Ok(fan_out(item, &customer_notes, &details.subdeals, now));
                }
                StageDetails::Negotiation(NegotiationDetails {
                    customer_notes,
                    ..NegotiationDetails::default()
                })
            }
            other => return Err(details_mismatch(item, stage, other)),
        };

        Ok(moved(item, to, details, now))
    }

    fn convert(
        &self,
        stage: StageName,
        item: &PipelineItem,
        now: DateTime<Utc>,
    ) -> Result<Placement, DomainError> {
        let to = forward_destination(stage, ForwardVerb::Convert, TransitionVerb::Convert)?;

        let details = match &item.details {
            StageDetails::Negotiation(details) => {
                let mut archive = details.clone();
                archive.quotation_status = QuotationStatus::Convert;
                StageDetails::Preprocess(ExecutionDetails {
                    customer_notes: details.customer_notes.clone(),
                    subdeal_notes: details.subdeal_notes.clone(),
                    approval_status: ApprovalStatus::Pending,
                    negotiation_archive: Some(archive),
                    ..ExecutionDetails::default()
                })
            }
            StageDetails::Preprocess(execution) => {
                self.ensure_approved(execution, to)?;
                StageDetails::Postprocess(execution.clone())
            }
            StageDetails::Postprocess(execution) => {
                self.ensure_approved(execution, to)?;
                StageDetails::Completed(CompletedDetails {
                    completion_date: now,
                    final_status: COMPLETED_STATUS.to_string(),
                    execution: execution.clone(),
                })
            }
            other => return Err(details_mismatch(item, stage, other)),
        };

        Ok(moved(item, to, details, now))
    }

    fn ensure_approved(
        &self,
        execution: &ExecutionDetails,
        to: StageName,
    ) -> Result<(), ValidationError> {
        if self.settings.require_approval_for_postprocess
            && execution.approval_status != ApprovalStatus::Approved
        {
            return Err(ValidationError::ApprovalRequired { to });
        }
        Ok(())
    }
}

/// Audit record for a transition that has been persisted.
pub fn transition_applied_event(
    context: &AuditContext,
    pipeline_id: &PipelineId,
    outcome: &TransitionOutcome,
) -> AuditEvent {
    AuditEvent::new(
        &context.for_item(pipeline_id, &outcome.item_id),
        "pipeline.transition_applied",
        AuditCategory::Transition,
        AuditOutcome::Success,
    )
    .with_metadata("verb", outcome.verb.as_str())
    .with_metadata("from", outcome.from.label())
    .with_metadata("to", outcome.to.map(|to| to.label()).unwrap_or("removed"))
    .with_metadata("placed", outcome.placed.len().to_string())
}

/// Audit record for a transition refused by the engine or lost on save.
pub fn transition_rejected_event(
    context: &AuditContext,
    pipeline_id: &PipelineId,
    item_id: &ItemId,
    stage: StageName,
    verb: TransitionVerb,
    error: &impl std::fmt::Display,
) -> AuditEvent {
    AuditEvent::new(
        &context.for_item(pipeline_id, item_id),
        "pipeline.transition_rejected",
        AuditCategory::Transition,
        AuditOutcome::Rejected,
    )
    .with_metadata("verb", verb.as_str())
    .with_metadata("from", stage.label())
    .with_metadata("error", error.to_string())
}

fn find_item<'a>(
    node: &'a PipelineNode,
    stage: StageName,
    item_id: &ItemId,
) -> Result<&'a PipelineItem, NotFoundError> {
    node.stage(stage).and_then(|holder| holder.item(item_id)).ok_or_else(|| NotFoundError::Item {
        pipeline_id: node.id.clone(),
        stage,
        item_id: item_id.clone(),
    })
}

fn forward_destination(
    stage: StageName,
    expected: ForwardVerb,
    verb: TransitionVerb,
) -> Result<StageName, ValidationError> {
    match (stage.forward_verb(), stage.forward()) {
        (Some(actual), Some(to)) if actual == expected => Ok(to),
        _ => Err(ValidationError::InvalidTransition { stage, verb }),
    }
}

fn required_notes(stage: StageName, notes: &str) -> Result<String, ValidationError> {
    let notes = notes.trim();
    if notes.is_empty() {
        return Err(ValidationError::NotesRequired { stage });
    }
    Ok(notes.to_string())
}

fn required_reason(verb: TransitionVerb, reason: &str) -> Result<String, ValidationError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ValidationError::ReasonRequired { verb });
    }
    Ok(reason.to_string())
}

fn details_mismatch(item: &PipelineItem, stage: StageName, details: &StageDetails) -> DomainError {
    DomainError::InvariantViolation(format!(
        "item `{}` is held in {stage} but carries {} data",
        item.id,
        details.stage()
    ))
}

fn moved(
    item: &PipelineItem,
    to: StageName,
    details: StageDetails,
    now: DateTime<Utc>,
) -> Placement {
    let entry = StageHistoryEntry::moved_to(to, now);
    let mut next = item.clone();
    next.stage_history.append(entry.clone());
    next.details = details;
    Placement { to: Some(to), items: vec![next], history_entry: Some(entry) }
}

/// One Negotiation item per subdeal; the Quotation item itself is consumed.
fn fan_out(
    item: &PipelineItem,
    customer_notes: &str,
    subdeals: &[Subdeal],
    now: DateTime<Utc>,
) -> Placement {
    let entry = StageHistoryEntry::moved_to(StageName::Negotiation, now);
    let items = subdeals
        .iter()
        .map(|subdeal| {
            let mut intake = item.intake.clone();
            intake.department = subdeal.department.clone();
            let mut stage_history = item.stage_history.clone();
            stage_history.append(entry.clone());
            PipelineItem {
                id: ItemId::generate(),
                intake,
                stage_history,
                details: StageDetails::Negotiation(NegotiationDetails {
                    customer_notes: customer_notes.to_string(),
                    subdeal_notes: Some(subdeal.notes.clone()),
                    quotation_status: QuotationStatus::Followup,
                    ..NegotiationDetails::default()
                }),
            }
        })
        .collect();

    Placement { to: Some(StageName::Negotiation), items, history_entry: Some(entry) }
}

fn reject(
    stage: StageName,
    item: &PipelineItem,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Placement, DomainError> {
    let reason = required_reason(TransitionVerb::Reject, reason)?;
    let entry = StageHistoryEntry::rejected_from(stage, now);
    Ok(closed(item, stage, reason, item.details.clone(), entry, now))
}

fn close(
    stage: StageName,
    item: &PipelineItem,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Placement, DomainError> {
    if stage != StageName::Negotiation {
        return Err(ValidationError::InvalidTransition { stage, verb: TransitionVerb::Close }.into());
    }
    let reason = required_reason(TransitionVerb::Close, reason)?;
    let StageDetails::Negotiation(details) = &item.details else {
        return Err(details_mismatch(item, stage, &item.details));
    };

    let mut archived = details.clone();
    archived.quotation_status = QuotationStatus::Closed;
    archived.closed_reason = Some(reason.clone());
    let entry = StageHistoryEntry::moved_to(StageName::ClosedDeals, now);
    Ok(closed(item, stage, reason, StageDetails::Negotiation(archived), entry, now))
}

fn closed(
    item: &PipelineItem,
    stage: StageName,
    reason: String,
    archived: StageDetails,
    entry: StageHistoryEntry,
    now: DateTime<Utc>,
) -> Placement {
    let mut next = item.clone();
    next.stage_history.append(entry.clone());
    next.details = StageDetails::Closed(ClosedDetails {
        rejection_reason: reason,
        rejection_stage: stage,
        closed_date: now,
        archived: Box::new(archived),
    });
    Placement { to: Some(StageName::ClosedDeals), items: vec![next], history_entry: Some(entry) }
}

fn apply_execution_update(
    execution: &mut ExecutionDetails,
    update: &ExecutionUpdate,
) -> Result<(), ValidationError> {
    if let Some(order_value) = update.order_value {
        execution.financials.set_order_value(order_value)?;
    }
    if let Some(expense) = update.expense {
        execution.financials.set_expense(expense)?;
    }
    if let Some(advance_payment) = &update.advance_payment {
        execution.financials.set_advance_payment(advance_payment.clone())?;
    }
    if let Some(timeline) = update.working_timeline {
        execution.working_timeline =
            Some(Timeline::new("working_timeline", timeline.start, timeline.end)?);
    }
    if let Some(timeline) = update.project_timeline {
        execution.project_timeline =
            Some(Timeline::new("project_timeline", timeline.start, timeline.end)?);
    }
    if let Some(approval_status) = update.approval_status {
        execution.approval_status = approval_status;
    }
    Ok(())
}
