use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::history::{StageHistory, StageHistoryEntry};
use crate::domain::stage::StageName;
use crate::errors::ValidationError;
use crate::finance::Financials;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubdealId(pub String);

impl SubdealId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for SubdealId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Fields captured on the RFQ form. Never edited after intake; fan-out clones
/// them into new items with the subdeal's department.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intake {
    pub date: NaiveDate,
    pub department: String,
    pub company_name: String,
    pub contact: String,
    #[serde(default)]
    pub state: String,
    pub deadline: NaiveDate,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: String,
    pub priority: Priority,
    #[serde(default, rename = "fileName", alias = "file_name")]
    pub file_name: Option<String>,
}

impl Intake {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("company_name", &self.company_name),
            ("contact", &self.contact),
            ("department", &self.department),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField { field });
            }
        }

        if self.deadline < self.date {
            return Err(ValidationError::InvalidDeadline {
                date: self.date,
                deadline: self.deadline,
            });
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subdeal {
    pub id: SubdealId,
    pub department: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotationStatus {
    #[default]
    Followup,
    Closed,
    Convert,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationEvent {
    pub date: DateTime<Utc>,
    pub note: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Timeline {
    pub fn new(field: &'static str, start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if end < start {
            return Err(ValidationError::InvalidTimeline { field });
        }
        Ok(Self { start, end })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeasibilityDetails {
    #[serde(default)]
    pub customer_notes: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationDetails {
    #[serde(default)]
    pub customer_notes: String,
    #[serde(default)]
    pub subdeals: Vec<Subdeal>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationDetails {
    #[serde(default)]
    pub customer_notes: String,
    #[serde(default)]
    pub subdeal_notes: Option<String>,
    #[serde(default)]
    pub quotation_status: QuotationStatus,
    #[serde(default)]
    pub events: Vec<NegotiationEvent>,
    #[serde(default)]
    pub team_member: Option<String>,
    #[serde(default)]
    pub followup_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_reason: Option<String>,
}

/// Shared shape of Preprocess and Postprocess items.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionDetails {
    #[serde(default)]
    pub customer_notes: String,
    #[serde(default)]
    pub subdeal_notes: Option<String>,
    #[serde(default)]
    pub financials: Financials,
    #[serde(default)]
    pub working_timeline: Option<Timeline>,
    #[serde(default)]
    pub project_timeline: Option<Timeline>,
    #[serde(default)]
    pub approval_status: ApprovalStatus,
    /// Negotiation fields that no longer apply once converted, kept for reference.
    #[serde(default)]
    pub negotiation_archive: Option<NegotiationDetails>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedDetails {
    pub rejection_reason: String,
    pub rejection_stage: StageName,
    pub closed_date: DateTime<Utc>,
    pub archived: Box<StageDetails>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedDetails {
    pub completion_date: DateTime<Utc>,
    pub final_status: String,
    pub execution: ExecutionDetails,
}

/// Stage-specific data. The variant always matches the stage holding the item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageDetails {
    Rfq,
    Feasibility(FeasibilityDetails),
    Quotation(QuotationDetails),
    Negotiation(NegotiationDetails),
    Preprocess(ExecutionDetails),
    Postprocess(ExecutionDetails),
    Closed(ClosedDetails),
    Completed(CompletedDetails),
}

impl StageDetails {
    pub fn stage(&self) -> StageName {
        match self {
            Self::Rfq => StageName::Rfq,
            Self::Feasibility(_) => StageName::Feasibility,
            Self::Quotation(_) => StageName::Quotation,
            Self::Negotiation(_) => StageName::Negotiation,
            Self::Preprocess(_) => StageName::Preprocess,
            Self::Postprocess(_) => StageName::Postprocess,
            Self::Closed(_) => StageName::ClosedDeals,
            Self::Completed(_) => StageName::Completed,
        }
    }

    pub fn customer_notes(&self) -> Option<&str> {
        match self {
            Self::Feasibility(details) => Some(&details.customer_notes),
            Self::Quotation(details) => Some(&details.customer_notes),
            Self::Negotiation(details) => Some(&details.customer_notes),
            Self::Preprocess(details) | Self::Postprocess(details) => {
                Some(&details.customer_notes)
            }
            Self::Completed(details) => Some(&details.execution.customer_notes),
            Self::Closed(details) => details.archived.customer_notes(),
            Self::Rfq => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineItem {
    pub id: ItemId,
    #[serde(flatten)]
    pub intake: Intake,
    pub stage_history: StageHistory,
    pub details: StageDetails,
}

impl PipelineItem {
    pub fn new_rfq(intake: Intake, now: DateTime<Utc>) -> Self {
        Self {
            id: ItemId::generate(),
            intake,
            stage_history: StageHistory::starting_with(StageHistoryEntry::created(
                StageName::Rfq,
                now,
            )),
            details: StageDetails::Rfq,
        }
    }

    pub fn stage(&self) -> StageName {
        self.details.stage()
    }
}
