use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::history::StageHistoryEntry;
use crate::domain::item::{ApprovalStatus, ItemId, PipelineItem, SubdealId, Timeline};
use crate::domain::node::PipelineNode;
use crate::domain::stage::StageName;
use crate::finance::AdvancePayment;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionVerb {
    Accept,
    Reject,
    Close,
    Convert,
    Delete,
}

impl TransitionVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Close => "close",
            Self::Convert => "convert",
            Self::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "accept" => Some(Self::Accept),
            "reject" => Some(Self::Reject),
            "close" => Some(Self::Close),
            "convert" => Some(Self::Convert),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for TransitionVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verb together with its payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum Transition {
    Accept,
    Reject { reason: String },
    Close { reason: String },
    Convert,
    Delete,
}

impl Transition {
    pub fn verb(&self) -> TransitionVerb {
        match self {
            Self::Accept => TransitionVerb::Accept,
            Self::Reject { .. } => TransitionVerb::Reject,
            Self::Close { .. } => TransitionVerb::Close,
            Self::Convert => TransitionVerb::Convert,
            Self::Delete => TransitionVerb::Delete,
        }
    }

    pub fn from_verb(verb: TransitionVerb, reason: Option<String>) -> Self {
        let reason = reason.unwrap_or_default();
        match verb {
            TransitionVerb::Accept => Self::Accept,
            TransitionVerb::Reject => Self::Reject { reason },
            TransitionVerb::Close => Self::Close { reason },
            TransitionVerb::Convert => Self::Convert,
            TransitionVerb::Delete => Self::Delete,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// The pipeline with the transition applied; the input node is untouched.
    pub node: PipelineNode,
    pub verb: TransitionVerb,
    pub item_id: ItemId,
    pub from: StageName,
    pub to: Option<StageName>,
    /// Ids now sitting in `to` because of this transition. Empty for deletes,
    /// the original id for plain moves, fresh ids for a subdeal fan-out.
    pub placed: Vec<ItemId>,
    pub history_entry: Option<StageHistoryEntry>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionUpdate {
    #[serde(default)]
    pub order_value: Option<Decimal>,
    #[serde(default)]
    pub expense: Option<Decimal>,
    #[serde(default)]
    pub advance_payment: Option<AdvancePayment>,
    #[serde(default)]
    pub working_timeline: Option<Timeline>,
    #[serde(default)]
    pub project_timeline: Option<Timeline>,
    #[serde(default)]
    pub approval_status: Option<ApprovalStatus>,
}

/// In-stage changes. Edits never append to the stage history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "edit", rename_all = "snake_case")]
pub enum Edit {
    CustomerNotes { notes: String },
    AddSubdeal { department: String, notes: String },
    RemoveSubdeal { subdeal_id: SubdealId },
    /// Keeps a Negotiation item open with a scheduled follow-up.
    Followup { at: DateTime<Utc>, note: Option<String> },
    AssignTeamMember { team_member: String },
    Execution(ExecutionUpdate),
}

impl Edit {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CustomerNotes { .. } => "customer_notes",
            Self::AddSubdeal { .. } => "add_subdeal",
            Self::RemoveSubdeal { .. } => "remove_subdeal",
            Self::Followup { .. } => "followup",
            Self::AssignTeamMember { .. } => "team_member",
            Self::Execution(_) => "execution",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditOutcome {
    pub node: PipelineNode,
    pub item: PipelineItem,
}
