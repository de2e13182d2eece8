use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::item::{ItemId, SubdealId};
use crate::domain::node::PipelineId;
use crate::domain::stage::StageName;
use crate::flows::TransitionVerb;

/// Rejected input. Always raised before any mutation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("customer notes are required before leaving {stage}")]
    NotesRequired { stage: StageName },
    #[error("a non-empty reason is required to {verb} an item")]
    ReasonRequired { verb: TransitionVerb },
    #[error("required field `{field}` is missing")]
    MissingField { field: &'static str },
    #[error("deadline {deadline} is before the request date {date}")]
    InvalidDeadline { date: NaiveDate, deadline: NaiveDate },
    #[error("`{field}` must not be negative (got {value})")]
    NegativeAmount { field: &'static str, value: Decimal },
    #[error("`{field}` ends before it starts")]
    InvalidTimeline { field: &'static str },
    #[error("item must be approved before it can move to {to}")]
    ApprovalRequired { to: StageName },
    #[error("cannot {verb} an item in {stage}")]
    InvalidTransition { stage: StageName, verb: TransitionVerb },
    #[error("`{edit}` edits are not allowed in {stage}")]
    EditNotAllowed { stage: StageName, edit: &'static str },
}

impl ValidationError {
    /// Stable machine-readable name for the failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotesRequired { .. } => "notes_required",
            Self::ReasonRequired { .. } => "reason_required",
            Self::MissingField { .. } => "missing_field",
            Self::InvalidDeadline { .. } => "invalid_deadline",
            Self::NegativeAmount { .. } => "negative_amount",
            Self::InvalidTimeline { .. } => "invalid_timeline",
            Self::ApprovalRequired { .. } => "approval_required",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::EditNotAllowed { .. } => "edit_not_allowed",
        }
    }

    /// The edit that clears the failure, when one exists. Callers route the
    /// user to that edit instead of treating the failure as final.
    pub fn remedy(&self) -> Option<&'static str> {
        match self {
            Self::NotesRequired { .. } => Some("customer_notes"),
            Self::ApprovalRequired { .. } => Some("approval_status"),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("pipeline `{0}` not found")]
    Pipeline(PipelineId),
    #[error("item `{item_id}` not found in {stage} of pipeline `{pipeline_id}`")]
    Item { pipeline_id: PipelineId, stage: StageName, item_id: ItemId },
    #[error("subdeal `{subdeal_id}` not found on item `{item_id}`")]
    Subdeal { item_id: ItemId, subdeal_id: SubdealId },
}

/// Structural problems in the stored pipeline forest.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("pipeline id `{0}` appears more than once")]
    DuplicateNode(PipelineId),
    #[error("pipeline `{pipeline_id}` has more than one {stage} stage record")]
    DuplicateStage { pipeline_id: PipelineId, stage: StageName },
    #[error("pipeline `{0}` is part of a parent cycle")]
    Cycle(PipelineId),
    #[error("pipeline `{pipeline_id}` is nested deeper than {max_depth} levels")]
    TooDeep { pipeline_id: PipelineId, max_depth: usize },
    #[error(
        "item `{item_id}` in pipeline `{pipeline_id}` is stored in {stored_in} but carries {details_for} data"
    )]
    StageMismatch {
        pipeline_id: PipelineId,
        item_id: ItemId,
        stored_in: StageName,
        details_for: StageName,
    },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(
        "collection `{collection}` changed concurrently (expected version {expected}, found {actual})"
    )]
    Consistency { collection: String, expected: u64, actual: u64 },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    /// Only lost-update conflicts are worth retrying; nothing retries automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Consistency { .. })
    }

    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Domain(DomainError::Validation(error)) => Some(error),
            _ => None,
        }
    }
}

impl From<ValidationError> for ApplicationError {
    fn from(value: ValidationError) -> Self {
        Self::Domain(value.into())
    }
}

impl From<NotFoundError> for ApplicationError {
    fn from(value: NotFoundError) -> Self {
        Self::Domain(value.into())
    }
}

impl From<TreeError> for ApplicationError {
    fn from(value: TreeError) -> Self {
        Self::Domain(value.into())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested pipeline or item no longer exists.",
            Self::Conflict { .. } => {
                "The pipeline was changed by someone else. Reload and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::NotFound(error)) => {
                Self::NotFound { message: error.to_string(), correlation_id }
            }
            ApplicationError::Domain(DomainError::Validation(error)) => {
                Self::BadRequest { message: error.to_string(), correlation_id }
            }
            ApplicationError::Domain(DomainError::Tree(_))
            | ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::Internal {
                message: "stored pipeline data is inconsistent".to_owned(),
                correlation_id,
            },
            error @ ApplicationError::Consistency { .. } => {
                Self::Conflict { message: error.to_string(), correlation_id }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
