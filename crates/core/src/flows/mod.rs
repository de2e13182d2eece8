pub mod engine;
pub mod transition;

pub use engine::{
    transition_applied_event, transition_rejected_event, EngineSettings, TransitionEngine,
    COMPLETED_STATUS,
};
pub use transition::{
    Edit, EditOutcome, ExecutionUpdate, Transition, TransitionOutcome, TransitionVerb,
};
