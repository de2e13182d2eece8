pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod finance;
pub mod flows;
pub mod tree;

pub use domain::item::{Intake, ItemId, PipelineItem, StageDetails};
pub use domain::node::{PipelineId, PipelineNode};
pub use domain::purchase::{PaymentStatus, PurchaseRecord};
pub use domain::stage::{Stage, StageName};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use finance::{Financials, PendingTotals};
pub use flows::{Edit, Transition, TransitionEngine, TransitionVerb};
pub use tree::{build_tree, find_by_id, flatten_tree, update_in_tree, PipelineTree};
