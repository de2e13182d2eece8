pub mod history;
pub mod item;
pub mod node;
pub mod purchase;
pub mod stage;
