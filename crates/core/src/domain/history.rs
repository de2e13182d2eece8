use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::stage::StageName;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageHistoryEntry {
    pub stage: String,
    pub date: DateTime<Utc>,
}

impl StageHistoryEntry {
    pub fn created(stage: StageName, date: DateTime<Utc>) -> Self {
        Self { stage: format!("Created in {}", stage.label()), date }
    }

    pub fn moved_to(stage: StageName, date: DateTime<Utc>) -> Self {
        Self { stage: format!("Moved to {}", stage.label()), date }
    }

    pub fn rejected_from(stage: StageName, date: DateTime<Utc>) -> Self {
        Self { stage: format!("Rejected from {}", stage.label()), date }
    }
}

/// Append-only log of how an item reached its current stage.
///
/// Entries stay in insertion order. There is no API to edit, remove or sort
/// them, so the record of what happened cannot be rewritten by clock skew.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageHistory(Vec<StageHistoryEntry>);

impl StageHistory {
    pub fn starting_with(entry: StageHistoryEntry) -> Self {
        Self(vec![entry])
    }

    pub fn append(&mut self, entry: StageHistoryEntry) {
        self.0.push(entry);
    }

    pub fn entries(&self) -> &[StageHistoryEntry] {
        &self.0
    }

    pub fn last(&self) -> Option<&StageHistoryEntry> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
