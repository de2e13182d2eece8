use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::item::{ItemId, PipelineItem};
use crate::domain::stage::{Stage, StageName};
use crate::errors::TreeError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PipelineId(pub String);

impl PipelineId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One pipeline in the forest. Only the parent pointer is persisted; children
/// are derived by [`crate::tree::build_tree`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineNode {
    pub id: PipelineId,
    pub name: String,
    #[serde(default, rename = "parentId", alias = "parent_id")]
    pub parent_id: Option<PipelineId>,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl PipelineNode {
    pub fn new(name: impl Into<String>, parent_id: Option<PipelineId>) -> Self {
        Self::with_id(PipelineId::generate(), name, parent_id)
    }

    pub fn with_id(id: PipelineId, name: impl Into<String>, parent_id: Option<PipelineId>) -> Self {
        Self {
            id,
            name: name.into(),
            parent_id,
            stages: StageName::ALL.into_iter().map(Stage::empty).collect(),
        }
    }

    pub fn stage(&self, name: StageName) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn stage_mut(&mut self, name: StageName) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|stage| stage.name == name)
    }

    /// Stage record for `name`, creating it if a legacy record lacks it.
    pub fn stage_entry(&mut self, name: StageName) -> &mut Stage {
        if let Some(index) = self.stages.iter().position(|stage| stage.name == name) {
            return &mut self.stages[index];
        }
        self.stages.push(Stage::empty(name));
        self.stages.sort_by_key(|stage| stage.name.position());
        let index = self.stages.iter().position(|stage| stage.name == name).unwrap_or(0);
        &mut self.stages[index]
    }

    pub fn items(&self, name: StageName) -> &[PipelineItem] {
        self.stage(name).map(|stage| stage.items.as_slice()).unwrap_or(&[])
    }

    /// Every stage currently holding `item_id`. More than one entry is an
    /// invariant violation.
    pub fn locate_item(&self, item_id: &ItemId) -> Vec<StageName> {
        self.stages.iter().filter(|stage| stage.contains(item_id)).map(|stage| stage.name).collect()
    }

    pub fn item_count(&self) -> usize {
        self.stages.iter().map(|stage| stage.items.len()).sum()
    }

    /// Puts stages in registry order, fills in missing ones and checks that each
    /// item's variant matches the stage holding it.
    pub fn normalize_stages(&mut self) -> Result<(), TreeError> {
        let mut seen = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            if seen.contains(&stage.name) {
                return Err(TreeError::DuplicateStage {
                    pipeline_id: self.id.clone(),
                    stage: stage.name,
                });
            }
            seen.push(stage.name);

            if let Some(item) = stage.items.iter().find(|item| item.stage() != stage.name) {
                return Err(TreeError::StageMismatch {
                    pipeline_id: self.id.clone(),
                    item_id: item.id.clone(),
                    stored_in: stage.name,
                    details_for: item.stage(),
                });
            }
        }

        for name in StageName::ALL {
            if !seen.contains(&name) {
                self.stages.push(Stage::empty(name));
            }
        }
        self.stages.sort_by_key(|stage| stage.name.position());
        Ok(())
    }
}
