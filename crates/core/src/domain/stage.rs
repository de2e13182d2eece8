use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::item::{ItemId, PipelineItem};

/// The fixed, ordered set of phases a pipeline item moves through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Rfq,
    Feasibility,
    Quotation,
    Negotiation,
    Preprocess,
    Postprocess,
    #[serde(rename = "closed", alias = "closed_deals")]
    ClosedDeals,
    Completed,
}

/// Verb that moves an item forward out of a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardVerb {
    Accept,
    Convert,
}

impl StageName {
    pub const ALL: [StageName; 8] = [
        Self::Rfq,
        Self::Feasibility,
        Self::Quotation,
        Self::Negotiation,
        Self::Preprocess,
        Self::Postprocess,
        Self::ClosedDeals,
        Self::Completed,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Rfq => "RFQ",
            Self::Feasibility => "Feasibility",
            Self::Quotation => "Quotation",
            Self::Negotiation => "Negotiation",
            Self::Preprocess => "Preprocess",
            Self::Postprocess => "Postprocess",
            Self::ClosedDeals => "Closed Deals",
            Self::Completed => "Completed",
        }
    }

    /// Record store key for the stage's item list.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Rfq => "rfq",
            Self::Feasibility => "feasibility",
            Self::Quotation => "quotation",
            Self::Negotiation => "negotiation",
            Self::Preprocess => "preprocess",
            Self::Postprocess => "postprocess",
            Self::ClosedDeals => "closed",
            Self::Completed => "completed",
        }
    }

    /// Accepts either the display label or the collection key, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', '_'], " ");
        Self::ALL.into_iter().find(|stage| {
            normalized == stage.label().to_ascii_lowercase() || normalized == stage.collection()
        })
    }

    pub fn position(&self) -> usize {
        Self::ALL.iter().position(|stage| stage == self).unwrap_or(Self::ALL.len())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ClosedDeals | Self::Completed)
    }

    /// Destination of the forward transition out of this stage.
    pub fn forward(&self) -> Option<StageName> {
        match self {
            Self::Rfq => Some(Self::Feasibility),
            Self::Feasibility => Some(Self::Quotation),
            Self::Quotation => Some(Self::Negotiation),
            Self::Negotiation => Some(Self::Preprocess),
            Self::Preprocess => Some(Self::Postprocess),
            Self::Postprocess => Some(Self::Completed),
            Self::ClosedDeals | Self::Completed => None,
        }
    }

    pub fn forward_verb(&self) -> Option<ForwardVerb> {
        match self {
            Self::Rfq | Self::Feasibility | Self::Quotation => Some(ForwardVerb::Accept),
            Self::Negotiation | Self::Preprocess | Self::Postprocess => Some(ForwardVerb::Convert),
            Self::ClosedDeals | Self::Completed => None,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: StageName,
    #[serde(default)]
    pub items: Vec<PipelineItem>,
}

impl Stage {
    pub fn empty(name: StageName) -> Self {
        Self { name, items: Vec::new() }
    }

    pub fn item(&self, id: &ItemId) -> Option<&PipelineItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn item_mut(&mut self, id: &ItemId) -> Option<&mut PipelineItem> {
        self.items.iter_mut().find(|item| &item.id == id)
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.item(id).is_some()
    }

    pub fn remove(&mut self, id: &ItemId) -> Option<PipelineItem> {
        let index = self.items.iter().position(|item| &item.id == id)?;
        Some(self.items.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::{ForwardVerb, StageName};

    #[test]
    fn forward_chain_ends_at_completed() {
        let mut stage = StageName::Rfq;
        let mut visited = vec![stage];
        while let Some(next) = stage.forward() {
            visited.push(next);
            stage = next;
        }

        assert_eq!(
            visited,
            vec![
                StageName::Rfq,
                StageName::Feasibility,
                StageName::Quotation,
                StageName::Negotiation,
                StageName::Preprocess,
                StageName::Postprocess,
                StageName::Completed,
            ]
        );
        assert!(StageName::ClosedDeals.forward().is_none());
    }

    #[test]
    fn parse_accepts_labels_and_collection_keys() {
        assert_eq!(StageName::parse("Closed Deals"), Some(StageName::ClosedDeals));
        assert_eq!(StageName::parse("closed"), Some(StageName::ClosedDeals));
        assert_eq!(StageName::parse("closed_deals"), Some(StageName::ClosedDeals));
        assert_eq!(StageName::parse("RFQ"), Some(StageName::Rfq));
        assert_eq!(StageName::parse(" preprocess "), Some(StageName::Preprocess));
        assert_eq!(StageName::parse("archive"), None);
    }

    #[test]
    fn forward_verb_switches_to_convert_after_quotation() {
        assert_eq!(StageName::Quotation.forward_verb(), Some(ForwardVerb::Accept));
        assert_eq!(StageName::Negotiation.forward_verb(), Some(ForwardVerb::Convert));
        assert_eq!(StageName::Completed.forward_verb(), None);
    }

    #[test]
    fn serde_uses_collection_keys() {
        let encoded = serde_json::to_string(&StageName::ClosedDeals).expect("encode");
        assert_eq!(encoded, "\"closed\"");
        let decoded: StageName = serde_json::from_str("\"closed_deals\"").expect("decode alias");
        assert_eq!(decoded, StageName::ClosedDeals);
    }
}
