//! Confidence-tagged fact structures extracted from dialogue chunks.

use serde::{Deserialize, Serialize};

/// How directly the transcript supports an extracted fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Explicitly stated in dialogue
    High,
    /// Strongly implied
    Medium,
    /// Single or indirect mention
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactEvent {
    pub description: String,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterAction {
    pub character: String,
    pub action: String,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipChange {
    pub characters: Vec<String>,
    pub change: String,
    pub confidence: Confidence,
}

/// Structured facts extracted from one dialogue chunk.
///
/// All fields default to empty so a model response that omits a category
/// still parses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkFactSet {
    #[serde(default)]
    pub events: Vec<FactEvent>,
    #[serde(default)]
    pub character_actions: Vec<CharacterAction>,
    #[serde(default)]
    pub relationship_changes: Vec<RelationshipChange>,
}

impl ChunkFactSet {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.character_actions.is_empty()
            && self.relationship_changes.is_empty()
    }

    /// Merge chunk fact sets in transcript order by concatenation.
    ///
    /// No deduplication: the downstream prose writer owns coherence.
    pub fn merge(sets: &[ChunkFactSet]) -> ChunkFactSet {
        let mut merged = ChunkFactSet::default();
        for set in sets {
            merged.events.extend(set.events.iter().cloned());
            merged
                .character_actions
                .extend(set.character_actions.iter().cloned());
            merged
                .relationship_changes
                .extend(set.relationship_changes.iter().cloned());
        }
        merged
    }

    /// Events at a given confidence level, in extraction order.
    pub fn events_at(&self, confidence: Confidence) -> impl Iterator<Item = &FactEvent> {
        self.events.iter().filter(move |e| e.confidence == confidence)
    }
}
