//! Collapse retrieved chunks into one document per source

use super::models::{ContextDocument, Match};
use indexmap::map::Entry;
use indexmap::IndexMap;

/// Documents and their source ids, both in first-occurrence order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deduplicated {
    pub documents: Vec<ContextDocument>,
    pub source_ids: Vec<String>,
}

impl Deduplicated {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }
}

/// Keep the first chunk seen for each source id
pub fn dedup(matches: &[Match]) -> Deduplicated {
    let mut by_source: IndexMap<&str, &str> = IndexMap::with_capacity(matches.len());
    for m in matches {
        if let Entry::Vacant(slot) = by_source.entry(m.source_id.as_str()) {
            slot.insert(m.chunk_text.as_str());
        }
    }

    let documents: Vec<ContextDocument> = by_source
        .into_iter()
        .map(|(source_id, text)| ContextDocument {
            source_id: source_id.to_string(),
            full_text: text.to_string(),
        })
        .collect();
    let source_ids = documents.iter().map(|d| d.source_id.clone()).collect();

    Deduplicated {
        documents,
        source_ids,
    }
}
