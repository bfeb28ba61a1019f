//! Data models for context assembly

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque token id produced by a codec
pub type Token = u32;

/// Speaker of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A chunk returned by the vector index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Stable id of the originating document
    pub source_id: String,
    pub chunk_text: String,
    pub chunk_index: u32,
    /// Smaller is closer
    pub embedding_distance: f32,
}

impl Match {
    pub fn new(
        source_id: impl Into<String>,
        chunk_text: impl Into<String>,
        chunk_index: u32,
        embedding_distance: f32,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            chunk_text: chunk_text.into(),
            chunk_index,
            embedding_distance,
        }
    }
}

/// One document per distinct source, built from its first-seen chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDocument {
    pub source_id: String,
    pub full_text: String,
}

/// Token accounting for a single model invocation
///
/// `consumed` only grows during an allocation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub total_limit: usize,
    pub reserved_for_generation: usize,
    pub consumed: usize,
}

impl Budget {
    pub fn new(total_limit: usize, reserved_for_generation: usize) -> Self {
        Self {
            total_limit,
            reserved_for_generation,
            consumed: 0,
        }
    }

    /// Tokens still available before touching the generation reserve
    pub fn remaining(&self) -> usize {
        self.total_limit
            .saturating_sub(self.reserved_for_generation)
            .saturating_sub(self.consumed)
    }

    /// Whether `tokens` more would still leave the reserve intact
    pub fn fits(&self, tokens: usize) -> bool {
        self.consumed + tokens + self.reserved_for_generation <= self.total_limit
    }

    /// Record tokens unconditionally
    pub fn consume(&mut self, tokens: usize) {
        self.consumed += tokens;
    }

    /// Record tokens only if they fit; returns whether they were admitted
    pub fn try_consume(&mut self, tokens: usize) -> bool {
        if self.fits(tokens) {
            self.consume(tokens);
            true
        } else {
            false
        }
    }

    pub fn is_within_limit(&self) -> bool {
        self.consumed + self.reserved_for_generation <= self.total_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);

        let msg: Message = serde_json::from_str(r#"{"role":"user","content":"q"}"#).unwrap();
        assert_eq!(msg.role, Role::User);
    }

    #[test]
    fn test_budget_try_consume() {
        let mut budget = Budget::new(100, 20);
        assert!(budget.try_consume(50));
        assert_eq!(budget.remaining(), 30);
        assert!(!budget.try_consume(31));
        assert_eq!(budget.consumed, 50);
        assert!(budget.try_consume(30));
        assert_eq!(budget.remaining(), 0);
        assert!(budget.is_within_limit());
    }

    #[test]
    fn test_budget_overflowing_consume() {
        let mut budget = Budget::new(10, 5);
        budget.consume(8);
        assert!(!budget.is_within_limit());
        assert_eq!(budget.remaining(), 0);
    }
}
