//! Retrieval-augmented chat backend
//!
//! Answers a question by retrieving relevant chunks from a vector index,
//! assembling them with prior turns into a token-budgeted prompt, and
//! streaming the generated answer back to the caller.

pub mod api;
pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod generation;
pub mod metrics;
pub mod relay;
pub mod retrieval;
pub mod telemetry;

pub use error::{ChatError, Result};
