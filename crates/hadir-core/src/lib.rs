//! hadir-core — Recognition engine for the Hadir attendance system.
//!
//! Holds the embedding roster with tolerant snapshot loading, cosine
//! similarity matching against a configured threshold, and the ordered
//! fallback extraction chain over an ONNX face pipeline.

pub mod detector;
pub mod embedder;
pub mod embedding;
pub mod extract;
pub mod matcher;
pub mod pipeline;
pub mod roster;

pub use embedding::Embedding;
pub use extract::{ExtractAttempt, ExtractError, FallbackExtractor};
pub use matcher::{MatchResult, RosterMatcher};
pub use roster::{EmbeddingStore, Roster, RosterEntry};
