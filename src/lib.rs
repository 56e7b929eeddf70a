//! # Suspense
//!
//! Builds "predict the output" puzzles from small structured-concurrency
//! programs: grow a random program tree, evaluate it on a deterministic
//! virtual clock, simplify away everything that does not change the
//! output, and hand back the source next to its exact trace.
//!
//! All randomness flows through a seeded [`supply::Supply`], so every
//! challenge is reproducible from its tier and seed alone.

pub mod program;
pub mod supply;
pub mod generator;
pub mod interpreter;
pub mod simplifier;
pub mod render;
pub mod format;
pub mod difficulty;
pub mod challenge;
pub mod persistence;

// Re-export core types for easy access
pub use challenge::{build, Challenge, ChallengeError};
pub use difficulty::Difficulty;
pub use format::{narrated_view, raw_view};
pub use generator::{generate, GenerateError, StatementKind, ALL_KINDS};
pub use interpreter::{evaluate, EvalError, Trace, TraceEvent};
pub use persistence::{ChallengeStore, DirectoryStore, MemoryStore, StoreError, StoreResult};
pub use program::{MalformedTree, Statement};
pub use render::render;
pub use simplifier::simplify;
pub use supply::{Supply, SupplyError};
