//! Sequence algorithms driven by the command handlers.

pub mod diagnostic;
pub mod mutation;

pub use diagnostic::diagnose;
pub use mutation::{analyze, diff, Comparison, MutationBlock, MutationKind, MutationReport};
