//! Entities handled by the command surface.

pub mod diagnosis;
pub mod patient;
pub mod sample;
pub mod sequence;
pub mod signature;

pub use diagnosis::{Diagnosis, Finding};
pub use patient::Patient;
pub use sample::Sample;
pub use sequence::{parse_fasta, FastaRecord, Sequence, DEFAULT_MAX_SEQUENCE_LENGTH};
pub use signature::{InfectiousnessLevel, Signature};
