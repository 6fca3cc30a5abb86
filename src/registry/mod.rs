//! Storage ports used by the command handlers.
//!
//! Handlers only see these traits. Every operation touches a single logical
//! record and must be atomic on its own; there are no multi-entry transactions.

pub mod memory;

use std::sync::Arc;

use crate::domain::{Diagnosis, Patient, Sample, Signature};
use crate::utils::StorageError;

pub use memory::{MemoryCatalog, MemoryDiagnosisStore, MemorySampleStore, MemorySubjectRegistry};

/// Registered pathogen signatures.
pub trait SignatureCatalog: Send + Sync {
    /// Registers a signature. Names are unique.
    ///
    /// # Errors
    /// `StorageError::Duplicate` when the name is already taken.
    fn register(&self, signature: Signature) -> Result<(), StorageError>;

    fn get(&self, name: &str) -> Result<Option<Signature>, StorageError>;

    /// Removes a signature, returning whether it was present.
    fn remove(&self, name: &str) -> Result<bool, StorageError>;

    /// All signatures, in registration order.
    fn list(&self) -> Result<Vec<Signature>, StorageError>;

    fn len(&self) -> usize;
}

/// Registered patients.
pub trait SubjectRegistry: Send + Sync {
    /// # Errors
    /// `StorageError::Duplicate` when the document is already registered.
    fn create(&self, patient: Patient) -> Result<(), StorageError>;

    fn get(&self, document: &str) -> Result<Option<Patient>, StorageError>;

    /// All patients, ordered by document.
    fn list(&self) -> Result<Vec<Patient>, StorageError>;

    fn len(&self) -> usize;
}

/// Append-only sample history.
pub trait SampleStore: Send + Sync {
    /// Appends a sample and returns it as stored.
    ///
    /// The returned id may carry a `-n` suffix when the derived id was taken.
    fn append(&self, sample: Sample) -> Result<Sample, StorageError>;

    /// Samples of one subject, oldest first.
    fn list_by_subject(&self, subject_id: &str) -> Result<Vec<Sample>, StorageError>;

    fn get(&self, sample_id: &str) -> Result<Option<Sample>, StorageError>;

    fn len(&self) -> usize;
}

/// Diagnoses, one per diagnosed sample.
pub trait DiagnosisStore: Send + Sync {
    fn record(&self, diagnosis: Diagnosis) -> Result<(), StorageError>;

    /// Diagnoses of one subject, in recording order.
    fn list_by_subject(&self, subject_id: &str) -> Result<Vec<Diagnosis>, StorageError>;

    /// Every diagnosis, grouped by subject.
    fn list_all(&self) -> Result<Vec<Diagnosis>, StorageError>;
}

/// The set of registries shared by all sessions.
#[derive(Clone)]
pub struct Registries {
    pub signatures: Arc<dyn SignatureCatalog>,
    pub subjects: Arc<dyn SubjectRegistry>,
    pub samples: Arc<dyn SampleStore>,
    pub diagnoses: Arc<dyn DiagnosisStore>,
}

impl Registries {
    /// Registries backed by in-process concurrent maps.
    pub fn in_memory() -> Self {
        Self {
            signatures: Arc::new(MemoryCatalog::new()),
            subjects: Arc::new(MemorySubjectRegistry::new()),
            samples: Arc::new(MemorySampleStore::new()),
            diagnoses: Arc::new(MemoryDiagnosisStore::new()),
        }
    }
}
