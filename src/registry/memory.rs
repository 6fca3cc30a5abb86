use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{mapref::entry::Entry, DashMap};

use super::{DiagnosisStore, SampleStore, SignatureCatalog, SubjectRegistry};
use crate::domain::{Diagnosis, Patient, Sample, Signature};
use crate::utils::StorageError;

/// Signature catalog on a concurrent map.
///
/// Each entry carries a registration sequence number so listing order does
/// not depend on hashing.
#[derive(Default)]
pub struct MemoryCatalog {
    entries: DashMap<String, (u64, Signature)>,
    next_seq: AtomicU64,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignatureCatalog for MemoryCatalog {
    fn register(&self, signature: Signature) -> Result<(), StorageError> {
        match self.entries.entry(signature.name.clone()) {
            Entry::Occupied(_) => Err(StorageError::Duplicate(format!("Virus {}", signature.name))),
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert((seq, signature));
                Ok(())
            }
        }
    }

    fn get(&self, name: &str) -> Result<Option<Signature>, StorageError> {
        Ok(self.entries.get(name).map(|entry| entry.value().1.clone()))
    }

    fn remove(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.entries.remove(name).is_some())
    }

    fn list(&self) -> Result<Vec<Signature>, StorageError> {
        let mut all: Vec<(u64, Signature)> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|(seq, _)| *seq);
        Ok(all.into_iter().map(|(_, signature)| signature).collect())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Default)]
pub struct MemorySubjectRegistry {
    patients: DashMap<String, Patient>,
}

impl MemorySubjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubjectRegistry for MemorySubjectRegistry {
    fn create(&self, patient: Patient) -> Result<(), StorageError> {
        match self.patients.entry(patient.document.clone()) {
            Entry::Occupied(_) => Err(StorageError::Duplicate(format!("Paciente {}", patient.document))),
            Entry::Vacant(slot) => {
                slot.insert(patient);
                Ok(())
            }
        }
    }

    fn get(&self, document: &str) -> Result<Option<Patient>, StorageError> {
        Ok(self.patients.get(document).map(|entry| entry.value().clone()))
    }

    fn list(&self) -> Result<Vec<Patient>, StorageError> {
        let mut all: Vec<Patient> = self.patients.iter().map(|entry| entry.value().clone()).collect();
        all.sort_by(|a, b| a.document.cmp(&b.document));
        Ok(all)
    }

    fn len(&self) -> usize {
        self.patients.len()
    }
}

/// Sample history keyed by subject, plus an id index.
#[derive(Default)]
pub struct MemorySampleStore {
    by_subject: DashMap<String, Vec<Sample>>,
    by_id: DashMap<String, Sample>,
}

impl MemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a free id for `sample`, suffixing `-n` on clashes.
    fn reserve_id(&self, sample: &mut Sample) {
        let base = sample.id.clone();
        let mut n = 1;
        loop {
            match self.by_id.entry(sample.id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(sample.clone());
                    return;
                }
                Entry::Occupied(_) => {
                    sample.id = format!("{}-{}", base, n);
                    n += 1;
                }
            }
        }
    }
}

impl SampleStore for MemorySampleStore {
    fn append(&self, mut sample: Sample) -> Result<Sample, StorageError> {
        self.reserve_id(&mut sample);

        let mut history = self.by_subject.entry(sample.subject_id.clone()).or_default();
        let at = history.partition_point(|s| s.captured_at <= sample.captured_at);
        history.insert(at, sample.clone());
        Ok(sample)
    }

    fn list_by_subject(&self, subject_id: &str) -> Result<Vec<Sample>, StorageError> {
        Ok(self
            .by_subject
            .get(subject_id)
            .map(|history| history.value().clone())
            .unwrap_or_default())
    }

    fn get(&self, sample_id: &str) -> Result<Option<Sample>, StorageError> {
        Ok(self.by_id.get(sample_id).map(|entry| entry.value().clone()))
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }
}

#[derive(Default)]
pub struct MemoryDiagnosisStore {
    by_subject: DashMap<String, Vec<Diagnosis>>,
}

impl MemoryDiagnosisStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagnosisStore for MemoryDiagnosisStore {
    fn record(&self, diagnosis: Diagnosis) -> Result<(), StorageError> {
        self.by_subject
            .entry(diagnosis.subject_id.clone())
            .or_default()
            .push(diagnosis);
        Ok(())
    }

    fn list_by_subject(&self, subject_id: &str) -> Result<Vec<Diagnosis>, StorageError> {
        Ok(self
            .by_subject
            .get(subject_id)
            .map(|list| list.value().clone())
            .unwrap_or_default())
    }

    fn list_all(&self) -> Result<Vec<Diagnosis>, StorageError> {
        let mut groups: Vec<(String, Vec<Diagnosis>)> = self
            .by_subject
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        groups.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(groups.into_iter().flat_map(|(_, list)| list).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InfectiousnessLevel, Sequence};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::thread;

    fn seq(s: &str) -> Sequence {
        Sequence::parse(s, 100).unwrap()
    }

    fn patient(doc: &str) -> Patient {
        Patient {
            document: doc.into(),
            first_name: "Luis".into(),
            last_name: "Mora".into(),
            age: 40,
            email: "luis@example.com".into(),
            gender: "M".into(),
            city: "Quito".into(),
            country: "Ecuador".into(),
        }
    }

    #[test]
    fn test_catalog_keeps_registration_order() {
        let catalog = MemoryCatalog::new();
        for name in ["Zika", "Dengue", "Ebola", "Avian"] {
            catalog
                .register(Signature::new(name, InfectiousnessLevel::Normal, seq("ATCG")))
                .unwrap();
        }
        let names: Vec<String> = catalog.list().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Zika", "Dengue", "Ebola", "Avian"]);
    }

    #[test]
    fn test_catalog_rejects_duplicate_name() {
        let catalog = MemoryCatalog::new();
        let sig = Signature::new("Zika", InfectiousnessLevel::High, seq("ATCG"));
        catalog.register(sig.clone()).unwrap();
        assert!(matches!(catalog.register(sig), Err(StorageError::Duplicate(_))));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_catalog_remove_frees_name() {
        let catalog = MemoryCatalog::new();
        let sig = Signature::new("Zika", InfectiousnessLevel::High, seq("ATCG"));
        catalog.register(sig.clone()).unwrap();
        assert!(catalog.remove("Zika").unwrap());
        assert!(!catalog.remove("Zika").unwrap());
        assert!(catalog.get("Zika").unwrap().is_none());
        catalog.register(sig).unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_subjects_duplicate_and_lookup() {
        let subjects = MemorySubjectRegistry::new();
        subjects.create(patient("200")).unwrap();
        subjects.create(patient("100")).unwrap();
        assert!(matches!(subjects.create(patient("100")), Err(StorageError::Duplicate(_))));
        assert_eq!(subjects.get("200").unwrap().unwrap().document, "200");
        assert!(subjects.get("300").unwrap().is_none());

        let docs: Vec<String> = subjects.list().unwrap().into_iter().map(|p| p.document).collect();
        assert_eq!(docs, vec!["100", "200"]);
    }

    #[test]
    fn test_samples_sorted_by_capture_time() {
        let store = MemorySampleStore::new();
        let late = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store.append(Sample::new("1", seq("AAAA"), late)).unwrap();
        store.append(Sample::new("1", seq("CCCC"), early)).unwrap();

        let history = store.list_by_subject("1").unwrap();
        assert_eq!(history[0].sequence.as_str(), "CCCC");
        assert_eq!(history[1].sequence.as_str(), "AAAA");
        assert!(store.list_by_subject("2").unwrap().is_empty());
    }

    #[test]
    fn test_sample_id_clash_gets_suffix() {
        let store = MemorySampleStore::new();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let first = store.append(Sample::new("1", seq("AAAA"), at)).unwrap();
        let second = store.append(Sample::new("1", seq("CCCC"), at)).unwrap();

        assert_eq!(first.id, "1_20240101000000000");
        assert_eq!(second.id, "1_20240101000000000-1");
        assert_eq!(store.get(&second.id).unwrap().unwrap().sequence.as_str(), "CCCC");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_diagnoses_grouped_by_subject() {
        let store = MemoryDiagnosisStore::new();
        for subject in ["b", "a", "b"] {
            store
                .record(Diagnosis {
                    sample_id: format!("{}_x", subject),
                    subject_id: subject.into(),
                    diagnosed_at: Utc::now(),
                    findings: Vec::new(),
                })
                .unwrap();
        }
        assert_eq!(store.list_by_subject("b").unwrap().len(), 2);
        let order: Vec<String> = store.list_all().unwrap().into_iter().map(|d| d.subject_id).collect();
        assert_eq!(order, vec!["a", "b", "b"]);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let store = Arc::new(MemorySampleStore::new());
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        store.append(Sample::new("shared", seq("ATCG"), at)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.list_by_subject("shared").unwrap().len(), 400);
        assert_eq!(store.len(), 400);
    }
}
