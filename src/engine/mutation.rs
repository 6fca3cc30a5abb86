//! Position-wise comparison of samples taken from the same patient.

use crate::domain::Sample;
use crate::utils::CommandError;

/// How a pair of samples differs.
///
/// The classification is made once per pair from the total lengths, and
/// every block of the pair carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Substitution,
    LengthChange,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Substitution => "Sustitucion",
            MutationKind::LengthChange => "CambioLongitud",
        }
    }
}

/// A contiguous span where the two sequences disagree. `end_offset` is inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationBlock {
    pub start_offset: usize,
    pub end_offset: usize,
    pub reference_segment: String,
    pub current_segment: String,
    pub kind: MutationKind,
}

/// Result of comparing the current sample with one prior sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub prior_id: String,
    pub similarity: f64,
    pub blocks: Vec<MutationBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationReport {
    pub subject_id: String,
    pub current_id: String,
    pub comparisons: Vec<Comparison>,
}

/// Compares two sequences over their common prefix length.
///
/// Returns the similarity percentage and the mismatch blocks. Characters
/// past the shorter sequence count neither for nor against similarity.
pub fn diff(reference: &str, current: &str) -> (f64, Vec<MutationBlock>) {
    let a = reference.as_bytes();
    let b = current.as_bytes();
    let overlap = a.len().min(b.len());
    let kind = if a.len() == b.len() {
        MutationKind::Substitution
    } else {
        MutationKind::LengthChange
    };

    let mut blocks = Vec::new();
    let mut matches = 0usize;
    let mut i = 0;
    while i < overlap {
        if a[i] == b[i] {
            matches += 1;
            i += 1;
            continue;
        }
        let start = i;
        while i < overlap && a[i] != b[i] {
            i += 1;
        }
        blocks.push(MutationBlock {
            start_offset: start,
            end_offset: i - 1,
            reference_segment: reference[start..i].to_string(),
            current_segment: current[start..i].to_string(),
            kind,
        });
    }

    let similarity = if overlap == 0 {
        0.0
    } else {
        matches as f64 * 100.0 / overlap as f64
    };
    (similarity, blocks)
}

/// Compares `current` against each of `priors`.
///
/// # Errors
/// `CommandError::InsufficientSamples` when fewer than two samples are involved.
pub fn analyze(current: &Sample, priors: &[Sample]) -> Result<MutationReport, CommandError> {
    if priors.is_empty() {
        return Err(CommandError::InsufficientSamples { have: 1 });
    }

    let comparisons = priors
        .iter()
        .map(|prior| {
            let (similarity, blocks) = diff(prior.sequence.as_str(), current.sequence.as_str());
            Comparison {
                prior_id: prior.id.clone(),
                similarity,
                blocks,
            }
        })
        .collect();

    Ok(MutationReport {
        subject_id: current.subject_id.clone(),
        current_id: current.id.clone(),
        comparisons,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Sequence;
    use chrono::{Duration, TimeZone, Utc};

    fn sample(n: i64, s: &str) -> Sample {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n);
        Sample::new("77", Sequence::parse(s, 100).unwrap(), at)
    }

    #[test]
    fn test_single_substitution() {
        let (similarity, blocks) = diff("ATCG", "ATGG");
        assert_eq!(similarity, 75.0);
        assert_eq!(
            blocks,
            vec![MutationBlock {
                start_offset: 2,
                end_offset: 2,
                reference_segment: "C".into(),
                current_segment: "G".into(),
                kind: MutationKind::Substitution,
            }]
        );
    }

    #[test]
    fn test_identical_overlap_has_no_blocks() {
        let (similarity, blocks) = diff("ATCG", "ATCG");
        assert_eq!(similarity, 100.0);
        assert!(blocks.is_empty());

        let (similarity, blocks) = diff("ATCG", "ATCGTT");
        assert_eq!(similarity, 100.0);
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_contiguous_mismatches_form_one_block() {
        let (similarity, blocks) = diff("AAAAAAAA", "ATTTAAGA");
        assert_eq!(blocks.len(), 2);
        assert_eq!((blocks[0].start_offset, blocks[0].end_offset), (1, 3));
        assert_eq!(blocks[0].reference_segment, "AAA");
        assert_eq!(blocks[0].current_segment, "TTT");
        assert_eq!((blocks[1].start_offset, blocks[1].end_offset), (6, 6));
        assert_eq!(similarity, 50.0);
    }

    #[test]
    fn test_block_running_to_end_of_overlap() {
        let (_, blocks) = diff("ATCG", "ATGC");
        assert_eq!(blocks.len(), 1);
        assert_eq!((blocks[0].start_offset, blocks[0].end_offset), (2, 3));
    }

    #[test]
    fn test_length_change_marks_every_block() {
        let (similarity, blocks) = diff("ATCGAA", "TTCGA");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, MutationKind::LengthChange);
        assert_eq!(similarity, 80.0);
    }

    #[test]
    fn test_analyze_compares_each_prior() {
        let priors = vec![sample(0, "ATCG"), sample(1, "TTCG")];
        let current = sample(2, "ATGG");
        let report = analyze(&current, &priors).unwrap();

        assert_eq!(report.subject_id, "77");
        assert_eq!(report.current_id, current.id);
        assert_eq!(report.comparisons.len(), 2);
        assert_eq!(report.comparisons[0].prior_id, priors[0].id);
        assert_eq!(report.comparisons[0].similarity, 75.0);
        assert_eq!(report.comparisons[1].similarity, 50.0);
        assert_eq!(report.comparisons[1].blocks.len(), 2);
    }

    #[test]
    fn test_analyze_requires_two_samples() {
        let current = sample(0, "ATCG");
        assert_eq!(
            analyze(&current, &[]),
            Err(CommandError::InsufficientSamples { have: 1 })
        );
    }
}
