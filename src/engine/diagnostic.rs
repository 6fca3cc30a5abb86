//! Exact substring scan of a sample against the signature catalog.
//!
//! Occurrences may overlap: after a hit at `i` the scan resumes at `i + 1`.

use crate::domain::{Finding, Sequence, Signature};

/// Finds every occurrence of every signature in `sample`.
///
/// Findings are ordered by catalog order, then by position. Signatures with
/// an empty reference sequence are skipped.
pub fn diagnose(sample: &Sequence, catalog: &[Signature]) -> Vec<Finding> {
    catalog
        .iter()
        .flat_map(|signature| {
            occurrences(sample.as_bytes(), signature.sequence.as_bytes())
                .into_iter()
                .map(move |start| Finding {
                    signature_name: signature.name.clone(),
                    level: signature.level,
                    start_offset: start,
                    end_offset: start + signature.sequence.len() - 1,
                })
        })
        .collect()
}

/// Start offsets of `needle` in `haystack`, overlapping matches included.
pub fn occurrences(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle)
        .map(|(start, _)| start)
        .collect()
}
