use std::fmt;

use chrono::{DateTime, Utc};

use super::signature::InfectiousnessLevel;

/// One occurrence of a signature inside a sample.
///
/// Offsets are zero based and `end_offset` is inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub signature_name: String,
    pub level: InfectiousnessLevel,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// `name,level,start,end`
impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.signature_name, self.level, self.start_offset, self.end_offset
        )
    }
}

/// The findings recorded for one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    pub sample_id: String,
    pub subject_id: String,
    pub diagnosed_at: DateTime<Utc>,
    pub findings: Vec<Finding>,
}

impl Diagnosis {
    pub fn has_level(&self, level: InfectiousnessLevel) -> bool {
        self.findings.iter().any(|f| f.level == level)
    }

    /// Findings joined with `|`, empty when nothing matched.
    pub fn findings_line(&self) -> String {
        join_findings(&self.findings)
    }
}

pub fn join_findings(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}
