//! Nucleotide sequences and FASTA input.

use std::fmt;

use crate::utils::CommandError;

/// Default upper bound on the length of a submitted sequence.
pub const DEFAULT_MAX_SEQUENCE_LENGTH: usize = 10_000;

/// A non-empty sequence over `{A, T, C, G}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sequence(String);

impl Sequence {
    /// Validates and normalizes raw input.
    ///
    /// Bases are upper-cased and embedded whitespace is dropped, so line
    /// wrapped sequences are accepted.
    pub fn parse(raw: &str, max_len: usize) -> Result<Self, CommandError> {
        let mut bases = String::with_capacity(raw.len());
        for (pos, c) in raw.chars().filter(|c| !c.is_whitespace()).enumerate() {
            match c.to_ascii_uppercase() {
                b @ ('A' | 'T' | 'C' | 'G') => bases.push(b),
                other => {
                    return Err(CommandError::Validation(format!(
                        "Base invalida '{}' en la posicion {}",
                        other, pos
                    )))
                }
            }
        }

        if bases.is_empty() {
            return Err(CommandError::Validation("La secuencia esta vacia".into()));
        }
        if bases.len() > max_len {
            return Err(CommandError::Validation(format!(
                "Secuencia demasiado larga: {} > {}",
                bases.len(),
                max_len
            )));
        }
        Ok(Self(bases))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Sequence {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One record of a FASTA document, before the header is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    pub header: String,
    pub sequence: String,
}

/// Splits a FASTA document into records.
///
/// Lines before the first header, or records without sequence lines, are
/// errors. Sequence lines are concatenated without validation.
pub fn parse_fasta(input: &str) -> Result<Vec<FastaRecord>, CommandError> {
    let mut records: Vec<FastaRecord> = Vec::new();

    for (lineno, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('>') {
            if let Some(prev) = records.last() {
                if prev.sequence.is_empty() {
                    return Err(CommandError::Validation(format!(
                        "Registro '{}' sin secuencia",
                        prev.header
                    )));
                }
            }
            records.push(FastaRecord {
                header: header.trim().to_string(),
                sequence: String::new(),
            });
        } else {
            match records.last_mut() {
                Some(record) => record.sequence.push_str(line),
                None => {
                    return Err(CommandError::Validation(format!(
                        "Linea {} fuera de un registro FASTA",
                        lineno + 1
                    )))
                }
            }
        }
    }

    match records.last() {
        None => Err(CommandError::Validation("Documento FASTA vacio".into())),
        Some(last) if last.sequence.is_empty() => Err(CommandError::Validation(format!(
            "Registro '{}' sin secuencia",
            last.header
        ))),
        Some(_) => Ok(records),
    }
}
