use std::{fmt, str::FromStr};

use super::sequence::Sequence;
use crate::utils::CommandError;

/// How dangerous a pathogen is considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InfectiousnessLevel {
    Low,
    Normal,
    High,
}

impl InfectiousnessLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            InfectiousnessLevel::Low => "Bajo",
            InfectiousnessLevel::Normal => "Normal",
            InfectiousnessLevel::High => "Alto",
        }
    }
}

impl fmt::Display for InfectiousnessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InfectiousnessLevel {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bajo" | "low" | "poco infeccioso" => Ok(InfectiousnessLevel::Low),
            "normal" | "medio" | "medium" => Ok(InfectiousnessLevel::Normal),
            "alto" | "high" | "altamente infeccioso" => Ok(InfectiousnessLevel::High),
            other => Err(CommandError::Validation(format!(
                "Nivel de infecciosidad desconocido: {}",
                other
            ))),
        }
    }
}

/// Reference sequence of a named pathogen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub level: InfectiousnessLevel,
    pub sequence: Sequence,
}

impl Signature {
    pub fn new(name: impl Into<String>, level: InfectiousnessLevel, sequence: Sequence) -> Self {
        Self {
            name: name.into(),
            level,
            sequence,
        }
    }
}
