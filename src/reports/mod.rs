//! Report files built from registry contents and engine output.

use std::{
    collections::HashMap,
    fs,
    io,
    path::{Path, PathBuf},
};

use chrono::Utc;
use tracing::info;

use crate::domain::{Diagnosis, InfectiousnessLevel, Patient};
use crate::engine::MutationReport;

pub const HIGH_RISK_HEADER: &str = "documento,nombre,apellido,muestra,virus,inicio,fin";

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn stamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S%3f").to_string()
}

fn write_report(dir: &Path, file_name: &str, contents: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    fs::write(&path, contents)?;
    info!(path = %path.display(), bytes = contents.len(), "Report written");
    Ok(path)
}

/// One CSV row per high infectiousness finding.
pub fn render_high_risk(patients: &[Patient], diagnoses: &[Diagnosis]) -> String {
    let by_doc: HashMap<&str, &Patient> = patients.iter().map(|p| (p.document.as_str(), p)).collect();

    let mut out = String::from(HIGH_RISK_HEADER);
    out.push('\n');
    for diagnosis in diagnoses.iter().filter(|d| d.has_level(InfectiousnessLevel::High)) {
        let patient = by_doc.get(diagnosis.subject_id.as_str());
        for finding in diagnosis
            .findings
            .iter()
            .filter(|f| f.level == InfectiousnessLevel::High)
        {
            let row = [
                csv_escape(&diagnosis.subject_id),
                csv_escape(patient.map(|p| p.first_name.as_str()).unwrap_or("")),
                csv_escape(patient.map(|p| p.last_name.as_str()).unwrap_or("")),
                csv_escape(&diagnosis.sample_id),
                csv_escape(&finding.signature_name),
                finding.start_offset.to_string(),
                finding.end_offset.to_string(),
            ];
            out.push_str(&row.join(","));
            out.push('\n');
        }
    }
    out
}

pub fn write_high_risk(dir: &Path, patients: &[Patient], diagnoses: &[Diagnosis]) -> io::Result<PathBuf> {
    let contents = render_high_risk(patients, diagnoses);
    write_report(dir, &format!("alto_riesgo_{}.csv", stamp()), &contents)
}

pub fn render_mutations(report: &MutationReport) -> String {
    let mut out = format!(
        "Paciente: {}\nMuestra actual: {}\n",
        report.subject_id, report.current_id
    );
    for comparison in &report.comparisons {
        out.push_str(&format!(
            "\nComparada con {}: similitud {:.2}%, {} bloque(s)\n",
            comparison.prior_id,
            comparison.similarity,
            comparison.blocks.len()
        ));
        for block in &comparison.blocks {
            out.push_str(&format!(
                "  [{}-{}] {} -> {} ({})\n",
                block.start_offset,
                block.end_offset,
                block.reference_segment,
                block.current_segment,
                block.kind.as_str()
            ));
        }
    }
    out
}

pub fn write_mutations(dir: &Path, report: &MutationReport) -> io::Result<PathBuf> {
    let contents = render_mutations(report);
    let name = format!("mutaciones_{}_{}.txt", report.subject_id, stamp());
    write_report(dir, &name, &contents)
}
