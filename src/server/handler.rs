use chrono::Utc;
use tracing::{debug, error, info, instrument};

use crate::domain::{
    diagnosis::join_findings, parse_fasta, sample::parse_capture_date, Diagnosis, InfectiousnessLevel,
    Patient, Sample, Sequence, Signature,
};
use crate::engine::{analyze, diagnose};
use crate::reports;
use crate::server::dispatcher::Services;
use crate::server::middleware::validation::{
    detect_separator, parse_age, require, split_fields, validate_document, validate_email,
};
use crate::utils::CommandError;

pub const EMPTY_PATIENT_LIST: &str = "SIN_PACIENTES";
pub const NO_FINDINGS: &str = "RESULTADO: No se detectaron virus";

/// Drops one leading `:` or `|` from commands whose literal has no separator.
fn strip_separator(body: &str) -> &str {
    body.strip_prefix(':')
        .or_else(|| body.strip_prefix('|'))
        .unwrap_or(body)
}

/// Handles `REGISTRAR_PACIENTE:doc,nombre,apellido,edad,correo,genero,ciudad,pais`.
///
/// Fields may also be separated with `|`.
#[instrument(skip(svc))]
pub fn register_patient(svc: &Services, body: &str) -> Result<String, CommandError> {
    let fields = split_fields(body, detect_separator(body), 8)?;
    let [document, first_name, last_name, age, email, gender, city, country] = fields[..] else {
        return Err(CommandError::Validation("Se esperaban 8 campos".into()));
    };

    validate_document(document)?;
    require(first_name, "nombre")?;
    require(last_name, "apellido")?;
    let age = parse_age(age)?;
    validate_email(email)?;
    require(gender, "genero")?;
    require(city, "ciudad")?;
    require(country, "pais")?;

    let patient = Patient {
        document: document.to_string(),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        age,
        email: email.to_string(),
        gender: gender.to_string(),
        city: city.to_string(),
        country: country.to_string(),
    };
    svc.registries.subjects.create(patient)?;
    info!(document, "Patient registered");
    Ok(format!("PACIENTE_REGISTRADO:{}", document))
}

/// Handles `CONSULTAR_PACIENTE:doc`.
pub fn consult_patient(svc: &Services, body: &str) -> Result<String, CommandError> {
    let document = body.trim();
    validate_document(document)?;
    svc.registries
        .subjects
        .get(document)?
        .map(|patient| patient.to_string())
        .ok_or_else(|| CommandError::NotFound("Paciente no encontrado".into()))
}

/// Handles `LISTAR_PACIENTES`. Text after a separator is ignored.
pub fn list_patients(svc: &Services, _body: &str) -> Result<String, CommandError> {
    let patients = svc.registries.subjects.list()?;
    if patients.is_empty() {
        return Ok(EMPTY_PATIENT_LIST.to_string());
    }
    Ok(patients
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n"))
}

fn build_signature(svc: &Services, name: &str, level: &str, sequence: &str) -> Result<Signature, CommandError> {
    require(name, "nombre")?;
    let level: InfectiousnessLevel = level.parse()?;
    let sequence = Sequence::parse(sequence, svc.max_sequence_length)
        .map_err(|e| CommandError::Validation(format!("Virus {}: {}", name, e)))?;
    Ok(Signature::new(name, level, sequence))
}

fn store_signatures(svc: &Services, signatures: Vec<Signature>) -> Result<String, CommandError> {
    let catalog = &svc.registries.signatures;
    for signature in &signatures {
        if catalog.get(&signature.name)?.is_some() {
            return Err(CommandError::Duplicate(format!("Virus {} ya existe", signature.name)));
        }
    }

    let names: Vec<String> = signatures.iter().map(|s| s.name.clone()).collect();
    for (stored, signature) in signatures.into_iter().enumerate() {
        if let Err(err) = catalog.register(signature) {
            // Another session won a name after the check; undo this load.
            for name in &names[..stored] {
                if let Err(undo) = catalog.remove(name) {
                    error!(name = %name, error = %undo, "Failed to roll back signature");
                }
            }
            return Err(err.into());
        }
    }
    info!(count = names.len(), "Signatures registered");

    match names.as_slice() {
        [one] => Ok(format!("OK: Virus {} guardado", one)),
        many => Ok(format!("OK: {} virus guardados ({})", many.len(), many.join(", "))),
    }
}

/// Handles `CARGAR_VIRUS`.
///
/// The body is either a FASTA document with `>nombre|nivel` headers, or a
/// single `nombre,nivel,secuencia` record. The whole load is rejected if any
/// record is invalid.
#[instrument(skip_all)]
pub fn load_viruses(svc: &Services, body: &str) -> Result<String, CommandError> {
    let body = strip_separator(body).trim_start();
    if !body.starts_with('>') {
        return register_virus(svc, body);
    }

    let mut signatures = Vec::new();
    for record in parse_fasta(body)? {
        let header = split_fields(&record.header, detect_separator(&record.header), 2)?;
        let [name, level] = header[..] else {
            return Err(CommandError::Validation(format!("Cabecera invalida: {}", record.header)));
        };
        signatures.push(build_signature(svc, name, level, &record.sequence)?);
    }

    for (i, signature) in signatures.iter().enumerate() {
        if signatures[..i].iter().any(|s| s.name == signature.name) {
            return Err(CommandError::Validation(format!("Virus {} repetido en la carga", signature.name)));
        }
    }
    store_signatures(svc, signatures)
}

/// Handles `REGISTRAR_VIRUS:nombre|nivel|secuencia` (comma also accepted).
pub fn register_virus(svc: &Services, body: &str) -> Result<String, CommandError> {
    let fields = split_fields(body, detect_separator(body), 3)?;
    let [name, level, sequence] = fields[..] else {
        return Err(CommandError::Validation("Se esperaban 3 campos".into()));
    };
    let signature = build_signature(svc, name, level, sequence)?;
    store_signatures(svc, vec![signature])
}

/// Handles `ENVIAR_MUESTRA:doc|secuencia` and `ENVIAR_MUESTRA:doc|fecha|secuencia`,
/// and the same bodies under `DIAGNOSTICAR`.
///
/// The sample is stored, scanned against the whole catalog, and the
/// diagnosis recorded.
#[instrument(skip_all)]
pub fn submit_sample(svc: &Services, body: &str) -> Result<String, CommandError> {
    let body = strip_separator(body);
    let fields: Vec<&str> = body.split('|').map(str::trim).collect();
    let (document, captured_at, raw_sequence) = match fields[..] {
        [doc, seq] => (doc, Utc::now(), seq),
        [doc, date, seq] => (doc, parse_capture_date(date)?, seq),
        _ => {
            return Err(CommandError::Validation(
                "Formato esperado doc|secuencia o doc|fecha|secuencia".into(),
            ))
        }
    };

    validate_document(document)?;
    if svc.registries.subjects.get(document)?.is_none() {
        return Err(CommandError::NotFound(format!("Paciente {} no encontrado", document)));
    }
    let sequence = Sequence::parse(raw_sequence, svc.max_sequence_length)?;

    let sample = svc
        .registries
        .samples
        .append(Sample::new(document, sequence, captured_at))?;
    let catalog = svc.registries.signatures.list()?;
    let findings = diagnose(&sample.sequence, &catalog);
    debug!(sample = %sample.id, findings = findings.len(), "Sample diagnosed");
    svc.metrics.findings_total.inc_by(findings.len() as u64);

    let response = if findings.is_empty() {
        NO_FINDINGS.to_string()
    } else {
        format!("RESULTADO:{}", join_findings(&findings))
    };

    svc.registries.diagnoses.record(Diagnosis {
        sample_id: sample.id,
        subject_id: sample.subject_id,
        diagnosed_at: Utc::now(),
        findings,
    })?;
    Ok(response)
}

/// Handles `CONSULTAR_DIAGNOSTICOS:doc`.
///
/// One line per diagnosis: `idMuestra|fecha|hallazgos`.
pub fn consult_diagnoses(svc: &Services, body: &str) -> Result<String, CommandError> {
    let document = body.trim();
    validate_document(document)?;
    let lines: Vec<String> = svc
        .registries
        .diagnoses
        .list_by_subject(document)?
        .iter()
        .map(|d| {
            let findings = if d.findings.is_empty() {
                "Sin hallazgos".to_string()
            } else {
                d.findings_line()
            };
            format!("{}|{}|{}", d.sample_id, d.diagnosed_at.to_rfc3339(), findings)
        })
        .collect();

    if lines.is_empty() {
        Ok("DIAGNOSTICOS:".to_string())
    } else {
        Ok(format!("DIAGNOSTICOS:\n{}", lines.join("\n")))
    }
}

/// Handles `REPORTE_ALTO_RIESGO`.
pub fn high_risk_report(svc: &Services, _body: &str) -> Result<String, CommandError> {
    let patients = svc.registries.subjects.list()?;
    let diagnoses = svc.registries.diagnoses.list_all()?;
    let path = reports::write_high_risk(&svc.reports_dir, &patients, &diagnoses)?;
    Ok(format!("OK: Reporte en {}", path.display()))
}

/// Handles `REPORTE_MUTACIONES:doc` and `REPORTE_MUTACIONES:doc|idMuestra`.
///
/// The given sample, or the most recent one, is compared with every other
/// sample of the patient.
pub fn mutation_report(svc: &Services, body: &str) -> Result<String, CommandError> {
    let fields: Vec<&str> = body.split('|').map(str::trim).collect();
    let (document, sample_id) = match fields[..] {
        [doc] => (doc, None),
        [doc, id] => (doc, Some(id)),
        _ => return Err(CommandError::Validation("Formato esperado doc[|idMuestra]".into())),
    };
    validate_document(document)?;

    let mut history = svc.registries.samples.list_by_subject(document)?;
    if history.len() < 2 {
        return Err(CommandError::InsufficientSamples { have: history.len() });
    }

    let current_at = match sample_id {
        Some(id) => history
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| CommandError::NotFound(format!("Muestra {} no encontrada", id)))?,
        None => history.len() - 1,
    };
    let current = history.remove(current_at);
    let report = analyze(&current, &history)?;
    let path = reports::write_mutations(&svc.reports_dir, &report)?;
    Ok(format!("OK: Reporte en {}", path.display()))
}
