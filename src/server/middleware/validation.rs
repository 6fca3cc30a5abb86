use crate::utils::CommandError;

/// Splits a command body into exactly `expected` trimmed fields.
///
/// # Returns
///
/// * `Ok(fields)` when the count matches.
/// * `Err(CommandError::Validation)` otherwise.
pub fn split_fields<'a>(body: &'a str, sep: char, expected: usize) -> Result<Vec<&'a str>, CommandError> {
    let fields: Vec<&str> = body.split(sep).map(str::trim).collect();
    if fields.len() != expected {
        return Err(CommandError::Validation(format!(
            "Se esperaban {} campos separados por '{}', se recibieron {}",
            expected,
            sep,
            fields.len()
        )));
    }
    Ok(fields)
}

/// Picks `|` when present, else `,`.
pub fn detect_separator(body: &str) -> char {
    if body.contains('|') {
        '|'
    } else {
        ','
    }
}

/// Rejects a blank field.
pub fn require(field: &str, name: &str) -> Result<(), CommandError> {
    if field.is_empty() {
        return Err(CommandError::Validation(format!("El campo {} es obligatorio", name)));
    }
    Ok(())
}

/// Identity documents: letters, digits and `-`.
pub fn validate_document(doc: &str) -> Result<(), CommandError> {
    require(doc, "documento")?;
    if !doc.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(CommandError::Validation(format!("Documento invalido: {}", doc)));
    }
    Ok(())
}

pub fn parse_age(raw: &str) -> Result<u8, CommandError> {
    match raw.parse::<u8>() {
        Ok(age) if age <= 150 => Ok(age),
        _ => Err(CommandError::Validation(format!("Edad invalida: {}", raw))),
    }
}

pub fn validate_email(email: &str) -> Result<(), CommandError> {
    let invalid = || CommandError::Validation(format!("Correo invalido: {}", email));
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') || !domain.contains('.') {
        return Err(invalid());
    }
    if domain.starts_with('.') || domain.ends_with('.') {
        return Err(invalid());
    }
    Ok(())
}
