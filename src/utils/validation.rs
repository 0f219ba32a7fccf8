use validator::ValidationError;

/// Column widths of `users.display_name` and `users.email`.
pub const MAX_NAME_CHARS: usize = 100;
pub const MAX_EMAIL_CHARS: usize = 254;
pub const MAX_DEFAULT_HANDLE_CHARS: usize = 50;

/// Cuts `value` to at most `max` characters.
pub fn truncate_chars(value: String, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((end, _)) => value[..end].trim_end().to_string(),
        None => value,
    }
}

/// Trims the value; blank strings become `None`.
pub fn sanitize_string(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn normalize_email(value: Option<&str>) -> Option<String> {
    sanitize_string(value).map(|e| e.to_lowercase())
}

/// Strips spaces, dashes, dots and parentheses and keeps an optional leading `+`.
pub fn parse_phone(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    let (prefix, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", trimmed),
    };
    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return Err(ValidationError::new("phone_invalid_character")),
        }
    }
    if !(7..=15).contains(&digits.len()) {
        return Err(ValidationError::new("phone_length"));
    }
    Ok(format!("{}{}", prefix, digits))
}

/// Local part of the address, lowercased and cut to fit a handle.
pub fn default_handle(email: &str) -> String {
    let local = email
        .split('@')
        .next()
        .unwrap_or(email)
        .trim()
        .to_lowercase();
    truncate_chars(local, MAX_DEFAULT_HANDLE_CHARS)
}

/// Handle used when the default one is owned by another subject.
pub fn disambiguate_handle(base: &str, subject_id: &str, attempt: usize) -> String {
    let suffix: String = subject_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .skip(attempt.saturating_sub(1) * 6)
        .take(6)
        .collect();
    if suffix.is_empty() {
        format!("{}-{}", base, attempt)
    } else {
        format!("{}-{}", base, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_drops_blank_values() {
        assert_eq!(sanitize_string(Some("  Ana ")), Some("Ana".to_string()));
        assert_eq!(sanitize_string(Some("   ")), None);
        assert_eq!(sanitize_string(None), None);
    }

    #[test]
    fn phone_keeps_plus_and_digits() {
        assert_eq!(parse_phone("+54 (11) 4444-5555").unwrap(), "+541144445555");
        assert_eq!(parse_phone("011.4444.5555").unwrap(), "01144445555");
        assert!(parse_phone("12345").is_err());
        assert!(parse_phone("call me").is_err());
    }

    #[test]
    fn handle_is_local_part() {
        assert_eq!(default_handle("Ana.Perez@x.com"), "ana.perez");
        assert_eq!(disambiguate_handle("ana", "AbC-123xyz9", 1), "ana-abc123");
        assert_eq!(disambiguate_handle("ana", "AbC-123xyz9", 2), "ana-xyz9");
        assert_eq!(disambiguate_handle("ana", "---", 2), "ana-2");
        let long = format!("{}@x.com", "h".repeat(80));
        assert_eq!(default_handle(&long).chars().count(), MAX_DEFAULT_HANDLE_CHARS);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("ñandú".to_string(), 3), "ñan");
        assert_eq!(truncate_chars("Ana".to_string(), 100), "Ana");
    }
}
