//! Input validation and sanitization.
//!
//! Custom `validator` functions for account fields, plus small sanitizers
//! applied to free text before it is stored.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex_lite::Regex;
use validator::ValidationError;

/// Maximum length of stored free text (names, reasons, descriptions).
pub const MAX_TEXT_LENGTH: usize = 2000;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Film and TV ratings accepted as a viewing ceiling.
pub const MATURITY_RATINGS: [&str; 11] = [
    "G", "PG", "PG-13", "R", "NC-17", "TV-Y", "TV-Y7", "TV-G", "TV-PG", "TV-14", "TV-MA",
];

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9]\d{1,14}$").expect("valid phone regex"));

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

/// At least eight characters with upper, lower, digit and symbol.
pub fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(invalid(
            "password",
            "Password must be at least 8 characters long",
        ));
    }

    let has_upper = password.chars().any(char::is_uppercase);
    let has_lower = password.chars().any(char::is_lowercase);
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace());

    if has_upper && has_lower && has_digit && has_symbol {
        Ok(())
    } else {
        Err(invalid(
            "password",
            "Password must contain uppercase, lowercase, number and special character",
        ))
    }
}

/// E.164-style phone number.
pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    if PHONE_PATTERN.is_match(phone) {
        Ok(())
    } else {
        Err(invalid("phone", "Invalid phone number format"))
    }
}

pub fn validate_maturity_rating(rating: &str) -> Result<(), ValidationError> {
    if MATURITY_RATINGS.contains(&rating) {
        Ok(())
    } else {
        Err(invalid("maturity_rating", "Unknown maturity rating"))
    }
}

/// Strip control characters and cap the length.
pub fn sanitize_string(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .take(MAX_TEXT_LENGTH)
        .collect()
}

/// Canonical form used for lookups and uniqueness.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Identifier shape used for documents: letters, digits, hyphens, underscores.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
