//! Input validation and normalization for API requests.
//!
//! Every endpoint normalizes its body through these helpers before any
//! business logic runs, so handlers only ever see trimmed, length-bounded,
//! typed values.

use lazy_static::lazy_static;
use regex::Regex;

/// Passwords shorter than this are rejected at registration and change.
pub const PASSWORD_MIN_LENGTH: usize = 8;

lazy_static! {
    /// Pragmatic email shape check; the identity provider is the authority.
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

/// Trim and bound a free-text field. Anything past `max_chars` is dropped.
pub fn normalize_text(value: &str, max_chars: usize) -> String {
    value.trim().chars().take(max_chars).collect()
}

/// Lowercased, length-bounded email.
pub fn normalize_email(value: &str) -> String {
    normalize_text(value, 320).to_lowercase()
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email address".to_string());
    }
    Ok(())
}

/// Parse a monetary amount: strictly positive, finite, 2-decimal precision.
pub fn parse_amount(value: &str) -> Option<f64> {
    let parsed: f64 = value.trim().parse().ok()?;
    if !parsed.is_finite() || parsed <= 0.0 {
        return None;
    }
    Some((parsed * 100.0).round() / 100.0)
}

pub fn validate_password_strength(password: &str) -> Result<(), String> {
    if password.len() < PASSWORD_MIN_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            PASSWORD_MIN_LENGTH
        ));
    }
    Ok(())
}

/// Weak or default-looking session secrets are refused before serving.
pub fn validate_session_secret(secret: &str) -> Result<(), String> {
    if secret.len() < 32 {
        return Err(
            "Session secret is too short. Use a random secret at least 32 characters long."
                .to_string(),
        );
    }

    let weak_patterns = [
        "replace-with-long-random-secret",
        "change-in-production",
        "secret-key",
        "changeme",
    ];
    let lower = secret.to_lowercase();
    if weak_patterns.iter().any(|pattern| lower.contains(pattern)) {
        return Err(
            "Session secret looks like a placeholder. Use a random secret at least 32 characters long."
                .to_string(),
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  hello  ", 100), "hello");
        assert_eq!(normalize_text("abcdef", 3), "abc");
        assert_eq!(normalize_text("", 10), "");
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Jane@Example.COM "), "jane@example.com");
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("jane@example.com").is_ok());
        assert!(validate_email("j.doe+tag@sub.example.co").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("a b@example.com").is_err());
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("120.50"), Some(120.50));
        assert_eq!(parse_amount(" 42 "), Some(42.0));
        assert_eq!(parse_amount("10.999"), Some(11.0));

        assert_eq!(parse_amount("0"), None);
        assert_eq!(parse_amount("-5"), None);
        assert_eq!(parse_amount("NaN"), None);
        assert_eq!(parse_amount("inf"), None);
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn test_validate_password_strength() {
        assert!(validate_password_strength("longenough").is_ok());
        assert!(validate_password_strength("short").is_err());
        assert!(validate_password_strength("").is_err());
    }

    #[test]
    fn test_validate_session_secret() {
        assert!(validate_session_secret("f3a9c2e81b474d5e9f0a6c3b2d1e8f70").is_ok());

        assert!(validate_session_secret("too-short").is_err());
        assert!(validate_session_secret(
            "replace-with-long-random-secret-0000000000"
        )
        .is_err());
        assert!(validate_session_secret("secret-key-secret-key-secret-key-xx").is_err());
    }
}
