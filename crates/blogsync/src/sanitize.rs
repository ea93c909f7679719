//! Helpers for keeping secrets and oversized payloads out of logs and error messages.

/// Maximum length for response bodies embedded in errors and logs.
const MAX_BODY_LENGTH: usize = 200;

/// Truncates an HTTP response body to a loggable length.
///
/// Cuts on a char boundary so multi-byte bodies never panic.
pub fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= MAX_BODY_LENGTH {
        return trimmed.to_string();
    }

    let mut end = MAX_BODY_LENGTH;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &trimmed[..end])
}

/// Masks a secret, keeping only a short prefix for correlation.
///
/// - `ghp_abcdef123456` → `ghp_****`
/// - `abc` → `****`
pub fn redact_secret(secret: &str) -> String {
    if secret.chars().count() <= 8 {
        return "****".to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{}****", prefix)
}

/// Strips userinfo/tokens from a remote URL.
///
/// - `https://ghp_token@github.com/user/repo` → `https://****@github.com/user/repo`
/// - `https://github.com/user/repo` → unchanged
pub fn redact_url(url: &str) -> String {
    if let Some(scheme_end) = url.find("://") {
        let after_scheme = &url[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        if let Some(at_pos) = after_scheme[..authority_end].find('@') {
            let scheme = &url[..scheme_end + 3];
            let after_at = &after_scheme[at_pos + 1..];
            return format!("{}****@{}", scheme, after_at);
        }
    }

    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_body() {
        assert_eq!(truncate_body("  not found \n"), "not found");
    }

    #[test]
    fn test_truncate_long_body() {
        let body = "x".repeat(500);
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with("... (truncated)"));
        assert!(truncated.len() < 250);
    }

    #[test]
    fn test_truncate_multibyte_boundary() {
        let body = "é".repeat(300);
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with("... (truncated)"));
    }

    #[test]
    fn test_redact_secret() {
        assert_eq!(redact_secret("ghp_abcdef123456"), "ghp_****");
        assert_eq!(redact_secret("short"), "****");
    }

    #[test]
    fn test_redact_url_with_token() {
        assert_eq!(
            redact_url("https://ghp_xxxx@github.com/user/repo.git"),
            "https://****@github.com/user/repo.git"
        );
    }

    #[test]
    fn test_redact_url_without_token() {
        assert_eq!(
            redact_url("https://api.github.com/repos/a/b?x=a@b"),
            "https://api.github.com/repos/a/b?x=a@b"
        );
    }
}
