//! Company email address checks.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::VerificationError;

/// Local part, `@`, then at least two dot-separated DNS labels.
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
    )
    .expect("Invalid email regex")
});

/// Validates `raw` and returns it normalised: trimmed, domain lowercased.
///
/// The domain must equal one of `allowed_domains` (already lowercase).
pub fn normalize_company_email(raw: &str, allowed_domains: &[String]) -> Result<String, VerificationError> {
    let email = raw.trim();
    if email.len() > 254 || !EMAIL_REGEX.is_match(email) {
        return Err(VerificationError::InvalidFormat);
    }

    let (local, domain) = email
        .rsplit_once('@')
        .ok_or(VerificationError::InvalidFormat)?;
    if local.len() > 64 || local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return Err(VerificationError::InvalidFormat);
    }

    let domain = domain.to_lowercase();
    if !allowed_domains.iter().any(|d| *d == domain) {
        return Err(VerificationError::InvalidDomain { domain });
    }

    Ok(format!("{}@{}", local, domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme() -> Vec<String> {
        vec!["acme.com".to_string()]
    }

    #[test]
    fn test_accepts_company_address() {
        assert_eq!(
            normalize_company_email("  bob@ACME.com ", &acme()).unwrap(),
            "bob@acme.com"
        );
        assert_eq!(
            normalize_company_email("Jane.Doe+ops@acme.com", &acme()).unwrap(),
            "Jane.Doe+ops@acme.com"
        );
    }

    #[test]
    fn test_rejects_other_domain() {
        assert_eq!(
            normalize_company_email("bob@other.com", &acme()).unwrap_err(),
            VerificationError::InvalidDomain {
                domain: "other.com".into()
            }
        );
        // Subdomains are not the company domain.
        assert!(matches!(
            normalize_company_email("bob@mail.acme.com", &acme()),
            Err(VerificationError::InvalidDomain { .. })
        ));
    }

    #[test]
    fn test_rejects_malformed() {
        for input in ["", "bob", "bob@", "@acme.com", "bob@acme", "bob smith@acme.com", "bob..x@acme.com", "a@b@acme.com"] {
            assert_eq!(
                normalize_company_email(input, &acme()),
                Err(VerificationError::InvalidFormat),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_multiple_domains() {
        let domains = vec!["acme.com".to_string(), "acme.io".to_string()];
        assert!(normalize_company_email("bob@acme.io", &domains).is_ok());
    }
}
