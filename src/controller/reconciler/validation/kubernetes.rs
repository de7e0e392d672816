//! # Kubernetes Validation
//!
//! Validates references to Kubernetes objects per RFC 1123.

use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;

static SUBDOMAIN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").ok()
});

/// Validate Kubernetes resource name (RFC 1123 subdomain)
/// Format: lowercase alphanumeric, hyphens, dots
/// Length: 1-253 characters
/// Cannot start or end with hyphen or dot
pub fn validate_kubernetes_name(name: &str, field_name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow::anyhow!("{field_name} cannot be empty"));
    }

    if name.len() > 253 {
        return Err(anyhow::anyhow!(
            "{} '{}' exceeds maximum length of 253 characters (got {})",
            field_name,
            name,
            name.len()
        ));
    }

    let name_regex = SUBDOMAIN
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Failed to compile name pattern"))?;

    if !name_regex.is_match(name) {
        return Err(anyhow::anyhow!(
            "{field_name} '{name}' must be a valid Kubernetes name (lowercase alphanumeric, hyphens, dots; cannot start/end with hyphen or dot)"
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(validate_kubernetes_name("cluster-example-dante", "passwordSecret.name").is_ok());
        assert!(validate_kubernetes_name("a.b-c", "passwordSecret.name").is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert!(validate_kubernetes_name("", "passwordSecret.name").is_err());
        assert!(validate_kubernetes_name("Upper", "passwordSecret.name").is_err());
        assert!(validate_kubernetes_name("-leading", "passwordSecret.name").is_err());
        assert!(validate_kubernetes_name(&"a".repeat(254), "passwordSecret.name").is_err());
    }
}
