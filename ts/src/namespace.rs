//! Namespace validation.

use crate::error::StoreError;

const RESERVED: &[&str] = &["default", "admin", "system", "null", "none"];

/// Validate a namespace key: 1-32 chars, `[a-z0-9-]`, no leading/trailing
/// hyphen, not one of the reserved names.
pub fn validate_namespace(namespace: &str) -> Result<(), StoreError> {
    let fail = |reason: &str| StoreError::InvalidNamespace {
        namespace: namespace.to_string(),
        reason: reason.to_string(),
    };

    if namespace.is_empty() || namespace.len() > 32 {
        return Err(fail("must be 1-32 characters"));
    }
    if !namespace.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return Err(fail("must match [a-z0-9-]"));
    }
    if namespace.starts_with('-') || namespace.ends_with('-') {
        return Err(fail("must not start or end with a hyphen"));
    }
    if RESERVED.contains(&namespace) {
        return Err(fail("reserved namespace name"));
    }
    Ok(())
}
