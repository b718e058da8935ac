//! ID generation and namespace derivation.
//!
//! All generated ids use the format `{6-char-hex}-{type}-{slug}`, e.g.
//! `a1b2c3-implementation-fix-typo-in-readme`.

use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Generate an id from a type tag and a human title (usually the prompt).
pub fn generate_id(type_tag: &str, title: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex_prefix = &uuid.to_string()[..6];
    let slug = slugify(title);
    format!("{hex_prefix}-{type_tag}-{slug}")
}

/// Slugify a title for use in ids: lowercase, alphanumeric runs joined by
/// single hyphens, apostrophes stripped rather than hyphenated.
pub fn slugify(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .take(60)
        .flat_map(|c| c.to_lowercase())
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect();

    cleaned.split('-').filter(|s| !s.is_empty()).collect::<Vec<_>>().join("-")
}

/// Current Unix timestamp in milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Derive a namespace from a project directory: the lowercased folder name
/// with non-alphanumerics collapsed to `-`, truncated to fit a 4-char hex
/// suffix within the 32-char namespace limit.
pub fn derive_namespace(path: &Path) -> String {
    let abs = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let folder_name = abs
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "root".to_string());

    let mut normalized: String = folder_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    normalized = normalized.split('-').filter(|s| !s.is_empty()).collect::<Vec<_>>().join("-");
    if normalized.is_empty() {
        normalized = "project".to_string();
    }

    let mut hasher = Sha256::new();
    hasher.update(abs.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let suffix = hex_prefix(&digest, 4);

    // leave room for "-" + 4 hex chars within the 32-char ceiling
    let budget = 32 - 1 - 4;
    let truncated: String = normalized.chars().take(budget).collect();
    format!("{truncated}-{suffix}")
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes.iter().take(n).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_shape() {
        let id = generate_id("implementation", "Fix typo in README");
        assert!(id.contains("-implementation-"));
        assert!(id.ends_with("fix-typo-in-readme"));
        assert_eq!(&id[6..7], "-");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("don't stop"), "dont-stop");
        assert_eq!(slugify("Multiple   Spaces"), "multiple-spaces");
        assert_eq!(slugify("Implement feature X!"), "implement-feature-x");
    }

    #[test]
    fn test_derive_namespace_is_deterministic() {
        let dir = std::env::temp_dir().join("taskstore-ns-test");
        let _ = std::fs::create_dir_all(&dir);
        let a = derive_namespace(&dir);
        let b = derive_namespace(&dir);
        assert_eq!(a, b);
        assert!(a.len() <= 32);
        assert!(a.contains('-'));
    }
}
