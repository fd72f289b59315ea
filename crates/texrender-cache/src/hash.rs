//! Key derivation. BLAKE3, lowercase hex.

/// Dependency-set hash of a source with no dependencies.
pub const NO_DEPENDENCIES: &str = "nodeps";

/// Hash of raw content.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}

/// Order-independent hash of a dependency list.
pub fn dependency_set_hash<S: AsRef<str>>(dependencies: &[S]) -> String {
    if dependencies.is_empty() {
        return NO_DEPENDENCIES.to_string();
    }
    let mut sorted: Vec<&str> = dependencies.iter().map(AsRef::as_ref).collect();
    sorted.sort_unstable();
    content_hash(sorted.join("\n").as_bytes())
}

/// Storage name of an artifact: `<source_hash>-<dependency_hash>`.
pub fn artifact_name(source_hash: &str, dependency_hash: &str) -> String {
    format!("{}-{}", source_hash, dependency_hash)
}

/// True for a non-empty lowercase hex string, the shape [`content_hash`]
/// produces.
pub fn is_source_hash(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Source hash part of an artifact name.
pub fn source_of(artifact: &str) -> &str {
    artifact.split('-').next().unwrap_or(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_blake3_hex() {
        let hash = content_hash(b"");
        assert_eq!(
            hash,
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_dependency_hash_ignores_order() {
        let a = dependency_set_hash(&["b.sty", "a.sty"]);
        let b = dependency_set_hash(&["a.sty", "b.sty"]);
        assert_eq!(a, b);
        assert_eq!(a, content_hash(b"a.sty\nb.sty"));
        assert_ne!(a, dependency_set_hash(&["a.sty"]));
    }

    #[test]
    fn test_no_dependencies_sentinel() {
        let none: [&str; 0] = [];
        assert_eq!(dependency_set_hash(&none), "nodeps");
        assert_eq!(artifact_name("abc", NO_DEPENDENCIES), "abc-nodeps");
        assert_eq!(source_of("abc-nodeps"), "abc");
    }

    #[test]
    fn test_source_hash_shape() {
        assert!(is_source_hash(&content_hash(b"x")));
        assert!(is_source_hash("a1"));
        assert!(!is_source_hash(""));
        assert!(!is_source_hash("a-b"));
        assert!(!is_source_hash("../etc"));
        assert!(!is_source_hash("AB"));
    }
}
