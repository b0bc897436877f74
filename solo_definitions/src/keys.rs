use super::Result;

/// Canonical separator between key segments.
pub const SEPARATOR: char = '.';

/// Separator used by environment style keys (`SOLO_DEPLOYMENT_NAME`).
pub const ENV_SEPARATOR: char = '_';

/// Normalize a raw key to its canonical form.
///
/// Segments are lowercased and surrounding whitespace is dropped. The dotted
/// shape itself is preserved; callers with environment style keys must go
/// through `from_env_key` first.
pub fn normalize(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Split a canonical key into its segments.
///
/// Empty segments are not representable, so `a..b` is a caller error.
pub fn split(key: &str) -> Result<Vec<String>> {
    if key.is_empty() {
        bail!("key must not be empty");
    }
    let segments: Vec<String> = key.split(SEPARATOR).map(normalize).collect();
    for s in &segments {
        if s.is_empty() {
            bail!("key '{}' contains an empty segment", key);
        }
    }
    Ok(segments)
}

/// Join segments back into a canonical key.
///
/// Inverse of `split` for normalized, non-empty segments.
pub fn join<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(&SEPARATOR.to_string())
}

/// Whether a segment denotes an array index (all digits).
pub fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}

/// Parse an array-index segment.
pub fn parse_index(segment: &str) -> Result<usize> {
    if !is_index(segment) {
        bail!("segment '{}' is not an array index", segment);
    }
    Ok(segment.parse()?)
}

/// Convert a screaming-snake environment variable name to a canonical key.
///
/// `SOLO_DEPLOYMENT_NAME` with prefix `SOLO_` becomes `deployment.name`.
pub fn from_env_key(name: &str, prefix: Option<&str>) -> Option<String> {
    let stripped = match prefix {
        Some(p) => {
            if !name.starts_with(p) {
                return None;
            }
            &name[p.len()..]
        }
        None => name,
    };
    if stripped.is_empty() {
        return None;
    }
    Some(normalize(&stripped.replace(ENV_SEPARATOR, &SEPARATOR.to_string())))
}

/// Convert a canonical key to its environment variable name.
pub fn to_env_key(key: &str, prefix: Option<&str>) -> String {
    let mut name = key
        .replace(SEPARATOR, &ENV_SEPARATOR.to_string())
        .to_uppercase();
    if let Some(p) = prefix {
        name = format!("{}{}", p, name);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_join_roundtrip() {
        for key in &["a", "a.b", "a.b.0", "deployment.clusters.2.name"] {
            let segments = split(key).unwrap();
            assert_eq!(join(&segments), *key);
        }
    }

    #[test]
    fn split_normalizes_case() {
        assert_eq!(split("A.Bb.C").unwrap(), vec!["a", "bb", "c"]);
    }

    #[test]
    fn split_rejects_empty_segments() {
        assert!(split("").is_err());
        assert!(split("a..b").is_err());
        assert!(split(".a").is_err());
    }

    #[test]
    fn index_segments() {
        assert!(is_index("0"));
        assert!(is_index("42"));
        assert!(!is_index("4x"));
        assert!(!is_index(""));
        assert_eq!(parse_index("7").unwrap(), 7);
    }

    #[test]
    fn env_key_conversion() {
        assert_eq!(
            from_env_key("SOLO_DEPLOYMENT_NAME", Some("SOLO_")).unwrap(),
            "deployment.name"
        );
        assert_eq!(from_env_key("HOME", Some("SOLO_")), None);
        assert_eq!(
            to_env_key("deployment.name", Some("SOLO_")),
            "SOLO_DEPLOYMENT_NAME"
        );
    }
}
