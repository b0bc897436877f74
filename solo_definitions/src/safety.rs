use std::path::{Path, PathBuf};

use super::Result;

// All main errors that can happen from path handling
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum PathError {
    #[fail(display = "path '{}' escapes base directory '{}'", _0, _1)]
    TraversalDetected(String, String),

    #[fail(display = "path '{}' does not exist", _0)]
    Missing(String),
}

/// Join path parts onto a base directory, refusing anything that resolves
/// outside of it.
///
/// Both the base and the fully resolved candidate must already exist; the
/// comparison happens on canonical paths so symlinks cannot smuggle a
/// traversal through.
pub fn safe_join<P: AsRef<Path>, S: AsRef<str>>(base: P, parts: &[S]) -> Result<PathBuf> {
    let base = base.as_ref();
    let canonical_base = base
        .canonicalize()
        .map_err(|_| PathError::Missing(base.display().to_string()))?;

    let mut candidate = base.to_path_buf();
    for part in parts {
        candidate.push(part.as_ref());
    }
    let resolved = candidate
        .canonicalize()
        .map_err(|_| PathError::Missing(candidate.display().to_string()))?;

    let mut prefix = canonical_base.display().to_string();
    prefix.push(std::path::MAIN_SEPARATOR);
    if !resolved.display().to_string().starts_with(&prefix) {
        return Err(PathError::TraversalDetected(
            resolved.display().to_string(),
            canonical_base.display().to_string(),
        )
        .into());
    }
    Ok(resolved)
}

/// Escape a string so it matches literally inside a regular expression.
///
/// Escapes `- / \ ^ $ * + ? . ( ) | [ ] { }`.
pub fn regex_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '-' | '/' | '\\' | '^' | '$' | '*' | '+' | '?' | '.' | '(' | ')' | '|' | '[' | ']'
            | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn joins_inside_base() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("keys")).unwrap();
        fs::write(dir.path().join("keys").join("node1.pem"), b"x").unwrap();
        let joined = safe_join(dir.path(), &["keys", "node1.pem"]).unwrap();
        assert!(joined.ends_with("keys/node1.pem"));
    }

    #[test]
    fn detects_traversal() {
        let outer = tempdir().unwrap();
        fs::write(outer.path().join("escape.txt"), b"x").unwrap();
        let base = outer.path().join("base");
        fs::create_dir(&base).unwrap();

        let err = safe_join(&base, &["../escape.txt"]).unwrap_err();
        match err.downcast_ref::<PathError>() {
            Some(PathError::TraversalDetected(..)) => {}
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn missing_paths_are_refused() {
        let dir = tempdir().unwrap();
        assert!(safe_join(dir.path(), &["nope.txt"]).is_err());
        assert!(safe_join(dir.path().join("gone"), &["x"]).is_err());
    }

    #[test]
    fn escapes_regex_metacharacters() {
        assert_eq!(regex_escape("node-1.x"), "node\\-1\\.x");
        assert_eq!(regex_escape("a(b)[c]{d}"), "a\\(b\\)\\[c\\]\\{d\\}");
        let re = regex::Regex::new(&regex_escape("net/[prod]")).unwrap();
        assert!(re.is_match("net/[prod]"));
    }
}
