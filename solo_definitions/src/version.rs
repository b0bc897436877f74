use semver::Version;

use super::Result;

/// Half-open integer version interval `[begin, end)`.
///
/// Used by schema migrations to declare the document versions they accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    begin: u32,
    end: u32,
}

impl VersionRange {
    pub fn new(begin: u32, end: u32) -> Result<VersionRange> {
        if begin >= end {
            bail!("version range [{}, {}) is empty", begin, end);
        }
        Ok(VersionRange { begin, end })
    }

    /// Range accepting exactly one version.
    pub fn exact(version: u32) -> VersionRange {
        VersionRange {
            begin: version,
            end: version + 1,
        }
    }

    pub fn begin(&self) -> u32 {
        self.begin
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn contains(&self, version: u32) -> bool {
        version >= self.begin && version < self.end
    }
}

/// Parse a semantic version, tolerating a leading `v`.
pub fn parse(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    let stripped = if trimmed.starts_with('v') {
        &trimmed[1..]
    } else {
        trimmed
    };
    Version::parse(stripped).map_err(|e| format_err!("invalid version '{}': {}", raw, e))
}

/// Whether two versions can talk to each other (same major).
pub fn same_major(a: &Version, b: &Version) -> bool {
    a.major == b.major
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_contains_half_open() {
        let r = VersionRange::new(1, 3).unwrap();
        assert!(!r.contains(0));
        assert!(r.contains(1));
        assert!(r.contains(2));
        assert!(!r.contains(3));
    }

    #[test]
    fn empty_ranges_are_rejected() {
        assert!(VersionRange::new(2, 2).is_err());
        assert!(VersionRange::new(3, 1).is_err());
    }

    #[test]
    fn exact_covers_one_version() {
        let r = VersionRange::exact(4);
        assert!(r.contains(4));
        assert!(!r.contains(5));
    }

    #[test]
    fn parses_with_and_without_prefix() {
        assert_eq!(parse("1.2.3").unwrap(), Version::new(1, 2, 3));
        assert_eq!(parse("v0.9.0").unwrap(), Version::new(0, 9, 0));
        assert!(parse("not-a-version").is_err());
    }

    #[test]
    fn major_compatibility() {
        let a = Version::new(1, 2, 3);
        let b = Version::new(1, 9, 0);
        let c = Version::new(2, 0, 0);
        assert!(same_major(&a, &b));
        assert!(!same_major(&a, &c));
    }
}
