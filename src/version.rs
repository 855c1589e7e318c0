// src/version.rs

//! Version pins, semver ranges, and conflict-resolution strategies
//!
//! A pin is one of three shapes: a semver tag (`v1.2.3`), a branch name, or
//! a full 40-hex commit id. Ranges are limited to caret, tilde, exact, and
//! `>=` over `vMAJOR.MINOR.PATCH`.

use semver::Version;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A version pin as written in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pin {
    /// `vMAJOR.MINOR.PATCH` (the leading `v` is canonical but optional)
    Semver(Version),
    /// A branch name; resolved to a commit at lock time
    Branch(String),
    /// A full 40-hex commit id
    Commit(String),
}

impl Pin {
    /// Parse a pin, rejecting strings that fit none of the three shapes
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Manifest("empty version pin".to_string()));
        }

        if s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(Self::Commit(s.to_lowercase()));
        }

        if let Some(version) = parse_semver(s) {
            return Ok(Self::Semver(version));
        }

        if is_valid_ref_name(s) {
            return Ok(Self::Branch(s.to_string()));
        }

        Err(Error::Manifest(format!(
            "version pin '{s}' is neither a semver tag, branch name, nor commit id"
        )))
    }

    /// The semver version, if this pin is one
    pub fn as_semver(&self) -> Option<&Version> {
        match self {
            Self::Semver(v) => Some(v),
            _ => None,
        }
    }

    /// Canonical string form (`v`-prefixed for semver pins)
    pub fn canonical(&self) -> String {
        match self {
            Self::Semver(v) => format!("v{v}"),
            Self::Branch(b) => b.clone(),
            Self::Commit(c) => c.clone(),
        }
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl FromStr for Pin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parse `1.2.3` or `v1.2.3`, ignoring anything that is not plain semver
fn parse_semver(s: &str) -> Option<Version> {
    let s = s.strip_prefix('v').unwrap_or(s);
    // A branch like "release-2" must not half-parse; require x.y.z shape
    if !s.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    Version::parse(s).ok()
}

/// Minimal subset of git ref-name validity
fn is_valid_ref_name(s: &str) -> bool {
    !s.starts_with('-')
        && !s.ends_with('/')
        && !s.contains("..")
        && !s.ends_with(".lock")
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.' | '+')
        })
}

/// Supported range operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    /// `^1.2.3`: >=1.2.3 <2.0.0
    Caret,
    /// `~1.2.3`: >=1.2.3 <1.3.0
    Tilde,
    /// `=1.2.3` or bare `1.2.3`
    Exact,
    /// `>=1.2.3`
    AtLeast,
}

/// A version range over semver pins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub op: RangeOp,
    pub base: Version,
}

impl Range {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (op, rest) = if let Some(rest) = s.strip_prefix(">=") {
            (RangeOp::AtLeast, rest)
        } else if let Some(rest) = s.strip_prefix('^') {
            (RangeOp::Caret, rest)
        } else if let Some(rest) = s.strip_prefix('~') {
            (RangeOp::Tilde, rest)
        } else if let Some(rest) = s.strip_prefix('=') {
            (RangeOp::Exact, rest)
        } else {
            (RangeOp::Exact, s)
        };

        let base = parse_semver(rest.trim()).ok_or_else(|| {
            Error::Manifest(format!("'{s}' is not a supported version range"))
        })?;
        Ok(Self { op, base })
    }

    /// Exclusive upper bound, if the range has one
    fn upper(&self) -> Option<Version> {
        match self.op {
            RangeOp::Caret => Some(Version::new(self.base.major + 1, 0, 0)),
            RangeOp::Tilde => Some(Version::new(self.base.major, self.base.minor + 1, 0)),
            RangeOp::Exact => None,
            RangeOp::AtLeast => None,
        }
    }

    pub fn satisfies(&self, version: &Version) -> bool {
        match self.op {
            RangeOp::Exact => version == &self.base,
            RangeOp::AtLeast => version >= &self.base,
            RangeOp::Caret | RangeOp::Tilde => {
                version >= &self.base
                    && self.upper().is_some_and(|upper| version < &upper)
            }
        }
    }

    /// Whether any version could satisfy both ranges
    pub fn intersects(&self, other: &Range) -> bool {
        match (self.op, other.op) {
            (RangeOp::Exact, _) => other.satisfies(&self.base),
            (_, RangeOp::Exact) => self.satisfies(&other.base),
            _ => {
                // Both are half-open or bounded intervals [base, upper)
                let lower = self.base.clone().max(other.base.clone());
                match (self.upper(), other.upper()) {
                    (Some(a), Some(b)) => lower < a.min(b),
                    (Some(a), None) => lower < a,
                    (None, Some(b)) => lower < b,
                    (None, None) => true,
                }
            }
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            RangeOp::Caret => write!(f, "^{}", self.base),
            RangeOp::Tilde => write!(f, "~{}", self.base),
            RangeOp::Exact => write!(f, "={}", self.base),
            RangeOp::AtLeast => write!(f, ">={}", self.base),
        }
    }
}

/// How to pick a version when several constraints apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Highest version satisfying all ranges
    #[default]
    Latest,
    /// Lowest version satisfying all ranges
    Conservative,
    /// First requirement wins; others are ignored
    First,
    /// Absolute maximum candidate, ranges ignored
    Highest,
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "latest" => Ok(Self::Latest),
            "conservative" => Ok(Self::Conservative),
            "first" => Ok(Self::First),
            "highest" => Ok(Self::Highest),
            other => Err(Error::Manifest(format!("unknown resolution strategy '{other}'"))),
        }
    }
}

/// Pick a version from `candidates` under `requirements` (origin, range)
/// pairs. Returns `ConflictError` when no candidate satisfies the strategy.
pub fn resolve(
    component: &str,
    strategy: Strategy,
    requirements: &[(String, Range)],
    candidates: &[Version],
) -> Result<Version> {
    let mut sorted: Vec<&Version> = candidates.iter().collect();
    sorted.sort();

    let conflict = || Error::Conflict {
        component: component.to_string(),
        constraints: requirements
            .iter()
            .map(|(origin, range)| format!("{origin} requires {range}"))
            .collect(),
    };

    let picked: Option<&Version> = match strategy {
        Strategy::Highest => sorted.last().copied(),
        Strategy::First => {
            let first = requirements.first().map(|(_, range)| range);
            sorted
                .iter()
                .copied()
                .rev()
                .find(|&v| first.map(|range| range.satisfies(v)).unwrap_or(true))
        }
        Strategy::Latest => sorted
            .iter()
            .copied()
            .rev()
            .find(|&v| requirements.iter().all(|(_, range)| range.satisfies(v))),
        Strategy::Conservative => sorted
            .iter()
            .copied()
            .find(|&v| requirements.iter().all(|(_, range)| range.satisfies(v))),
    };

    picked.cloned().ok_or_else(conflict)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_pin_shapes() {
        assert_eq!(Pin::parse("v1.2.3").unwrap(), Pin::Semver(v("1.2.3")));
        assert_eq!(Pin::parse("1.2.3").unwrap(), Pin::Semver(v("1.2.3")));
        assert_eq!(
            Pin::parse("main").unwrap(),
            Pin::Branch("main".to_string())
        );
        assert_eq!(
            Pin::parse("release/2024-q3").unwrap(),
            Pin::Branch("release/2024-q3".to_string())
        );

        let sha = "a".repeat(40);
        assert_eq!(Pin::parse(&sha).unwrap(), Pin::Commit(sha));
    }

    #[test]
    fn test_pin_rejects_garbage() {
        assert!(Pin::parse("").is_err());
        assert!(Pin::parse("has space").is_err());
        assert!(Pin::parse("a..b").is_err());
        assert!(Pin::parse("-leading-dash").is_err());
    }

    #[test]
    fn test_pin_canonical_form() {
        assert_eq!(Pin::parse("1.2.3").unwrap().canonical(), "v1.2.3");
        assert_eq!(Pin::parse("main").unwrap().canonical(), "main");
    }

    #[test]
    fn test_caret_range() {
        let range = Range::parse("^1.2.3").unwrap();
        assert!(range.satisfies(&v("1.2.3")));
        assert!(range.satisfies(&v("1.9.0")));
        assert!(!range.satisfies(&v("2.0.0")));
        assert!(!range.satisfies(&v("1.2.2")));
    }

    #[test]
    fn test_tilde_range() {
        let range = Range::parse("~1.2.3").unwrap();
        assert!(range.satisfies(&v("1.2.9")));
        assert!(!range.satisfies(&v("1.3.0")));
    }

    #[test]
    fn test_exact_and_atleast() {
        assert!(Range::parse("v1.2.3").unwrap().satisfies(&v("1.2.3")));
        assert!(!Range::parse("=1.2.3").unwrap().satisfies(&v("1.2.4")));
        assert!(Range::parse(">=1.2.3").unwrap().satisfies(&v("9.0.0")));
    }

    #[test]
    fn test_range_intersection() {
        let caret1 = Range::parse("^1.0.0").unwrap();
        let caret2 = Range::parse("^2.0.0").unwrap();
        let atleast = Range::parse(">=1.5.0").unwrap();

        assert!(!caret1.intersects(&caret2));
        assert!(caret1.intersects(&atleast));
        assert!(caret2.intersects(&atleast));
    }

    #[test]
    fn test_resolve_latest_and_conservative() {
        let requirements = vec![
            ("api".to_string(), Range::parse("^1.0.0").unwrap()),
            ("web".to_string(), Range::parse(">=1.2.0").unwrap()),
        ];
        let candidates = vec![v("1.0.0"), v("1.2.0"), v("1.5.0"), v("2.0.0")];

        let latest = resolve("core", Strategy::Latest, &requirements, &candidates).unwrap();
        assert_eq!(latest, v("1.5.0"));

        let conservative =
            resolve("core", Strategy::Conservative, &requirements, &candidates).unwrap();
        assert_eq!(conservative, v("1.2.0"));
    }

    #[test]
    fn test_resolve_highest_ignores_ranges() {
        let requirements = vec![("api".to_string(), Range::parse("^1.0.0").unwrap())];
        let candidates = vec![v("1.0.0"), v("3.0.0")];
        let highest = resolve("core", Strategy::Highest, &requirements, &candidates).unwrap();
        assert_eq!(highest, v("3.0.0"));
    }

    #[test]
    fn test_resolve_conflict_enumerates_constraints() {
        let requirements = vec![
            ("api".to_string(), Range::parse("^1.0.0").unwrap()),
            ("web".to_string(), Range::parse("^2.0.0").unwrap()),
        ];
        let candidates = vec![v("1.0.0"), v("2.0.0")];

        let err = resolve("core", Strategy::Latest, &requirements, &candidates).unwrap_err();
        match err {
            Error::Conflict { component, constraints } => {
                assert_eq!(component, "core");
                assert_eq!(constraints.len(), 2);
                assert!(constraints[0].contains("api requires ^1.0.0"));
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
    }
}
