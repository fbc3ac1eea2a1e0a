// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian-style package version strings and dependency constraints. */

use {
    crate::error::{BoltError, Result},
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        str::FromStr,
    },
};

/// A package version.
///
/// Versions consist of multiple sub-components and have rules about
/// sorting. The semantics are defined at
/// <https://www.debian.org/doc/debian-policy/ch-controlfields.html#version>.
///
/// The concise format is `[epoch:]upstream[-revision]` and each component
/// has rules about what characters are allowed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Version {
    epoch: Option<u32>,
    upstream: String,
    revision: Option<String>,
}

impl Version {
    /// Construct an instance by parsing a version string.
    pub fn parse(s: &str) -> Result<Self> {
        // Epoch is the part before a colon, if present, but only when that
        // part is entirely digits: `upstream` is itself allowed to contain
        // colons (see the accepted-character set below), so a colon whose
        // prefix isn't a bare number belongs to `upstream`, not the epoch.
        // upstream and revision are discovered by splitting on the last hyphen.

        let (epoch, remainder) = match s.find(':') {
            Some(pos) if !s[0..pos].is_empty() && s[0..pos].chars().all(|c| c.is_ascii_digit()) => {
                (Some(&s[0..pos]), &s[pos + 1..])
            }
            _ => (None, s),
        };

        let (upstream, revision) = if let Some(pos) = remainder.rfind('-') {
            (&remainder[0..pos], Some(&remainder[pos + 1..]))
        } else {
            (remainder, None)
        };

        let epoch = match epoch {
            Some(epoch) => Some(u32::from_str(epoch)?),
            None => None,
        };

        if upstream.is_empty()
            || !upstream.chars().all(|c| match c {
                c if c.is_ascii_alphanumeric() => true,
                '.' | '+' | '~' | ':' => true,
                '-' => revision.is_some(),
                _ => false,
            })
        {
            return Err(BoltError::InvalidVersion(s.to_string()));
        }

        let upstream_version = upstream.to_string();

        let revision = if let Some(revision) = revision {
            if revision.is_empty()
                || !revision.chars().all(|c| match c {
                    c if c.is_ascii_alphanumeric() => true,
                    '+' | '.' | '~' => true,
                    _ => false,
                })
            {
                return Err(BoltError::InvalidVersion(s.to_string()));
            }

            Some(revision.to_string())
        } else {
            None
        };

        Ok(Self {
            epoch,
            upstream: upstream_version,
            revision,
        })
    }

    /// The `epoch` component, if explicitly present.
    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    /// Assumed value of the `epoch` component, defaulting to `0`.
    pub fn epoch_assumed(&self) -> u32 {
        self.epoch.unwrap_or(0)
    }

    /// The `upstream` component of the version string.
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// The `revision` component of the version string, if present.
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }
}

impl FromStr for Version {
    type Err = BoltError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{}:", epoch)?;
        }
        write!(f, "{}", self.upstream)?;
        if let Some(revision) = &self.revision {
            write!(f, "-{}", revision)?;
        }
        Ok(())
    }
}

/// Split a string on the first digit character.
fn split_first_digit(s: &str) -> (&str, &str) {
    let first_digit_index = s.chars().position(|c| c.is_ascii_digit());

    match first_digit_index {
        Some(0) => ("", s),
        Some(pos) => (&s[0..pos], &s[pos..]),
        None => (s, ""),
    }
}

fn split_first_nondigit(s: &str) -> (&str, &str) {
    let pos = s.chars().position(|c| !c.is_ascii_digit());

    match pos {
        Some(0) => ("", s),
        Some(pos) => (&s[0..pos], &s[pos..]),
        None => (s, ""),
    }
}

/// Split a string on the first non-digit character and convert the leading digits to an integer.
fn split_first_digit_number(s: &str) -> (u64, &str) {
    let (digits, remaining) = split_first_nondigit(s);

    let numeric = if digits.is_empty() {
        0
    } else {
        u64::from_str(digits).expect("digits should deserialize to string")
    };

    (numeric, remaining)
}

/// Rank of a character (or a pad slot, `None`) per §4.1: `~ < (pad) < letters
/// (ASCII) < - < + < .`.
fn char_rank(c: Option<char>) -> (u8, char) {
    match c {
        Some('~') => (0, '~'),
        None => (1, '\0'),
        Some(c) if c.is_ascii_alphabetic() => (2, c),
        Some('-') => (3, '-'),
        Some('+') => (4, '+'),
        Some('.') => (5, '.'),
        Some(c) => (6, c),
    }
}

/// Compare two non-digit runs: pad the shorter to the longer's length and
/// compare character-by-character using `char_rank`.
fn lexical_compare(a: &str, b: &str) -> Ordering {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    for pos in 0..std::cmp::max(a_chars.len(), b_chars.len()) {
        let a_rank = char_rank(a_chars.get(pos).copied());
        let b_rank = char_rank(b_chars.get(pos).copied());

        match a_rank.cmp(&b_rank) {
            Ordering::Equal => {}
            res => return res,
        }
    }

    Ordering::Equal
}

/// Compare a version component string using the Debian ordering rule.
fn compare_component(a: &str, b: &str) -> Ordering {
    let mut a_remaining = a;
    let mut b_remaining = b;

    loop {
        let (a_leading_nondigit, a_rest) = split_first_digit(a_remaining);
        a_remaining = a_rest;

        let (b_leading_nondigit, b_rest) = split_first_digit(b_remaining);
        b_remaining = b_rest;

        match lexical_compare(a_leading_nondigit, b_leading_nondigit) {
            Ordering::Equal => {}
            res => return res,
        }

        let (a_numeric, a_rest) = split_first_digit_number(a_remaining);
        a_remaining = a_rest;

        let (b_numeric, b_rest) = split_first_digit_number(b_remaining);
        b_remaining = b_rest;

        match a_numeric.cmp(&b_numeric) {
            Ordering::Equal => {}
            res => return res,
        }

        if a_remaining.is_empty() && b_remaining.is_empty() {
            return Ordering::Equal;
        }
    }
}

/// Compare two versions per §4.1: epoch numerically, then upstream, then revision
/// (missing revision treated as `"0"`).
pub fn compare(a: &Version, b: &Version) -> Ordering {
    match a.epoch_assumed().cmp(&b.epoch_assumed()) {
        Ordering::Equal => match compare_component(&a.upstream, &b.upstream) {
            Ordering::Equal => {
                let a_rev = a.revision.as_deref().unwrap_or("0");
                let b_rev = b.revision.as_deref().unwrap_or("0");
                compare_component(a_rev, b_rev)
            }
            res => res,
        },
        res => res,
    }
}

impl PartialOrd<Self> for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(compare(self, other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

/// A comparison operator in a dependency constraint.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConstraintOp {
    /// `<<`: strictly earlier.
    Lt,
    /// `<=`: earlier or equal.
    Le,
    /// `=`: equal.
    Eq,
    /// `>=`: later or equal.
    Ge,
    /// `>>`: strictly later.
    Gt,
}

impl ConstraintOp {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "<<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            "=" => Ok(Self::Eq),
            ">=" => Ok(Self::Ge),
            ">>" => Ok(Self::Gt),
            _ => Err(BoltError::DependencyParse(format!(
                "unknown relation operator: {}",
                s
            ))),
        }
    }
}

impl Display for ConstraintOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Lt => "<<",
            Self::Le => "<=",
            Self::Eq => "=",
            Self::Ge => ">=",
            Self::Gt => ">>",
        })
    }
}

/// A version constraint: `(op, version)`, satisfied by any `Version v` where
/// `compare(v, version)` lies in the set decoded from `op`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Constraint {
    pub op: ConstraintOp,
    pub version: Version,
}

impl Constraint {
    pub fn new(op: ConstraintOp, version: Version) -> Self {
        Self { op, version }
    }

    /// Whether `candidate` satisfies this constraint.
    pub fn meets(&self, candidate: &Version) -> bool {
        match compare(candidate, &self.version) {
            Ordering::Less => matches!(self.op, ConstraintOp::Lt | ConstraintOp::Le),
            Ordering::Equal => matches!(
                self.op,
                ConstraintOp::Le | ConstraintOp::Eq | ConstraintOp::Ge
            ),
            Ordering::Greater => matches!(self.op, ConstraintOp::Ge | ConstraintOp::Gt),
        }
    }
}

impl Display for Constraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.op, self.version)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse() -> Result<()> {
        assert_eq!(
            Version::parse("1:4.7.0+dfsg1-2")?,
            Version {
                epoch: Some(1),
                upstream: "4.7.0+dfsg1".into(),
                revision: Some("2".into()),
            }
        );
        assert_eq!(
            Version::parse("3.3.2.final~github")?,
            Version {
                epoch: None,
                upstream: "3.3.2.final~github".into(),
                revision: None,
            }
        );
        assert_eq!(
            Version::parse("0.18.0+dfsg-2+b1")?,
            Version {
                epoch: None,
                upstream: "0.18.0+dfsg".into(),
                revision: Some("2+b1".into())
            }
        );

        Ok(())
    }

    #[test]
    fn parse_allows_colon_in_upstream() -> Result<()> {
        assert_eq!(
            Version::parse("2:4.7.0")?,
            Version {
                epoch: Some(2),
                upstream: "4.7.0".into(),
                revision: None,
            }
        );
        assert_eq!(
            Version::parse("1.2:3-1")?,
            Version {
                epoch: None,
                upstream: "1.2:3".into(),
                revision: Some("1".into()),
            }
        );

        Ok(())
    }

    #[test]
    fn format() -> Result<()> {
        for s in ["1:4.7.0+dfsg1-2", "3.3.2.final~github", "0.18.0+dfsg-2+b1"] {
            let v = Version::parse(s)?;
            assert_eq!(format!("{}", v), s);
        }

        Ok(())
    }

    #[test]
    fn test_compare_component() {
        assert_eq!(
            compare_component("1.0~beta1~svn1245", "1.0~beta1"),
            Ordering::Less
        );
        assert_eq!(compare_component("1.0~beta1", "1.0"), Ordering::Less);
        assert_eq!(compare_component("1.0", "1.0~beta1"), Ordering::Greater);
    }

    #[test]
    fn scenario_version_compare() -> Result<()> {
        assert_eq!(
            compare(&Version::parse("1.2.3-1")?, &Version::parse("1.2.3-2")?),
            Ordering::Less
        );
        assert_eq!(
            compare(&Version::parse("1:0-1")?, &Version::parse("2-1")?),
            Ordering::Less
        );
        assert_eq!(
            compare(&Version::parse("1.0~rc1-1")?, &Version::parse("1.0-1")?),
            Ordering::Less
        );

        Ok(())
    }

    #[test]
    fn total_order_transitivity() -> Result<()> {
        // P1: for all a,b,c, compare(a,b)<0 and compare(b,c)<0 implies compare(a,c)<0.
        let versions = [
            "1.0~~-1",
            "1.0~-1",
            "1.0-1",
            "1.0-2",
            "1.0a-1",
            "1.0+b-1",
            "1:1.0-1",
        ];

        for a in &versions {
            for b in &versions {
                for c in &versions {
                    let (va, vb, vc) = (Version::parse(a)?, Version::parse(b)?, Version::parse(c)?);
                    if compare(&va, &vb) == Ordering::Less && compare(&vb, &vc) == Ordering::Less {
                        assert_eq!(compare(&va, &vc), Ordering::Less);
                    }
                }
            }
        }

        Ok(())
    }

    #[test]
    fn constraint_meets() -> Result<()> {
        let c = Constraint::new(ConstraintOp::Ge, Version::parse("1.0-1")?);
        assert!(c.meets(&Version::parse("1.0-1")?));
        assert!(c.meets(&Version::parse("1.0-2")?));
        assert!(!c.meets(&Version::parse("0.9-1")?));

        Ok(())
    }
}
