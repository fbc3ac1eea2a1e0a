// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package dependency relations.

Textual form matches the control-file convention: alternative groups are
joined by `, `, alternatives within a group by ` | `, and an optional
version constraint trails the package name in parentheses, e.g.
`foo (>= 1.0) | bar, baz`.
*/

use {
    crate::{
        control::ControlParagraph,
        error::{BoltError, Result},
        version::{Constraint, ConstraintOp, Version},
    },
    std::fmt::{Display, Formatter},
};

/// A single named dependency, with an optional version constraint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dependency {
    pub name: String,
    pub constraint: Option<Constraint>,
}

impl Dependency {
    pub fn new(name: impl Into<String>, constraint: Option<Constraint>) -> Self {
        Self {
            name: name.into(),
            constraint,
        }
    }

    /// Parse a single dependency entry, e.g. `foo` or `foo (>= 1.0-1)`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Some(open) = s.find('(') {
            let close = s.rfind(')').ok_or_else(|| {
                BoltError::DependencyParse(format!("unbalanced parenthesis in '{}'", s))
            })?;

            let name = s[..open].trim().to_string();
            let inner = s[open + 1..close].trim();

            let mut parts = inner.splitn(2, char::is_whitespace);
            let op = parts.next().ok_or_else(|| {
                BoltError::DependencyParse(format!("missing relation operator in '{}'", s))
            })?;
            let version = parts
                .next()
                .ok_or_else(|| {
                    BoltError::DependencyParse(format!("missing version in '{}'", s))
                })?
                .trim();

            let constraint = Constraint::new(ConstraintOp::parse(op)?, Version::parse(version)?);

            if name.is_empty() {
                return Err(BoltError::DependencyParse(format!(
                    "missing package name in '{}'",
                    s
                )));
            }

            Ok(Self::new(name, Some(constraint)))
        } else {
            if s.is_empty() {
                return Err(BoltError::DependencyParse(
                    "empty dependency entry".to_string(),
                ));
            }

            Ok(Self::new(s, None))
        }
    }
}

impl Display for Dependency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.constraint {
            Some(c) => write!(f, "{} ({})", self.name, c),
            None => write!(f, "{}", self.name),
        }
    }
}

/// An ordered list of alternative-groups. Each group is a non-empty list of
/// [Dependency] values and represents an "or" relationship; groups
/// themselves are "and"ed together.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DependencyList {
    groups: Vec<Vec<Dependency>>,
}

impl DependencyList {
    pub fn new(groups: Vec<Vec<Dependency>>) -> Self {
        Self {
            groups: groups.into_iter().filter(|g| !g.is_empty()).collect(),
        }
    }

    /// Parse a control-file style dependency field value.
    pub fn parse(s: &str) -> Result<Self> {
        let mut groups = Vec::new();

        for group in s.split(',') {
            let group = group.trim();
            if group.is_empty() {
                continue;
            }

            let mut alternatives = Vec::new();
            let mut seen = std::collections::HashSet::new();

            for alt in group.split('|') {
                let alt = alt.trim();
                if alt.is_empty() {
                    continue;
                }

                let dep = Dependency::parse(alt)?;
                if seen.insert(dep.name.clone()) {
                    alternatives.push(dep);
                }
            }

            if !alternatives.is_empty() {
                groups.push(alternatives);
            }
        }

        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[Vec<Dependency>] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn push_group(&mut self, group: Vec<Dependency>) {
        if !group.is_empty() {
            self.groups.push(group);
        }
    }
}

impl Display for DependencyList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let groups = self
            .groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join(" | ")
            })
            .collect::<Vec<_>>();

        write!(f, "{}", groups.join(", "))
    }
}

/// All relation fields that may appear on a package control paragraph,
/// parsed in one pass.
#[derive(Clone, Debug, Default)]
pub struct PackageDependencyFields {
    pub depends: Option<DependencyList>,
    pub recommends: Option<DependencyList>,
    pub suggests: Option<DependencyList>,
    pub enhances: Option<DependencyList>,
    pub pre_depends: Option<DependencyList>,
    pub build_depends: Option<DependencyList>,
    pub conflicts: Option<DependencyList>,
    pub breaks: Option<DependencyList>,
    pub replaces: Option<DependencyList>,
    pub provides: Option<DependencyList>,
}

impl PackageDependencyFields {
    pub fn from_paragraph(paragraph: &ControlParagraph) -> Result<Self> {
        let field = |name: &str| -> Result<Option<DependencyList>> {
            paragraph.field_dependency_list(name).transpose()
        };

        Ok(Self {
            depends: field("Depends")?,
            recommends: field("Recommends")?,
            suggests: field("Suggests")?,
            enhances: field("Enhances")?,
            pre_depends: field("Pre-Depends")?,
            build_depends: field("Build-Depends")?,
            conflicts: field("Conflicts")?,
            breaks: field("Breaks")?,
            replaces: field("Replaces")?,
            provides: field("Provides")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() -> Result<()> {
        let list = DependencyList::parse("foo, bar (>= 1.0-1)")?;
        assert_eq!(list.groups().len(), 2);
        assert_eq!(list.groups()[0][0].name, "foo");
        assert_eq!(list.groups()[1][0].name, "bar");
        assert!(list.groups()[1][0].constraint.is_some());

        Ok(())
    }

    #[test]
    fn parse_alternatives() -> Result<()> {
        let list = DependencyList::parse("foo | bar, baz")?;
        assert_eq!(list.groups().len(), 2);
        assert_eq!(list.groups()[0].len(), 2);
        assert_eq!(list.groups()[1].len(), 1);

        Ok(())
    }

    #[test]
    fn roundtrip_display() -> Result<()> {
        let s = "foo (>= 1.0-1), bar | baz";
        let list = DependencyList::parse(s)?;
        assert_eq!(list.to_string(), s);

        Ok(())
    }
}
