// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The specfile XML model: load, preprocess, and the typed tree consumers
build their `SourcePackage`/binary package views from.

Loading inlines `<xi:include href="…"/>` elements textually before parsing
(`roxmltree` has no native XInclude support), then builds owned structures
from the DOM via `TryFrom<roxmltree::Node>` conversions. Structural
conformance ("RELAX-NG-equivalent") is enforced by those conversions failing
closed with [`BoltError::SpecSyntaxError`] rather than by a schema file.
*/

use {
    crate::{
        error::{BoltError, Result},
        filter::FilterParser,
        version::Version,
    },
    once_cell::sync::Lazy,
    regex::Regex,
    roxmltree::Node,
    std::{collections::HashMap, path::Path},
};

static XINCLUDE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<xi:include\s+href="([^"]+)"\s*/>"#).expect("static regex is valid")
});

/// Inline `<xi:include>` elements, resolving `href` relative to `base_dir`.
///
/// Single pass, non-recursive: an included fragment is not itself scanned
/// for further includes, matching the shallow inlining latitude granted for
/// XML libraries without native XInclude support.
fn inline_xincludes(xml: &str, base_dir: &Path) -> Result<String> {
    let mut out = String::with_capacity(xml.len());
    let mut last = 0;

    for m in XINCLUDE_RE.captures_iter(xml) {
        let whole = m.get(0).expect("group 0 always present");
        let href = &m[1];

        out.push_str(&xml[last..whole.start()]);

        let included_path = base_dir.join(href);
        let included = std::fs::read_to_string(&included_path)?;
        out.push_str(&included);

        last = whole.end();
    }

    out.push_str(&xml[last..]);
    Ok(out)
}

fn attr<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attribute(name)
}

fn required_attr<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str> {
    attr(node, name).ok_or_else(|| {
        BoltError::SpecSyntaxError(format!("<{}> is missing required attribute @{}", node.tag_name().name(), name))
    })
}

fn split_csv(s: &str) -> Vec<String> {
    s.split(',').map(|v| v.trim().to_string()).collect()
}

fn element_text(node: Node) -> String {
    let mut out = String::new();
    for descendant in node.descendants() {
        if descendant.is_text() {
            out.push_str(descendant.text().unwrap_or(""));
        }
    }
    out
}

fn normalize_space(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `supported-on` evaluation shared by source, binary, and dependency nodes.
///
/// Absence of any positive token (everything is `!foo`), or the literal
/// token `all`, means "supported everywhere".
pub fn is_supported_on(supported_on: Option<&[String]>, machine: &str) -> bool {
    let Some(supported_on) = supported_on else {
        return true;
    };

    let negated = format!("!{}", machine);
    if supported_on.iter().any(|v| v == &negated) {
        return false;
    }

    let support_all = supported_on.iter().all(|v| v.starts_with('!'));
    if support_all || supported_on.iter().any(|v| v == "all") {
        return true;
    }

    supported_on.iter().any(|v| v == machine)
}

/// A single dependency alternative, e.g. one `<package>` inside a `<choice>`.
#[derive(Clone, Debug)]
pub struct DependencyEntry {
    pub name: String,
    pub constraint: Option<String>,
}

/// A `requires`/`provides`/`conflicts`/`replaces` block: a list of
/// alternative-groups, each group an OR of [`DependencyEntry`].
#[derive(Clone, Debug, Default)]
pub struct DependencySpecification {
    groups: Vec<Vec<DependencyEntry>>,
}

impl DependencySpecification {
    pub fn groups(&self) -> &[Vec<DependencyEntry>] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Build from a `requires`/`provides`/`conflicts`/`replaces` node, honoring
    /// `supported-on` (entries excluded for `machine` are dropped, matching
    /// the original's `ignore="true"` marking-then-pruning) and `package|choice`
    /// children.
    pub fn from_node(node: Option<Node>, machine: &str) -> Self {
        let Some(node) = node else {
            return Self::default();
        };

        let mut groups = Vec::new();

        for child in node.children().filter(|c| c.is_element()) {
            let alternatives: Vec<Node> = match child.tag_name().name() {
                "choice" => child
                    .children()
                    .filter(|c| c.is_element() && c.tag_name().name() == "package")
                    .collect(),
                "package" => vec![child],
                _ => continue,
            };

            let mut entries = Vec::new();

            for pkg in alternatives {
                let supported_on = attr(pkg, "supported-on").map(split_csv);
                if !is_supported_on(supported_on.as_deref(), machine) {
                    continue;
                }

                if let Some(name) = attr(pkg, "name") {
                    entries.push(DependencyEntry {
                        name: name.to_string(),
                        constraint: attr(pkg, "version").map(|v| v.to_string()),
                    });
                }
            }

            if !entries.is_empty() {
                groups.push(entries);
            }
        }

        Self { groups }
    }
}

/// A `<file>` entry inside `<patches><patchset>`.
#[derive(Clone, Debug)]
pub struct PatchFileSpec {
    pub src: String,
    pub subdir: String,
    pub strip: u32,
}

/// A `<file>` entry inside `<sources>`.
#[derive(Clone, Debug)]
pub struct SourceFileSpec {
    pub src: String,
    pub subdir: String,
    pub sha256: String,
}

/// The four lifecycle rule bodies, as raw shell fragments.
#[derive(Clone, Debug, Default)]
pub struct Rules {
    pub prepare: String,
    pub build: String,
    pub install: String,
    pub clean: String,
}

/// A package's `<description>`: a one-line summary plus free-form body text.
///
/// The body is extracted as plain, whitespace-normalized text; the
/// original's inline-markup-to-man-page XSLT rendering is not reproduced
/// here since no XSLT engine is in the corpus's dependency graph; a
/// plain-text description field is a reasonable, lossy substitute.
#[derive(Clone, Debug, Default)]
pub struct PackageDescription {
    pub summary: String,
    pub body: String,
}

impl PackageDescription {
    fn from_node(node: Option<Node>) -> Result<Self> {
        let Some(node) = node else {
            return Ok(Self::default());
        };

        let summary_node = node
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == "summary");

        let summary = summary_node
            .map(|n| normalize_space(&element_text(n)))
            .unwrap_or_default();

        let body = normalize_space(&element_text(node));

        Ok(Self { summary, body })
    }
}

/// One `<release>` entry in the `<changelog>`.
#[derive(Clone, Debug)]
pub struct ReleaseEntry {
    pub version: String,
    pub revision: Option<String>,
    pub epoch: Option<u32>,
    pub maintainer: String,
    pub email: String,
    pub date: String,
}

impl ReleaseEntry {
    /// The package version string this release resolves to: `[epoch:]version[-revision]`.
    pub fn full_version(&self) -> Result<Version> {
        let mut s = String::new();
        if let Some(epoch) = self.epoch {
            if epoch > 0 {
                s.push_str(&epoch.to_string());
                s.push(':');
            }
        }
        s.push_str(&self.version);
        if let Some(rev) = &self.revision {
            s.push('-');
            s.push_str(rev);
        }
        Version::parse(&s)
    }
}

impl<'a> TryFrom<Node<'a, '_>> for ReleaseEntry {
    type Error = BoltError;

    fn try_from(node: Node<'a, '_>) -> Result<Self> {
        Ok(Self {
            version: required_attr(node, "version")?.to_string(),
            revision: attr(node, "revision").map(|v| v.to_string()),
            epoch: attr(node, "epoch")
                .map(|v| v.parse::<u32>())
                .transpose()
                .map_err(|_| BoltError::SpecSyntaxError("@epoch is not an integer".to_string()))?,
            maintainer: required_attr(node, "maintainer")?.to_string(),
            email: required_attr(node, "email")?.to_string(),
            date: required_attr(node, "date")?.to_string(),
        })
    }
}

/// The full `<changelog>`, most recent release first (document order).
#[derive(Clone, Debug, Default)]
pub struct Changelog {
    pub releases: Vec<ReleaseEntry>,
}

impl Changelog {
    pub fn latest(&self) -> Result<&ReleaseEntry> {
        self.releases
            .first()
            .ok_or_else(|| BoltError::SpecSyntaxError("changelog has no releases".to_string()))
    }
}

/// The `<source>` element: the source package definition.
#[derive(Clone, Debug)]
pub struct SourceSpec {
    pub name: String,
    pub repo: Option<String>,
    pub description: PackageDescription,
    pub build_for: Option<Vec<String>>,
    pub supported_on: Option<Vec<String>>,
    pub requires: DependencySpecification,
    pub patches: Vec<PatchFileSpec>,
    pub sources: Vec<SourceFileSpec>,
    pub rules: Rules,
    /// Set to the original `if` expression when the element was pruned but
    /// retained for its sources, per the prune pass's `<source>` exception.
    pub skip: Option<String>,
}

impl SourceSpec {
    fn from_node(node: Node, machine: &str, filter: &FilterParser) -> Result<Self> {
        let name = required_attr(node, "name")?.to_string();
        let repo = attr(node, "repo").map(|v| v.to_string());

        let description_node = node
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == "description");
        let description = PackageDescription::from_node(description_node)?;

        let build_for = attr(node, "build-for").map(split_csv);
        let supported_on = attr(node, "supported-on").map(split_csv);

        let requires_node = node
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == "requires");
        let requires = DependencySpecification::from_node(requires_node, machine);

        let mut patches = Vec::new();
        if let Some(patches_node) = node
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == "patches")
        {
            for patchset in patches_node
                .children()
                .filter(|c| c.is_element() && c.tag_name().name() == "patchset")
            {
                let set_subdir = attr(patchset, "subdir").unwrap_or("").to_string();
                let set_strip: u32 = attr(patchset, "strip").unwrap_or("1").parse().unwrap_or(1);

                for file_node in patchset
                    .children()
                    .filter(|c| c.is_element() && c.tag_name().name() == "file")
                {
                    if let Some(expr) = attr(file_node, "if") {
                        if !filter.parse(expr)? {
                            continue;
                        }
                    }

                    patches.push(PatchFileSpec {
                        src: required_attr(file_node, "src")?.to_string(),
                        subdir: attr(file_node, "subdir")
                            .unwrap_or(&set_subdir)
                            .to_string(),
                        strip: attr(file_node, "strip")
                            .map(|v| v.parse().unwrap_or(set_strip))
                            .unwrap_or(set_strip),
                    });
                }
            }
        }

        let mut sources = Vec::new();
        if let Some(sources_node) = node
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == "sources")
        {
            for file_node in sources_node
                .children()
                .filter(|c| c.is_element() && c.tag_name().name() == "file")
            {
                if let Some(expr) = attr(file_node, "if") {
                    if !filter.parse(expr)? {
                        continue;
                    }
                }

                sources.push(SourceFileSpec {
                    src: required_attr(file_node, "src")?.to_string(),
                    subdir: attr(file_node, "subdir").unwrap_or("").to_string(),
                    sha256: attr(file_node, "sha256sum").unwrap_or("").to_string(),
                });
            }
        }

        let mut rules = Rules::default();
        if let Some(rules_node) = node
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == "rules")
        {
            for child in rules_node.children().filter(|c| c.is_element()) {
                let text = element_text(child);
                match child.tag_name().name() {
                    "prepare" => rules.prepare = text,
                    "build" => rules.build = text,
                    "install" => rules.install = text,
                    "clean" => rules.clean = text,
                    _ => {}
                }
            }
        }

        let skip = attr(node, "skip").map(|v| v.to_string());

        Ok(Self {
            name,
            repo,
            description,
            build_for,
            supported_on,
            requires,
            patches,
            sources,
            rules,
            skip,
        })
    }
}

/// A single `<file>`/`<dir>` declaration inside a binary package's `<contents>`.
#[derive(Clone, Debug)]
pub struct ContentDeclaration {
    pub is_dir: bool,
    pub src: String,
    pub mode: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub conffile: Option<bool>,
}

/// The `<package>` element: one binary package produced by this source.
#[derive(Clone, Debug)]
pub struct BinaryPackageSpec {
    pub name: String,
    pub description: PackageDescription,
    pub section: String,
    pub source: Option<String>,
    pub architecture: Option<String>,
    pub build_for: Option<Vec<String>>,
    pub supported_on: Option<Vec<String>>,
    pub requires: DependencySpecification,
    pub provides: DependencySpecification,
    pub conflicts: DependencySpecification,
    pub replaces: DependencySpecification,
    pub content_spec: Vec<ContentDeclaration>,
    pub maintainer_scripts: HashMap<String, String>,
    pub content_subdir: Option<String>,
    pub collect_py_cache_files: bool,
}

impl BinaryPackageSpec {
    fn from_node(node: Node, machine: &str, filter: &FilterParser) -> Result<Self> {
        let name = required_attr(node, "name")?.to_string();

        let description_node = node
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == "description");
        let description = PackageDescription::from_node(description_node)?;

        let section = attr(node, "section").unwrap_or("unknown").to_string();
        let source = attr(node, "source").map(|v| v.to_string());
        let architecture = attr(node, "architecture").map(|v| v.to_string());
        let build_for = attr(node, "build-for").map(split_csv);
        let supported_on = attr(node, "supported-on").map(split_csv);

        let dep = |tag: &str| {
            let dep_node = node
                .children()
                .find(|c| c.is_element() && c.tag_name().name() == tag);
            DependencySpecification::from_node(dep_node, machine)
        };

        let requires = dep("requires");
        let provides = dep("provides");
        let conflicts = dep("conflicts");
        let replaces = dep("replaces");

        let mut content_spec: Vec<ContentDeclaration> = Vec::new();
        let mut content_subdir = None;
        let mut collect_py_cache_files = false;

        if let Some(contents_node) = node
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == "contents")
        {
            content_subdir = attr(contents_node, "subdir").map(|v| v.to_string());
            collect_py_cache_files = attr(contents_node, "collect-py-cache-files")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);

            for entry_node in contents_node.children().filter(|c| c.is_element()) {
                let tag = entry_node.tag_name().name();
                if tag != "file" && tag != "dir" {
                    continue;
                }

                if let Some(expr) = attr(entry_node, "if") {
                    if !filter.parse(expr)? {
                        continue;
                    }
                }

                let mut src = required_attr(entry_node, "src")?.trim().to_string();
                if let Some(rest) = src.strip_prefix("${prefix}") {
                    src = format!("/usr{}", rest);
                }
                if src.len() > 1 {
                    src = src.trim_end_matches('/').to_string();
                }

                let is_dir = tag == "dir";

                // `<file>` takes precedence over `<dir>` for the same path.
                if let Some(existing) = content_spec.iter().find(|e| e.src == src) {
                    if !existing.is_dir && is_dir {
                        continue;
                    }
                }
                content_spec.retain(|e| e.src != src);

                content_spec.push(ContentDeclaration {
                    is_dir,
                    src,
                    mode: attr(entry_node, "mode").map(|v| v.to_string()),
                    owner: attr(entry_node, "owner").map(|v| v.to_string()),
                    group: attr(entry_node, "group").map(|v| v.to_string()),
                    conffile: attr(entry_node, "conffile").map(|v| v.eq_ignore_ascii_case("true")),
                });
            }
        }

        let mut maintainer_scripts = HashMap::new();
        if let Some(scripts_node) = node
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == "maintainer-scripts")
        {
            for child in scripts_node.children().filter(|c| c.is_element()) {
                let tag = child.tag_name().name();
                if matches!(tag, "preinst" | "postinst" | "prerm" | "postrm") {
                    maintainer_scripts.insert(tag.to_string(), element_text(child));
                }
            }
        }

        Ok(Self {
            name,
            description,
            section,
            source,
            architecture,
            build_for,
            supported_on,
            requires,
            provides,
            conflicts,
            replaces,
            content_spec,
            maintainer_scripts,
            content_subdir,
            collect_py_cache_files,
        })
    }
}

/// The parsed and preprocessed specfile: one source, zero or more binaries.
#[derive(Clone, Debug)]
pub struct Specfile {
    pub source: SourceSpec,
    pub packages: Vec<BinaryPackageSpec>,
    pub changelog: Changelog,
}

impl Specfile {
    /// Load, XInclude-inline, parse, preprocess (prune `if="…"`) and convert
    /// to the owned typed tree, in one step.
    pub fn load(path: &Path, true_terms: &[String], machine: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let inlined = inline_xincludes(&raw, base_dir)?;

        let doc = roxmltree::Document::parse(&inlined)
            .map_err(|e| BoltError::SpecSyntaxError(e.to_string()))?;

        let root = doc.root_element();
        if root.tag_name().name() != "control" {
            return Err(BoltError::SpecSyntaxError(
                "root element must be <control>".to_string(),
            ));
        }

        let filter = FilterParser::new(true_terms.iter().cloned());
        Self::check_if_attrs(root, &filter)?;

        let source_node = root
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == "source")
            .ok_or_else(|| {
                BoltError::SpecSyntaxError("<control> must contain exactly one <source>".to_string())
            })?;

        let source = SourceSpec::from_node(source_node, machine, &filter)?;

        let mut packages = Vec::new();
        for pkg_node in root
            .children()
            .filter(|c| c.is_element() && c.tag_name().name() == "package")
        {
            if let Some(expr) = attr(pkg_node, "if") {
                if !filter.parse(expr)? {
                    continue;
                }
            }
            packages.push(BinaryPackageSpec::from_node(pkg_node, machine, &filter)?);
        }

        let changelog_node = root
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == "changelog");

        let mut releases = Vec::new();
        if let Some(changelog_node) = changelog_node {
            for release_node in changelog_node
                .children()
                .filter(|c| c.is_element() && c.tag_name().name() == "release")
            {
                releases.push(ReleaseEntry::try_from(release_node)?);
            }
        }

        Ok(Self {
            source,
            packages,
            changelog: Changelog { releases },
        })
    }

    /// Evaluate every `if="…"` attribute in the tree, failing closed on a
    /// malformed expression. The actual pruning of `false` nodes happens
    /// implicitly: `<package>` nodes are filtered out in [`Specfile::load`],
    /// and `<source>` always survives (its `skip` attribute is read back in
    /// [`SourceSpec::from_node`]).
    fn check_if_attrs(root: Node, filter: &FilterParser) -> Result<()> {
        for node in root.descendants().filter(|n| n.is_element()) {
            if let Some(expr) = attr(node, "if") {
                filter.parse(expr)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<control>
  <source name="libfoo" repo="core">
    <description>
      <summary>The libfoo library</summary>
      <p>A foo implementation.</p>
    </description>
    <requires>
      <package name="libbar-dev" version=">= 1.0"/>
      <choice>
        <package name="gcc" supported-on="!s390x"/>
        <package name="clang"/>
      </choice>
    </requires>
    <sources>
      <file src="libfoo-1.0.tar.xz" sha256sum="abc123"/>
    </sources>
    <patches>
      <patchset strip="1">
        <file src="0001-fix.patch"/>
      </patchset>
    </patches>
    <rules>
      <build>make %{parallel}</build>
      <install>make install</install>
    </rules>
  </source>
  <package name="libfoo1" section="libs" if="!musl">
    <description><summary>libfoo runtime</summary></description>
    <contents>
      <dir src="/usr/lib"/>
      <file src="/usr/lib/libfoo.so.1"/>
    </contents>
  </package>
  <package name="libfoo-musl" section="libs" if="musl">
    <description><summary>musl build</summary></description>
  </package>
  <changelog>
    <release version="1.0" revision="1" maintainer="Jane" email="jane@example.com" date="2024-01-01"/>
  </changelog>
</control>
"#;

    #[test]
    fn parses_source_and_packages() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("libfoo.xml");
        std::fs::write(&path, SAMPLE)?;

        let spec = Specfile::load(&path, &[], "x86_64")?;

        assert_eq!(spec.source.name, "libfoo");
        assert_eq!(spec.source.repo.as_deref(), Some("core"));
        assert_eq!(spec.source.description.summary, "The libfoo library");
        assert_eq!(spec.source.sources.len(), 1);
        assert_eq!(spec.source.patches.len(), 1);
        assert_eq!(spec.source.patches[0].strip, 1);
        assert_eq!(spec.source.requires.groups().len(), 2);

        // `musl` is false here, so only the non-musl package survives.
        assert_eq!(spec.packages.len(), 1);
        assert_eq!(spec.packages[0].name, "libfoo1");

        assert_eq!(spec.changelog.latest()?.version, "1.0");

        Ok(())
    }

    #[test]
    fn musl_true_term_flips_package_selection() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("libfoo.xml");
        std::fs::write(&path, SAMPLE)?;

        let spec = Specfile::load(&path, &["musl".to_string()], "x86_64")?;
        assert_eq!(spec.packages.len(), 1);
        assert_eq!(spec.packages[0].name, "libfoo-musl");

        Ok(())
    }

    #[test]
    fn dependency_supported_on_excludes_machine() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("libfoo.xml");
        std::fs::write(&path, SAMPLE)?;

        let spec = Specfile::load(&path, &[], "s390x")?;
        let choice_group = &spec.source.requires.groups()[1];
        assert_eq!(choice_group.len(), 1);
        assert_eq!(choice_group[0].name, "clang");

        Ok(())
    }

    #[test]
    fn is_supported_on_rules() {
        assert!(is_supported_on(None, "x86_64"));
        assert!(is_supported_on(
            Some(&["all".to_string()]),
            "x86_64"
        ));
        assert!(!is_supported_on(
            Some(&["!x86_64".to_string()]),
            "x86_64"
        ));
        assert!(is_supported_on(
            Some(&["!s390x".to_string()]),
            "x86_64"
        ));
        assert!(is_supported_on(
            Some(&["aarch64".to_string(), "x86_64".to_string()]),
            "x86_64"
        ));
        assert!(!is_supported_on(
            Some(&["aarch64".to_string()]),
            "x86_64"
        ));
    }
}
