// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Content-spec expansion: turn a binary package's declarative `<contents>`
entries into the concrete, stat-backed file list an archive writer consumes.

Grounded on `binarypackage.py`'s `generate_file_list`. Kept as a distinct
type from [`crate::file_manifest::FileEntry`], which is a generic byte
carrier for archive assembly and has no notion of ownership, conffile-ness,
or ELF stats.
*/

use {
    crate::{
        error::Result,
        filestats::{FileKind, FileStats},
        specfile::ContentDeclaration,
    },
    std::{
        collections::BTreeMap,
        path::{Path, PathBuf},
    },
};

/// One file, directory or device node destined for a `.bolt` archive.
#[derive(Clone, Debug)]
pub struct ContentEntry {
    /// Absolute, normalized path inside the installed package.
    pub target_path: String,
    pub kind: FileKind,
    pub mode: Option<u16>,
    pub owner: Option<String>,
    pub group: Option<String>,
    /// Tri-state per `generate_file_list`'s `conffiles` handling: `Some(false)`
    /// excludes the path from `conffiles` even under `/etc/`, `Some(true)`
    /// always includes it, and `None` defers to the `/etc/` default.
    pub conffile: Option<bool>,
    pub stats: FileStats,
    pub debug_info_path: Option<String>,
}

impl ContentEntry {
    /// Resolve the tri-state `conffile` declaration against the final
    /// `conffiles` rule: explicit `false` never qualifies, explicit `true`
    /// always does, and an unset declaration defaults to `true` only for
    /// regular files under `/etc/`.
    pub fn is_conffile(&self) -> bool {
        match self.conffile {
            Some(false) => false,
            Some(true) => true,
            None => self.kind == FileKind::File && self.target_path.starts_with("/etc/"),
        }
    }
}

fn parse_mode(s: &str) -> Option<u16> {
    u16::from_str_radix(s, 8).ok()
}

/// Expand `{a,b}`-style brace alternatives in a path, non-recursively (one
/// level of braces, matching the scope of the original's `braceexpand`).
fn brace_expand(pattern: &str) -> Vec<String> {
    if let Some(open) = pattern.find('{') {
        if let Some(close) = pattern[open..].find('}') {
            let close = open + close;
            let prefix = &pattern[..open];
            let suffix = &pattern[close + 1..];
            let alternatives = pattern[open + 1..close].split(',');

            return alternatives
                .flat_map(|alt| brace_expand(&format!("{}{}{}", prefix, alt, suffix)))
                .collect();
        }
    }
    vec![pattern.to_string()]
}

fn has_glob_metachars(s: &str) -> bool {
    s.contains('*') || s.contains('?') || s.contains('[')
}

/// Expand every `<file>`/`<dir>` declaration into concrete, stat-backed
/// entries, rooted at `basedir`.
///
/// Traversal is deterministic in declaration order; the final result is
/// re-sorted by `target_path` before being returned.
pub fn expand_content_spec(
    declarations: &[ContentDeclaration],
    basedir: &Path,
    architecture: Option<&str>,
    collect_py_cache_files: bool,
) -> Result<Vec<ContentEntry>> {
    let mut contents: BTreeMap<String, ContentEntry> = BTreeMap::new();

    for decl in declarations {
        let rel_path = decl.src.trim_start_matches('/');
        let abs_path = basedir.join(rel_path);

        if decl.is_dir {
            contents.insert(
                decl.src.clone(),
                ContentEntry {
                    target_path: decl.src.clone(),
                    kind: FileKind::Dir,
                    mode: decl.mode.as_deref().and_then(parse_mode),
                    owner: decl.owner.clone(),
                    group: decl.group.clone(),
                    conffile: None,
                    stats: FileStats::default_dir_stats(),
                    debug_info_path: None,
                },
            );
            continue;
        }

        let matches: Vec<PathBuf> = if has_glob_metachars(&decl.src) || decl.src.contains('{') {
            let patterns = if decl.src.contains('{') {
                brace_expand(rel_path)
            } else {
                vec![rel_path.to_string()]
            };

            let mut out = Vec::new();
            for pattern in patterns {
                let full_pattern = basedir.join(&pattern);
                for entry in glob::glob(&full_pattern.to_string_lossy())
                    .map_err(|e| crate::error::BoltError::SpecSyntaxError(e.to_string()))?
                {
                    if let Ok(path) = entry {
                        out.push(path);
                    }
                }
            }
            out
        } else if abs_path.is_dir() && !abs_path.is_symlink() {
            collect_descendants(&abs_path)?
        } else {
            vec![]
        };

        if matches.is_empty() && !(abs_path.is_dir() && !abs_path.is_symlink()) {
            // A plain file or symlink declaration (no glob, no real directory).
            let stats = FileStats::detect_from_filename(&abs_path)?;
            contents.insert(
                decl.src.clone(),
                ContentEntry {
                    target_path: decl.src.clone(),
                    kind: stats.kind,
                    mode: decl.mode.as_deref().and_then(parse_mode),
                    owner: decl.owner.clone(),
                    group: decl.group.clone(),
                    conffile: decl.conffile,
                    stats,
                    debug_info_path: None,
                },
            );
            continue;
        }

        if abs_path.is_dir() && !abs_path.is_symlink() && !contents.contains_key(&decl.src) {
            let stats = FileStats::detect_from_filename(&abs_path)?;
            contents.insert(
                decl.src.clone(),
                ContentEntry {
                    target_path: decl.src.clone(),
                    kind: stats.kind,
                    mode: decl.mode.as_deref().and_then(parse_mode),
                    owner: decl.owner.clone(),
                    group: decl.group.clone(),
                    conffile: None,
                    stats,
                    debug_info_path: None,
                },
            );
        }

        for path in matches {
            let pkg_path = format!(
                "/{}",
                path.strip_prefix(basedir)
                    .unwrap_or(&path)
                    .to_string_lossy()
            );

            if contents.contains_key(&pkg_path) {
                continue;
            }

            let stats = FileStats::detect_from_filename(&path)?;
            contents.insert(
                pkg_path.clone(),
                ContentEntry {
                    target_path: pkg_path,
                    kind: stats.kind,
                    mode: decl.mode.as_deref().and_then(parse_mode),
                    owner: decl.owner.clone(),
                    group: decl.group.clone(),
                    conffile: decl.conffile,
                    stats,
                    debug_info_path: None,
                },
            );
        }
    }

    collect_py_cache_siblings(&mut contents, basedir, collect_py_cache_files)?;
    add_parent_directories(&mut contents, basedir)?;

    if architecture == Some("tools") {
        contents.retain(|path, _| !path.starts_with("/etc") && !path.starts_with("/var"));
    }

    Ok(contents.into_values().collect())
}

fn collect_descendants(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() && !file_type.is_symlink() {
                stack.push(path.clone());
            }
            out.push(path);
        }
    }

    out.sort();
    Ok(out)
}

/// For every included `.py` entry, add sibling `.pyc`/`.pyo` if present;
/// otherwise pull in `__pycache__/<stem>.cpython*.pyc` siblings.
fn collect_py_cache_siblings(
    contents: &mut BTreeMap<String, ContentEntry>,
    basedir: &Path,
    enabled: bool,
) -> Result<()> {
    if !enabled {
        return Ok(());
    }

    let py_paths: Vec<String> = contents
        .keys()
        .filter(|k| k.ends_with(".py"))
        .cloned()
        .collect();

    for path in py_paths {
        let mut py2_style = false;

        for suffix in ["c", "o"] {
            let candidate_pkg = format!("{}{}", path, suffix);
            let candidate_abs = basedir.join(candidate_pkg.trim_start_matches('/'));
            if !candidate_abs.is_file() {
                continue;
            }
            py2_style = true;
            if contents.contains_key(&candidate_pkg) {
                continue;
            }
            let stats = FileStats::detect_from_filename(&candidate_abs)?;
            contents.insert(
                candidate_pkg.clone(),
                ContentEntry {
                    target_path: candidate_pkg,
                    kind: stats.kind,
                    mode: None,
                    owner: None,
                    group: None,
                    conffile: None,
                    stats,
                    debug_info_path: None,
                },
            );
        }

        if py2_style {
            continue;
        }

        let parent = Path::new(&path).parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
        let stem = Path::new(&path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let cache_dir_pkg = format!("{}/__pycache__", parent);
        let cache_dir_abs = basedir.join(cache_dir_pkg.trim_start_matches('/'));

        if !cache_dir_abs.is_dir() {
            continue;
        }

        let pattern = cache_dir_abs.join(format!("{}.cpython*.pyc", stem));
        let matches: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| crate::error::BoltError::SpecSyntaxError(e.to_string()))?
            .filter_map(|e| e.ok())
            .collect();

        if matches.is_empty() {
            continue;
        }

        contents.entry(cache_dir_pkg.clone()).or_insert(ContentEntry {
            target_path: cache_dir_pkg,
            kind: FileKind::Dir,
            mode: None,
            owner: None,
            group: None,
            conffile: None,
            stats: FileStats::default_dir_stats(),
            debug_info_path: None,
        });

        for match_path in matches {
            let pkg_path = format!(
                "/{}",
                match_path.strip_prefix(basedir).unwrap_or(&match_path).to_string_lossy()
            );
            if contents.contains_key(&pkg_path) {
                continue;
            }
            let stats = FileStats::detect_from_filename(&match_path)?;
            contents.insert(
                pkg_path.clone(),
                ContentEntry {
                    target_path: pkg_path,
                    kind: stats.kind,
                    mode: None,
                    owner: None,
                    group: None,
                    conffile: None,
                    stats,
                    debug_info_path: None,
                },
            );
        }
    }

    Ok(())
}

/// Walk upward from every included path, adding ancestor directories that
/// exist on disk and aren't already present.
fn add_parent_directories(contents: &mut BTreeMap<String, ContentEntry>, basedir: &Path) -> Result<()> {
    let existing_paths: Vec<String> = contents.keys().cloned().collect();
    let mut to_add = Vec::new();

    for path in existing_paths {
        let mut current = path.clone();
        loop {
            let parent = Path::new(&current)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();

            if parent.is_empty() || parent == "/" {
                break;
            }

            if !contents.contains_key(&parent) && !to_add.iter().any(|(p, _): &(String, PathBuf)| p == &parent) {
                let abs = basedir.join(parent.trim_start_matches('/'));
                if abs.exists() {
                    to_add.push((parent.clone(), abs));
                }
            }

            current = parent;
        }
    }

    for (pkg_path, abs_path) in to_add {
        if contents.contains_key(&pkg_path) {
            continue;
        }
        let stats = FileStats::detect_from_filename(&abs_path)?;
        contents.insert(
            pkg_path.clone(),
            ContentEntry {
                target_path: pkg_path,
                kind: stats.kind,
                mode: None,
                owner: None,
                group: None,
                conffile: None,
                stats,
                debug_info_path: None,
            },
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brace_expand_simple() {
        let mut out = brace_expand("/usr/lib/{foo,bar}.so");
        out.sort();
        assert_eq!(out, vec!["/usr/lib/bar.so", "/usr/lib/foo.so"]);
    }

    #[test]
    fn brace_expand_no_braces_is_identity() {
        assert_eq!(brace_expand("/usr/lib/foo.so"), vec!["/usr/lib/foo.so"]);
    }

    #[test]
    fn expand_plain_file_and_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("usr/lib"))?;
        std::fs::write(dir.path().join("usr/lib/libfoo.so"), b"elfish")?;

        let decls = vec![
            ContentDeclaration {
                is_dir: true,
                src: "/usr/lib".to_string(),
                mode: None,
                owner: None,
                group: None,
                conffile: None,
            },
            ContentDeclaration {
                is_dir: false,
                src: "/usr/lib/libfoo.so".to_string(),
                mode: None,
                owner: None,
                group: None,
                conffile: None,
            },
        ];

        let entries = expand_content_spec(&decls, dir.path(), None, false)?;
        let paths: Vec<&str> = entries.iter().map(|e| e.target_path.as_str()).collect();
        assert!(paths.contains(&"/usr/lib"));
        assert!(paths.contains(&"/usr/lib/libfoo.so"));
        assert!(paths.contains(&"/usr"));

        Ok(())
    }

    #[test]
    fn tools_architecture_excludes_etc_and_var() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("etc"))?;
        std::fs::write(dir.path().join("etc/conf"), b"x")?;

        let decls = vec![ContentDeclaration {
            is_dir: false,
            src: "/etc/conf".to_string(),
            mode: None,
            owner: None,
            group: None,
            conffile: None,
        }];

        let entries = expand_content_spec(&decls, dir.path(), Some("tools"), false)?;
        assert!(entries.is_empty());

        Ok(())
    }

    #[test]
    fn conffile_tri_state_respects_explicit_false_under_etc() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("etc"))?;
        std::fs::write(dir.path().join("etc/foo"), b"x")?;
        std::fs::write(dir.path().join("etc/bar"), b"y")?;

        let decls = vec![
            ContentDeclaration {
                is_dir: false,
                src: "/etc/foo".to_string(),
                mode: None,
                owner: None,
                group: None,
                conffile: Some(false),
            },
            ContentDeclaration {
                is_dir: false,
                src: "/etc/bar".to_string(),
                mode: None,
                owner: None,
                group: None,
                conffile: None,
            },
        ];

        let entries = expand_content_spec(&decls, dir.path(), None, false)?;
        let foo = entries.iter().find(|e| e.target_path == "/etc/foo").unwrap();
        let bar = entries.iter().find(|e| e.target_path == "/etc/bar").unwrap();

        assert!(!foo.is_conffile(), "explicit conffile=false under /etc/ must not qualify");
        assert!(bar.is_conffile(), "unset conffile under /etc/ defaults to true");

        Ok(())
    }

    #[test]
    fn conffile_explicit_true_outside_etc_qualifies() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("opt"))?;
        std::fs::write(dir.path().join("opt/conf"), b"x")?;

        let decls = vec![ContentDeclaration {
            is_dir: false,
            src: "/opt/conf".to_string(),
            mode: None,
            owner: None,
            group: None,
            conffile: Some(true),
        }];

        let entries = expand_content_spec(&decls, dir.path(), None, false)?;
        assert!(entries[0].is_conffile());

        Ok(())
    }
}
