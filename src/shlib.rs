// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Shared-library dependency resolution.

Grounded on `shlibcache.py`'s `ShlibCache` (an `ldconfig -p` snapshot,
overlaid with the libraries produced by packages built in the same run) and
`binarypackage.py`'s `shlib_deps`/`_find_and_register_dependency`, which walk
each binary's `NEEDED` entries via `objdump -p` and turn them into `Depends`
constraints.
*/

use {
    crate::{
        content::ContentEntry,
        error::{BoltError, Result},
        filestats::FileKind,
    },
    once_cell::sync::Lazy,
    regex::Regex,
    std::{
        collections::HashMap,
        path::{Path, PathBuf},
        process::{Command, Stdio},
    },
};

static LDCONFIG_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\S+) \((.*)\) => (\S+)").expect("static regex is valid"));
static NEEDED_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*NEEDED\s+(\S+)").expect("static regex is valid"));
static SHARED_OBJECT_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:lib|ld|ld64).*\.so.*$").expect("static regex is valid"));

fn find_executable(candidates: &[String]) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for name in candidates {
        for dir in std::env::split_paths(&path) {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// A single shared object known to the cache, with the package that owns it
/// once resolved.
#[derive(Clone, Debug)]
pub struct SharedObject {
    pub lib_path: String,
    pub pkg_name: Option<String>,
    pub pkg_version: Option<String>,
    pub word_size: Option<u32>,
}

impl SharedObject {
    fn satisfies(&self, word_size: Option<u32>) -> bool {
        match (word_size, self.word_size) {
            (Some(wanted), Some(got)) => wanted == got,
            _ => true,
        }
    }
}

/// Snapshot of every shared library visible to the linker, seeded from
/// `ldconfig -p` and extended with the libraries produced by sibling
/// packages in the same build via [`ShlibCache::overlay_package`].
pub struct ShlibCache {
    prefixes: Vec<String>,
    map: HashMap<String, Vec<SharedObject>>,
    have_ldconfig: bool,
}

impl ShlibCache {
    pub fn new(prefix: &str) -> Self {
        let mut cache = Self {
            prefixes: vec![prefix.to_string()],
            map: HashMap::new(),
            have_ldconfig: false,
        };

        if let Some(ldconfig) = find_executable(&["ldconfig".to_string()]) {
            if let Ok(output) = Command::new(&ldconfig).arg("-p").output() {
                if output.status.success() {
                    cache.have_ldconfig = true;
                    let text = String::from_utf8_lossy(&output.stdout);
                    for line in text.lines() {
                        let Some(caps) = LDCONFIG_LINE_RE.captures(line) else {
                            continue;
                        };
                        let flags = &caps[2];
                        if flags.contains("hwcap") {
                            continue;
                        }

                        let lib_name = caps[1].to_string();
                        let lib_path = caps[3].to_string();

                        cache.map.entry(lib_name).or_default().push(SharedObject {
                            lib_path,
                            pkg_name: None,
                            pkg_version: None,
                            word_size: None,
                        });
                    }
                }
            }
        }

        cache
    }

    /// Resolve `lib_name` (a bare name or an absolute path) against the
    /// cache, consulting `fallback` prefix-relative paths when `ldconfig`
    /// metadata wasn't available.
    pub fn get(&self, lib_name: &str, fallback: Option<&str>) -> Vec<SharedObject> {
        let (bare_name, abs_path) = if Path::new(lib_name).is_absolute() {
            (
                Path::new(lib_name)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                Some(lib_name.to_string()),
            )
        } else {
            (lib_name.to_string(), None)
        };

        if self.have_ldconfig {
            return self.map.get(&bare_name).cloned().unwrap_or_default();
        }

        if let Some(abs_path) = abs_path {
            return self
                .find_on_disk(&bare_name, fallback)
                .into_iter()
                .filter(|obj| obj.lib_path == abs_path)
                .collect();
        }

        if let Some(found) = self.map.get(&bare_name) {
            return found.clone();
        }

        self.find_on_disk(&bare_name, fallback)
    }

    fn find_on_disk(&self, lib_name: &str, fallback: Option<&str>) -> Vec<SharedObject> {
        let mut search_dirs: Vec<String> = self.prefixes.iter().map(|p| format!("{}/lib", p)).collect();

        if let Some(fallback) = fallback {
            if !self.prefixes.iter().any(|p| p == fallback) {
                search_dirs.push(format!("{}/lib", fallback));
            }
        }

        let mut found = Vec::new();
        for dir in search_dirs {
            let candidate = Path::new(&dir).join(lib_name);
            if candidate.is_file() {
                found.push(SharedObject {
                    lib_path: candidate.to_string_lossy().into_owned(),
                    pkg_name: None,
                    pkg_version: None,
                    word_size: None,
                });
            }
        }

        found
    }

    /// Register every `.so`-bearing entry of a freshly-built package as a
    /// candidate dependency target, superseding any prior entry of the
    /// same word size.
    pub fn overlay_package(
        &mut self,
        pkg_name: &str,
        pkg_version: &str,
        contents: &[ContentEntry],
        basedir: &Path,
    ) -> Result<()> {
        for entry in contents {
            let lib_name = Path::new(&entry.target_path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            if !SHARED_OBJECT_NAME_RE.is_match(&lib_name) {
                continue;
            }

            let stats = if entry.kind == FileKind::Symlink {
                let abs_path = basedir.join(entry.target_path.trim_start_matches('/'));
                if !abs_path.exists() {
                    continue;
                }
                let real_path = std::fs::canonicalize(&abs_path)?;
                crate::filestats::FileStats::detect_from_filename(&real_path)?
            } else {
                entry.stats.clone()
            };

            if !stats.is_dynamically_linked {
                continue;
            }

            let word_size = stats.elf_class.map(|c| c.word_size());
            let new_obj = SharedObject {
                lib_path: entry.target_path.clone(),
                pkg_name: Some(pkg_name.to_string()),
                pkg_version: Some(pkg_version.to_string()),
                word_size,
            };

            let slot = self.map.entry(lib_name).or_default();
            if let Some(existing) = slot.iter_mut().find(|obj| obj.word_size == word_size) {
                *existing = new_obj;
            } else {
                slot.push(new_obj);
            }
        }

        Ok(())
    }
}

fn register_dependency(
    lib_name: &str,
    shlib_cache: &ShlibCache,
    sibling_packages: &[(String, &[ContentEntry])],
    package_name: &str,
    package_version: &str,
    word_size: Option<u32>,
    hard_relation: bool,
    fallback: Option<&str>,
    requires: &mut Vec<(String, String)>,
) -> Result<()> {
    let relation = if hard_relation { "=" } else { ">=" };
    let mut found = false;

    for shared_obj in shlib_cache.get(lib_name, fallback) {
        if !shared_obj.satisfies(word_size) {
            continue;
        }

        let (Some(pkg_name), Some(version)) = (&shared_obj.pkg_name, &shared_obj.pkg_version) else {
            continue;
        };

        if pkg_name == package_name {
            found = true;
            break;
        }

        requires.push((pkg_name.clone(), format!("{} {}", relation, version)));
        found = true;
    }

    if !found {
        for (sibling_name, sibling_contents) in sibling_packages {
            if !sibling_contents.iter().any(|e| e.target_path == lib_name) {
                continue;
            }

            found = true;
            if sibling_name != package_name {
                requires.push((sibling_name.clone(), format!("{} {}", relation, package_version)));
            }
            break;
        }
    }

    if !found {
        return Err(BoltError::UnmetDependency(format!(
            "'{}' dependency '{}' not found in any installed or built package",
            package_name, lib_name
        )));
    }

    Ok(())
}

/// Walk every ELF binary and `.so` symlink in `contents`, resolving its
/// dynamic dependencies against `shlib_cache` and the other packages built
/// alongside it. Returns `(package, version constraint)` pairs to merge into
/// the owning package's `Depends`.
pub fn shlib_deps(
    contents: &[ContentEntry],
    basedir: &Path,
    host_type: &str,
    package_name: &str,
    package_version: &str,
    shlib_cache: &ShlibCache,
    sibling_packages: &[(String, &[ContentEntry])],
) -> Result<Vec<(String, String)>> {
    let objdump = find_executable(&[format!("{}-objdump", host_type), "objdump".to_string()])
        .ok_or_else(|| BoltError::ToolNotFound(format!("{}-objdump or objdump", host_type)))?;

    let mut requires = Vec::new();

    for entry in contents {
        if entry.kind == FileKind::Symlink && entry.target_path.ends_with(".so") {
            let Some(link_target) = &entry.stats.link_target else {
                continue;
            };

            let (resolved, fallback) = if Path::new(link_target).is_absolute() {
                (link_target.clone(), Some("/usr"))
            } else {
                let parent = Path::new(&entry.target_path)
                    .parent()
                    .unwrap_or_else(|| Path::new("/"));
                (
                    parent.join(link_target).to_string_lossy().into_owned(),
                    None,
                )
            };

            register_dependency(
                &resolved,
                shlib_cache,
                sibling_packages,
                package_name,
                package_version,
                None,
                true,
                fallback,
                &mut requires,
            )?;
            continue;
        }

        if entry.kind != FileKind::File || !entry.stats.is_elf_binary() {
            continue;
        }

        let abs_path = basedir.join(entry.target_path.trim_start_matches('/'));
        let word_size = entry.stats.elf_class.map(|c| c.word_size());

        let output = Command::new(&objdump)
            .arg("-p")
            .arg(&abs_path)
            .stderr(Stdio::null())
            .output()?;

        let text = String::from_utf8_lossy(&output.stdout);
        for line in text.lines() {
            let Some(caps) = NEEDED_LINE_RE.captures(line) else {
                continue;
            };
            let lib_name = &caps[1];

            register_dependency(
                lib_name,
                shlib_cache,
                sibling_packages,
                package_name,
                package_version,
                word_size,
                false,
                None,
                &mut requires,
            )?;
        }
    }

    Ok(requires)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_object_name_regex() {
        assert!(SHARED_OBJECT_NAME_RE.is_match("libc.so.6"));
        assert!(SHARED_OBJECT_NAME_RE.is_match("ld-linux-x86-64.so.2"));
        assert!(!SHARED_OBJECT_NAME_RE.is_match("libfoo.a"));
    }

    #[test]
    fn ldconfig_line_regex() {
        let line = "        libc.so.6 (libc6,x86-64) => /lib/x86_64-linux-gnu/libc.so.6";
        let caps = LDCONFIG_LINE_RE.captures(line).unwrap();
        assert_eq!(&caps[1], "libc.so.6");
        assert_eq!(&caps[3], "/lib/x86_64-linux-gnu/libc.so.6");
    }

    #[test]
    fn empty_cache_without_ldconfig_returns_empty() {
        let cache = ShlibCache {
            prefixes: vec!["/usr".to_string()],
            map: HashMap::new(),
            have_ldconfig: false,
        };
        assert!(cache.get("libdoesnotexist.so.1", None).is_empty());
    }
}
