// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debug symbol splitting: peel `.debug` information off installed ELF
binaries and register it under `/usr/lib/debug`.

Grounded on `binarypackage.py`'s `strip_debug_symbols_and_unarm_rpath`.
Build-id-keyed binaries get `.build-id/XX/YYYY….debug`; binaries without a
build-id fall back to a debuglink named after their own install path.
[`dbg_package_contents`] then derives the sibling `-dbg` package's content
list from the split results, for a caller to assemble as an ordinary
[`crate::package_writer::write_package`] call under a `<name>-dbg`
[`crate::specfile::BinaryPackageSpec`].
*/

use {
    crate::{
        content::ContentEntry,
        error::{BoltError, Result},
        filestats::{FileKind, FileStats},
    },
    std::{
        collections::{BTreeMap, HashSet},
        os::unix::fs::PermissionsExt,
        path::{Path, PathBuf},
        process::{Command, Stdio},
    },
};

fn find_executable(candidates: &[&str]) -> Result<PathBuf> {
    let path = std::env::var_os("PATH").unwrap_or_default();
    for name in candidates {
        for dir in std::env::split_paths(&path) {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    Err(BoltError::ToolNotFound(candidates.join(" or ")))
}

fn run(command: &mut Command) -> Result<()> {
    let label = format!("{:?}", command);
    let status = command
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()?;

    if !status.success() {
        return Err(BoltError::ExternalCommandFailed {
            command: label,
            message: format!("exited with status {}", status),
        });
    }

    Ok(())
}

/// Strip debug symbols from every unstripped ELF binary under `basedir`,
/// clear its RPATH, and set `debug_info_path` on its [`ContentEntry`].
///
/// `host_type` selects a cross `objcopy` (e.g. `aarch64-bolt-linux-musl`),
/// falling back to the unprefixed binary. `install_prefix` is the package's
/// installation root (normally empty, `/usr` for the `tools` architecture),
/// used to build the `/usr/lib/debug/…` path that ships inside the package.
pub fn strip_debug_symbols(
    contents: &mut [ContentEntry],
    basedir: &Path,
    host_type: &str,
    install_prefix: &str,
) -> Result<()> {
    let objcopy = find_executable(&[&format!("{}-objcopy", host_type), "objcopy"])?;
    let chrpath = find_executable(&["chrpath"]).ok();

    let mut already_stripped: HashSet<(u64, u64)> = HashSet::new();
    let install_prefix = install_prefix.trim_start_matches('/');

    for entry in contents.iter_mut() {
        if entry.kind != FileKind::File || !entry.stats.is_elf_binary() {
            continue;
        }
        if entry.stats.is_stripped {
            continue;
        }
        if entry.stats.machine == "no machine" {
            continue;
        }

        let key = (entry.stats.dev, entry.stats.ino);
        if !already_stripped.insert(key) {
            continue;
        }

        let src_path = basedir.join(entry.target_path.trim_start_matches('/'));

        let pkg_path = if let Some(build_id) = &entry.stats.build_id {
            format!(
                "/{}/lib/debug/.build-id/{}/{}.debug",
                install_prefix,
                &build_id[0..2],
                &build_id[2..]
            )
        } else {
            format!(
                "/{}/lib/debug{}.debug",
                install_prefix, entry.target_path
            )
        };
        let pkg_path = pkg_path.replace("//", "/");

        let dbg_path = basedir.join(pkg_path.trim_start_matches('/'));

        if let Some(parent) = dbg_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if entry.stats.mode & 0o200 == 0 {
            std::fs::set_permissions(&src_path, std::fs::Permissions::from_mode(entry.stats.mode | 0o200))?;
        }

        if entry.stats.build_id.is_some() {
            run(Command::new(&objcopy).args(["--only-keep-debug"]).arg(&src_path).arg(&dbg_path))?;
            run(Command::new(&objcopy).arg("--strip-unneeded").arg(&src_path))?;
        } else {
            let dbg_file = dbg_path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_default();
            let work_dir = src_path.parent().unwrap_or(basedir);
            let dbg_file_path = work_dir.join(&dbg_file);

            run(Command::new(&objcopy)
                .arg("--only-keep-debug")
                .arg(&src_path)
                .arg(&dbg_file_path))?;
            run(Command::new(&objcopy).arg("--strip-unneeded").arg(&src_path))?;
            run(Command::new(&objcopy)
                .arg("--add-gnu-debuglink")
                .arg(&dbg_file_path)
                .arg(&src_path))?;

            if dbg_file_path != dbg_path {
                std::fs::rename(&dbg_file_path, &dbg_path)?;
            }
        }

        if let Some(chrpath) = &chrpath {
            // Best-effort: a binary with no RPATH to begin with exits non-zero.
            let _ = Command::new(chrpath)
                .args(["-c"])
                .arg(&src_path)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }

        entry.stats = FileStats::detect_from_filename(&src_path)?;
        entry.debug_info_path = Some(pkg_path);
    }

    Ok(())
}

/// The immediate parent and grandparent of `path`, most specific first,
/// stopping at the filesystem root.
fn enclosing_dirs(path: &str) -> Vec<String> {
    let parent = Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned());
    let grandparent = parent
        .as_deref()
        .and_then(|p| Path::new(p).parent())
        .map(|p| p.to_string_lossy().into_owned());

    [parent, grandparent]
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty() && p != "/")
        .collect()
}

/// Derive the `-dbg` sibling package's content list from a primary package's
/// entries after [`strip_debug_symbols`] has run: every debug-info companion
/// path, plus its two enclosing debug directories (mode 0755, owner root).
///
/// `basedir` is the same staging root passed to `strip_debug_symbols`, where
/// the companion files were written.
pub fn dbg_package_contents(contents: &[ContentEntry], basedir: &Path) -> Result<Vec<ContentEntry>> {
    let mut out: BTreeMap<String, ContentEntry> = BTreeMap::new();

    for entry in contents {
        let dbg_path = match &entry.debug_info_path {
            Some(p) => p,
            None => continue,
        };

        if !out.contains_key(dbg_path) {
            let abs_path = basedir.join(dbg_path.trim_start_matches('/'));
            let stats = FileStats::detect_from_filename(&abs_path)?;
            out.insert(
                dbg_path.clone(),
                ContentEntry {
                    target_path: dbg_path.clone(),
                    kind: FileKind::File,
                    mode: None,
                    owner: None,
                    group: None,
                    conffile: None,
                    stats,
                    debug_info_path: None,
                },
            );
        }

        for dir in enclosing_dirs(dbg_path) {
            out.entry(dir.clone()).or_insert_with(|| ContentEntry {
                target_path: dir,
                kind: FileKind::Dir,
                mode: Some(0o755),
                owner: Some("root".to_string()),
                group: Some("root".to_string()),
                conffile: None,
                stats: FileStats::default_dir_stats(),
                debug_info_path: None,
            });
        }
    }

    Ok(out.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_id_path_layout() {
        let build_id = "deadbeefcafebabe";
        let pkg_path = format!(
            "/usr/lib/debug/.build-id/{}/{}.debug",
            &build_id[0..2],
            &build_id[2..]
        );
        assert_eq!(
            pkg_path,
            "/usr/lib/debug/.build-id/de/adbeefcafebabe.debug"
        );
    }

    #[test]
    fn missing_tool_is_reported() {
        let err = find_executable(&["definitely-not-a-real-binary-xyz"]).unwrap_err();
        assert!(matches!(err, BoltError::ToolNotFound(_)));
    }

    #[test]
    fn enclosing_dirs_build_id_layout() {
        let dirs = enclosing_dirs("/usr/lib/debug/.build-id/de/adbeefcafebabe.debug");
        assert_eq!(
            dirs,
            vec!["/usr/lib/debug/.build-id/de", "/usr/lib/debug/.build-id"]
        );
    }

    #[test]
    fn enclosing_dirs_debuglink_layout() {
        let dirs = enclosing_dirs("/usr/lib/debug/usr/bin/hello.debug");
        assert_eq!(dirs, vec!["/usr/lib/debug/usr/bin", "/usr/lib/debug/usr"]);
    }

    #[test]
    fn dbg_package_contents_collects_companion_and_enclosing_dirs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let companion_rel = "usr/lib/debug/.build-id/de/adbeefcafebabe.debug";
        std::fs::create_dir_all(dir.path().join("usr/lib/debug/.build-id/de"))?;
        std::fs::write(dir.path().join(companion_rel), b"debuginfo")?;

        let mut entry = ContentEntry {
            target_path: "/usr/bin/hello".to_string(),
            kind: FileKind::File,
            mode: None,
            owner: None,
            group: None,
            conffile: None,
            stats: FileStats::default_dir_stats(),
            debug_info_path: Some(format!("/{}", companion_rel)),
        };
        entry.stats.kind = FileKind::File;

        let dbg_contents = dbg_package_contents(&[entry], dir.path())?;
        let paths: Vec<&str> = dbg_contents.iter().map(|e| e.target_path.as_str()).collect();

        assert!(paths.contains(&"/usr/lib/debug/.build-id/de/adbeefcafebabe.debug"));
        assert!(paths.contains(&"/usr/lib/debug/.build-id/de"));
        assert!(paths.contains(&"/usr/lib/debug/.build-id"));
        assert_eq!(dbg_contents.len(), 3);

        let dir_entry = dbg_contents
            .iter()
            .find(|e| e.target_path == "/usr/lib/debug/.build-id")
            .unwrap();
        assert_eq!(dir_entry.kind, FileKind::Dir);
        assert_eq!(dir_entry.mode, Some(0o755));
        assert_eq!(dir_entry.owner.as_deref(), Some("root"));

        Ok(())
    }
}
