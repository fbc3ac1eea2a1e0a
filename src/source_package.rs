// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The runtime source package: unpacking, patching and running build rules.

Operates on the typed tree parsed by [`crate::specfile`]. Grounded on
`sourcepackage.py`'s `unpack`/`patch`/`run_action` and `basepackage.py`'s
environment handling, restructured around `std::process::Command` instead
of a bare `subprocess.run`.
*/

use {
    crate::{
        archive,
        error::{BoltError, Result},
        io::Compression,
        specfile::{PatchFileSpec, SourceFileSpec, SourceSpec},
    },
    once_cell::sync::Lazy,
    regex::Regex,
    std::{
        collections::HashMap,
        path::{Path, PathBuf},
        process::{Command, Stdio},
    },
};

/// Prefix shared by every environment variable this crate passes through or
/// synthesizes for a build rule (`BOLT_SOURCE_DIR`, `BOLT_PARALLEL_JOBS`, …).
pub const BUILD_PREFIX: &str = "BOLT";

static DEBDIFF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?\.debdiff)\.(?:gz|xz|bz2)$").expect("static regex is valid"));

/// Where to look up and place a package's source archives on disk.
pub struct SourcePackage<'a> {
    spec: &'a SourceSpec,
    version: String,
    /// `<archive_root>/<name>/<version>/<file>` local candidate lookup root.
    archive_root: PathBuf,
}

impl<'a> SourcePackage<'a> {
    pub fn new(spec: &'a SourceSpec, version: impl Into<String>, archive_root: impl Into<PathBuf>) -> Self {
        Self {
            spec,
            version: version.into(),
            archive_root: archive_root.into(),
        }
    }

    fn local_candidate(&self, source: &SourceFileSpec) -> PathBuf {
        self.archive_root
            .join(&self.spec.name)
            .join(&self.version)
            .join(&source.src)
    }

    /// Unpack every declared source into `source_dir`, consulting the local
    /// archive cache before falling back to `locate`.
    ///
    /// `locate` resolves a source whose local candidate is absent or whose
    /// checksum mismatches, typically backed by [`crate::download::SourceCache`].
    pub fn unpack(
        &self,
        source_dir: &Path,
        mut locate: impl FnMut(&SourceFileSpec) -> Result<PathBuf>,
    ) -> Result<()> {
        for source in &self.spec.sources {
            let archive_file = self.locate_archive_file(source, &mut locate)?;

            let dest_dir = source_dir.join(&source.subdir);
            std::fs::create_dir_all(&dest_dir)?;

            let filename = archive_file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("");

            if let Some(caps) = DEBDIFF_RE.captures(filename) {
                let out_name = &caps[1];
                let compression = Compression::from_filename(filename);
                let data = std::fs::read(&archive_file)?;
                let mut decompressed =
                    crate::io::read_decompressed(Box::new(std::io::Cursor::new(data)), compression)?;
                let mut out = Vec::new();
                std::io::Read::read_to_end(&mut decompressed, &mut out)?;
                std::fs::write(dest_dir.join(out_name), out)?;
            } else {
                let compression = Compression::from_filename(filename);
                let fh = std::fs::File::open(&archive_file)?;
                archive::unpack_compressed_tar(fh, compression, &dest_dir, 1)?;
            }
        }

        Ok(())
    }

    fn locate_archive_file(
        &self,
        source: &SourceFileSpec,
        locate: &mut impl FnMut(&SourceFileSpec) -> Result<PathBuf>,
    ) -> Result<PathBuf> {
        let candidate = self.local_candidate(source);

        if candidate.is_file() {
            let digest = crate::io::ContentDigest::compute(
                crate::io::ChecksumType::Sha256,
                &std::fs::read(&candidate)?,
            );
            if digest.digest_hex().eq_ignore_ascii_case(&source.sha256) {
                return Ok(candidate);
            }
        }

        locate(source)
    }

    /// Apply every declared patch in order, via an external `patch` binary.
    pub fn patch(&self, source_dir: &Path) -> Result<()> {
        for patch in &self.spec.patches {
            self.apply_one_patch(source_dir, patch)?;
        }
        Ok(())
    }

    fn apply_one_patch(&self, source_dir: &Path, patch: &PatchFileSpec) -> Result<()> {
        let patch_path = if Path::new(&patch.src).is_absolute() {
            PathBuf::from(&patch.src)
        } else {
            source_dir.join(&patch.src)
        };

        let target_dir = if patch.subdir.is_empty() {
            source_dir.to_path_buf()
        } else {
            source_dir.join(&patch.subdir)
        };

        let status = Command::new("patch")
            .arg("-f")
            .arg(format!("-p{}", patch.strip))
            .arg("-d")
            .arg(&target_dir)
            .arg("-i")
            .arg(&patch_path)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;

        if !status.success() {
            return Err(BoltError::PatchFailed(patch.src.clone()));
        }

        Ok(())
    }

    /// Run one of the four lifecycle rules via `/bin/sh -e -x -s`.
    ///
    /// `dirs` supplies `BOLT_SOURCE_DIR`/`BOLT_BUILD_DIR`/`BOLT_INSTALL_DIR`;
    /// `helpers` is the fixed shell preamble (arch detection, python
    /// bytecode helpers, …) prepended to the rule body.
    pub fn run_action(&self, action: &str, dirs: &BuildDirs, helpers: &str) -> Result<()> {
        let body = match action {
            "prepare" => &self.spec.rules.prepare,
            "build" => &self.spec.rules.build,
            "install" => &self.spec.rules.install,
            "clean" => &self.spec.rules.clean,
            other => {
                return Err(BoltError::RuleFailed(format!("invalid action '{}'", other)))
            }
        };

        if body.trim().is_empty() {
            return Ok(());
        }

        let script = format!("{}\n{}", helpers, body);
        let env = sanitized_env(dirs);

        let mut child = Command::new("/bin/sh")
            .args(["-e", "-x", "-s"])
            .env_clear()
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;

        {
            let mut stdin = child.stdin.take().expect("stdin was piped");
            std::io::Write::write_all(&mut stdin, script.as_bytes())?;
        }

        let status = child.wait()?;
        if !status.success() {
            return Err(BoltError::RuleFailed(action.to_string()));
        }

        Ok(())
    }
}

/// A quilt-style `patches/series` file: an ordered list of patch names, each
/// optionally trailing a `-pN` strip-level override.
///
/// Grounded on `deb2bolt/quiltpatchseries.py`'s `QuiltPatchSeries`, used by
/// the Debian importer to turn an upstream `debian/patches/series` into the
/// `<patches><patchset>` block of a generated specfile.
#[derive(Clone, Debug, Default)]
pub struct PatchSeries {
    patches: Vec<String>,
}

static SERIES_STRIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+-p\d+\s*$").expect("static regex is valid"));

impl PatchSeries {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.patches.iter().map(|s| s.as_str())
    }

    /// Read a `series` file, skipping blank lines and `#`-comments.
    pub fn read_series(series_file: &Path) -> Result<Self> {
        if !series_file.is_file() {
            return Err(BoltError::NotFound(series_file.display().to_string()));
        }

        let text = std::fs::read_to_string(series_file)?;
        let mut patches = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            patches.push(line.to_string());
        }

        Ok(Self { patches })
    }

    /// Render as a `<patches><patchset subdir="sources">…</patchset></patches>`
    /// fragment, stripping any trailing `-pN` strip-level override (the
    /// generated specfile always strips at level 1).
    pub fn as_xml(&self) -> String {
        if self.patches.is_empty() {
            return String::new();
        }

        let mut buf = String::from("<patches>\n  <patchset subdir=\"sources\">\n");
        for patch in &self.patches {
            let name = SERIES_STRIP_RE.replace(patch, "");
            buf.push_str(&format!("    <file src=\"patches/{}\"/>\n", name));
        }
        buf.push_str("  </patchset>\n</patches>");

        buf
    }
}

/// The three build-tree directories exposed to rule scripts.
pub struct BuildDirs {
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub install_dir: PathBuf,
}

fn num_cpus() -> usize {
    std::fs::read_to_string("/proc/cpuinfo")
        .map(|text| {
            text.lines()
                .filter(|line| line.trim_start().starts_with("processor"))
                .count()
        })
        .unwrap_or(1)
        .max(1)
}

/// Build the sanitized environment passed to a rule script: `PATH`, user
/// identity, build flags, every `<BUILD_PREFIX>_*` variable from the outer
/// environment, and the build-tree directories.
fn sanitized_env(dirs: &BuildDirs) -> HashMap<String, String> {
    let mut env = HashMap::new();

    for (key, value) in std::env::vars() {
        if matches!(
            key.as_str(),
            "BOLT_WORK_DIR" | "BOLT_SOURCE_DIR" | "BOLT_BUILD_DIR" | "BOLT_INSTALL_DIR"
        ) {
            continue;
        }
        if key.starts_with(&format!("{}_", BUILD_PREFIX)) || matches!(key.as_str(), "PATH" | "USER" | "USERNAME")
        {
            env.insert(key, value);
        }
    }

    env.entry("PATH".to_string())
        .or_insert_with(|| "/bin:/sbin:/usr/bin:/usr/sbin:/usr/local/bin".to_string());

    if std::path::Path::new("/etc/debian_version").exists() {
        env.insert("CFLAGS".to_string(), "-g -O2".to_string());
    } else if which("gcc").is_some() {
        env.insert(
            "CFLAGS".to_string(),
            "-g -O2 -fstack-protector-strong -Wformat -Werror=format-security".to_string(),
        );
        env.insert(
            "CXXFLAGS".to_string(),
            "-g -O2 -fstack-protector-strong -Wformat -Werror=format-security".to_string(),
        );
        env.insert(
            "CPPFLAGS".to_string(),
            "-Wdate-time -D_FORTIFY_SOURCE=2".to_string(),
        );
        env.insert("LDFLAGS".to_string(), "-Wl,-z,relro".to_string());
    }

    let parallel_jobs = ((num_cpus() as f64) * 1.5).round() as u64;
    env.insert(
        format!("{}_PARALLEL_JOBS", BUILD_PREFIX),
        parallel_jobs.to_string(),
    );
    env.insert(
        format!("{}_SOURCE_DIR", BUILD_PREFIX),
        dirs.source_dir.to_string_lossy().into_owned(),
    );
    env.insert(
        format!("{}_BUILD_DIR", BUILD_PREFIX),
        dirs.build_dir.to_string_lossy().into_owned(),
    );
    env.insert(
        format!("{}_INSTALL_DIR", BUILD_PREFIX),
        dirs.install_dir.to_string_lossy().into_owned(),
    );

    env
}

fn which(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specfile::{PackageDescription, Rules};

    fn sample_spec() -> SourceSpec {
        SourceSpec {
            name: "libfoo".to_string(),
            repo: None,
            description: PackageDescription::default(),
            build_for: None,
            supported_on: None,
            requires: Default::default(),
            patches: vec![],
            sources: vec![SourceFileSpec {
                src: "libfoo-1.0.tar.xz".to_string(),
                subdir: String::new(),
                sha256: "deadbeef".to_string(),
            }],
            rules: Rules {
                build: "make".to_string(),
                ..Default::default()
            },
            skip: None,
        }
    }

    #[test]
    fn local_candidate_path() {
        let spec = sample_spec();
        let pkg = SourcePackage::new(&spec, "1.0-1", "/archive");
        let candidate = pkg.local_candidate(&spec.sources[0]);
        assert_eq!(candidate, PathBuf::from("/archive/libfoo/1.0-1/libfoo-1.0.tar.xz"));
    }

    #[test]
    fn sanitized_env_carries_build_dirs() {
        let dirs = BuildDirs {
            source_dir: PathBuf::from("/tmp/src"),
            build_dir: PathBuf::from("/tmp/build"),
            install_dir: PathBuf::from("/tmp/install"),
        };
        let env = sanitized_env(&dirs);
        assert_eq!(env.get("BOLT_SOURCE_DIR").unwrap(), "/tmp/src");
        assert!(env.contains_key("BOLT_PARALLEL_JOBS"));
        assert!(env.contains_key("PATH"));
    }

    #[test]
    fn empty_rule_is_a_noop() -> Result<()> {
        let mut spec = sample_spec();
        spec.rules.clean = String::new();
        let pkg = SourcePackage::new(&spec, "1.0-1", "/archive");
        let dirs = BuildDirs {
            source_dir: PathBuf::from("/tmp/src"),
            build_dir: PathBuf::from("/tmp/build"),
            install_dir: PathBuf::from("/tmp/install"),
        };
        pkg.run_action("clean", &dirs, "")?;
        Ok(())
    }

    #[test]
    fn patch_series_skips_blank_and_comment_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let series_path = dir.path().join("series");
        std::fs::write(
            &series_path,
            "0001-fix.patch -p1\n\n# a comment\n0002-other.patch\n",
        )?;

        let series = PatchSeries::read_series(&series_path)?;
        assert_eq!(series.len(), 2);
        assert_eq!(series.iter().collect::<Vec<_>>(), vec!["0001-fix.patch -p1", "0002-other.patch"]);

        Ok(())
    }

    #[test]
    fn patch_series_xml_strips_strip_level_suffix() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let series_path = dir.path().join("series");
        std::fs::write(&series_path, "0001-fix.patch -p1\n")?;

        let series = PatchSeries::read_series(&series_path)?;
        let xml = series.as_xml();
        assert!(xml.contains(r#"<file src="patches/0001-fix.patch"/>"#));

        Ok(())
    }

    #[test]
    fn empty_patch_series_renders_no_xml() {
        assert_eq!(PatchSeries::default().as_xml(), "");
    }
}
