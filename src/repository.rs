// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Repository indexing: scan a pool directory of `.bolt` files into a
signed `Packages.gz`.

Grounded directly on `repoindexer.py`'s `RepoIndexer`: incremental
load/prune/rescan against an existing index, gzip output via a fixed-header
writer for determinism, and a Signify/minisign envelope produced by
shelling out to an external `usign` binary exactly as the original does.
*/

use {
    crate::{
        archive::{self, extract_control_file_from_tar},
        control::{ControlFile, ControlParagraph},
        error::{BoltError, Result},
        version::Version,
    },
    sha2::Digest,
    slog::{info, Logger},
    std::{
        collections::BTreeMap,
        io::Write,
        path::{Path, PathBuf},
        process::{Command, Stdio},
    },
};

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn sha256_hex_of_file(path: &Path) -> Result<String> {
    Ok(sha256_hex(&std::fs::read(path)?))
}

/// Incrementally maintains a pool directory's `Packages.gz` index.
pub struct RepositoryIndexer {
    repo_dir: PathBuf,
    force_full: bool,
    sign_with: Option<String>,
}

impl RepositoryIndexer {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Result<Self> {
        let repo_dir = repo_dir.into();
        if !repo_dir.is_dir() {
            return Err(BoltError::NotFound(format!(
                "path '{}' does not exist or is not a directory",
                repo_dir.display()
            )));
        }

        Ok(Self {
            repo_dir,
            force_full: false,
            sign_with: None,
        })
    }

    pub fn force_full(mut self, value: bool) -> Self {
        self.force_full = value;
        self
    }

    pub fn sign_with(mut self, key_path: impl Into<String>) -> Self {
        self.sign_with = Some(key_path.into());
        self
    }

    /// Rescan the pool and rewrite `Packages.gz` (and, if configured,
    /// `Packages.sig`/`InPackages.gz`).
    pub fn update_package_index(&self, logger: &Logger) -> Result<()> {
        let (mut index, current_digest) = if self.force_full {
            (BTreeMap::new(), None)
        } else {
            self.load_package_index()?
        };

        for meta_data in self.scan(&index, logger)? {
            let name = meta_data
                .field_str("Package")
                .ok_or_else(|| BoltError::ControlRequiredFieldMissing("Package".to_string()))?
                .to_string();
            let version = meta_data
                .field_str("Version")
                .ok_or_else(|| BoltError::ControlRequiredFieldMissing("Version".to_string()))?
                .to_string();

            index
                .entry(name)
                .or_insert_with(BTreeMap::new)
                .entry(version)
                .or_insert(meta_data);
        }

        if !self.force_full {
            self.prune_package_index(&mut index)?;
        }

        self.store_package_index(&index, current_digest.as_deref())
    }

    fn load_package_index(
        &self,
    ) -> Result<(BTreeMap<String, BTreeMap<String, ControlParagraph<'static>>>, Option<String>)> {
        let packages_gz = self.repo_dir.join("Packages.gz");
        if !packages_gz.exists() {
            return Ok((BTreeMap::new(), None));
        }

        let compressed = std::fs::read(&packages_gz)?;
        let body = archive::gzip_decompress(&compressed)?;
        let digest = sha256_hex(&body);

        let text = String::from_utf8_lossy(&body).into_owned();
        let mut index: BTreeMap<String, BTreeMap<String, ControlParagraph<'static>>> = BTreeMap::new();

        for paragraph in ControlFile::parse_str(&text)?.into_paragraphs() {
            let (Some(name), Some(version)) =
                (paragraph.field_str("Package"), paragraph.field_str("Version"))
            else {
                continue;
            };

            index
                .entry(name.to_string())
                .or_default()
                .insert(version.to_string(), paragraph);
        }

        Ok((index, Some(digest)))
    }

    fn prune_package_index(
        &self,
        index: &mut BTreeMap<String, BTreeMap<String, ControlParagraph<'static>>>,
    ) -> Result<()> {
        for versions in index.values_mut() {
            versions.retain(|_version, meta_data| {
                meta_data
                    .field_str("Filename")
                    .map(|filename| self.repo_dir.join(filename).exists())
                    .unwrap_or(false)
            });
        }
        index.retain(|_name, versions| !versions.is_empty());
        Ok(())
    }

    fn store_package_index(
        &self,
        index: &BTreeMap<String, BTreeMap<String, ControlParagraph<'static>>>,
        current_digest: Option<&str>,
    ) -> Result<()> {
        let mut entries: Vec<&ControlParagraph<'static>> = Vec::new();

        for versions in index.values() {
            let mut by_version: Vec<(&String, &ControlParagraph<'static>)> = versions.iter().collect();
            by_version.sort_by(|(a, _), (b, _)| {
                match (Version::parse(a), Version::parse(b)) {
                    (Ok(va), Ok(vb)) => va.cmp(&vb),
                    _ => a.cmp(b),
                }
            });
            entries.extend(by_version.into_iter().map(|(_, meta)| meta));
        }

        if entries.is_empty() {
            return Ok(());
        }

        let mut control_file = ControlFile::default();
        for entry in &entries {
            control_file.add_paragraph((*entry).clone());
        }

        let mut body = Vec::new();
        control_file.write(&mut body)?;

        let changed = current_digest
            .map(|digest| sha256_hex(&body) != digest)
            .unwrap_or(true);

        let packages_gz = self.repo_dir.join("Packages.gz");
        let packages_sig = self.repo_dir.join("Packages.sig");
        let packages_in = self.repo_dir.join("InPackages.gz");

        if changed {
            let mut compressed = Vec::new();
            archive::gzip_compress(&mut compressed, &body)?;
            atomic_write(&self.repo_dir, &packages_gz, &compressed)?;
        }

        if let Some(key_path) = &self.sign_with {
            if changed || !packages_sig.exists() {
                let signature = self.create_usign_signature(&body, key_path)?;

                let signed_message = format!(
                    "-----BEGIN SIGNIFY SIGNED MESSAGE-----\n{}-----BEGIN SIGNIFY SIGNATURE-----\n{}-----END SIGNIFY SIGNATURE-----\n",
                    String::from_utf8_lossy(&body),
                    signature
                );

                let mut compressed_signed = Vec::new();
                archive::gzip_compress(&mut compressed_signed, signed_message.as_bytes())?;
                atomic_write(&self.repo_dir, &packages_in, &compressed_signed)?;
                atomic_write(&self.repo_dir, &packages_sig, signature.as_bytes())?;
            }
        }

        Ok(())
    }

    fn scan(
        &self,
        index: &BTreeMap<String, BTreeMap<String, ControlParagraph<'static>>>,
        logger: &Logger,
    ) -> Result<Vec<ControlParagraph<'static>>> {
        let mut found = Vec::new();

        for entry in walk_bolt_files(&self.repo_dir)? {
            let filename = entry
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_string();

            let Some(stem) = filename.strip_suffix(".bolt") else {
                continue;
            };

            let parts: Vec<&str> = stem.split('_').collect();
            if parts.len() != 3 {
                continue;
            }
            let (name, version) = (parts[0], parts[1]);

            if index.get(name).and_then(|v| v.get(version)).is_some() {
                continue;
            }

            match self.extract_control_data(&entry) {
                Ok(meta_data) => found.push(meta_data),
                Err(e) => {
                    info!(logger, "skipping {}: {}", entry.display(), e);
                    continue;
                }
            }
        }

        Ok(found)
    }

    fn extract_control_data(&self, path: &Path) -> Result<ControlParagraph<'static>> {
        let fh = std::fs::File::open(path)?;
        let control_tar = archive::extract_control_tar(fh)?;
        let control_bytes = extract_control_file_from_tar(&control_tar)?;
        let text = String::from_utf8_lossy(&control_bytes).into_owned();

        // Drop Description continuation lines (leading whitespace) so the
        // index keeps only the summary line, matching the original's
        // metadata extraction.
        let stripped: String = text
            .lines()
            .filter(|line| !line.starts_with(' ') && !line.starts_with('\t'))
            .collect::<Vec<_>>()
            .join("\n");

        let mut control = ControlFile::parse_str(&stripped)?;
        let mut meta_data = control
            .into_paragraphs()
            .next()
            .ok_or(BoltError::ControlFileNoParagraph)?;

        let pool_path = path
            .strip_prefix(&self.repo_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();

        meta_data.set_field_from_string("Filename".into(), pool_path.into());
        meta_data.set_field_from_string("SHA256".into(), sha256_hex_of_file(path)?.into());
        meta_data.set_field_from_string(
            "Size".into(),
            std::fs::metadata(path)?.len().to_string().into(),
        );

        Ok(meta_data)
    }

    fn create_usign_signature(&self, data: &[u8], key_path: &str) -> Result<String> {
        let message_file = tempfile::NamedTempFile::new_in(&self.repo_dir)?;
        std::fs::write(message_file.path(), data)?;

        let output = Command::new("usign")
            .args(["-S", "-m"])
            .arg(message_file.path())
            .arg("-s")
            .arg(key_path)
            .args(["-x", "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            return Err(BoltError::SignatureError(format!(
                "failed to sign Packages file: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn walk_bolt_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("bolt") {
                out.push(path);
            }
        }
    }

    out.sort();
    Ok(out)
}

fn atomic_write(dir: &Path, dest: &Path, data: &[u8]) -> Result<()> {
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;

    #[cfg(unix)]
    std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o644))?;

    temp.persist(dest)
        .map_err(|e| BoltError::Io(e.error))?;

    Ok(())
}

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_deterministic() {
        assert_eq!(sha256_hex(b"hello"), sha256_hex(b"hello"));
        assert_ne!(sha256_hex(b"hello"), sha256_hex(b"world"));
    }

    #[test]
    fn update_on_empty_dir_is_a_noop() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let logger = crate::logging::logger_with_level(slog::Level::Critical);
        let indexer = RepositoryIndexer::new(dir.path())?;
        indexer.update_package_index(&logger)?;
        assert!(!dir.path().join("Packages.gz").exists());
        Ok(())
    }

    #[test]
    fn rejects_missing_directory() {
        assert!(RepositoryIndexer::new("/no/such/path/xyz").is_err());
    }
}
