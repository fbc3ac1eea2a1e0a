// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Archive I/O: `ar`, `tar`, and compressed stream helpers.

Unpacking sanitizes entry paths so a malicious archive cannot escape the
destination directory (no absolute paths, no `..` components).
*/

use {
    crate::{
        error::{BoltError, Result},
        io::Compression,
    },
    std::{
        io::{Read, Write},
        path::{Component, Path, PathBuf},
    },
};

/// Reject a path carried inside an archive entry that is absolute or escapes
/// the extraction root via `..`.
fn sanitize_entry_path(path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(BoltError::ArchiveError(format!(
                    "archive entry has an absolute path: {}",
                    path.display()
                )))
            }
            Component::ParentDir => {
                return Err(BoltError::ArchiveError(format!(
                    "archive entry escapes extraction root: {}",
                    path.display()
                )))
            }
        }
    }

    Ok(out)
}

/// Unpack a tar stream to `dest`, sanitizing every entry path.
///
/// `strip_components` drops that many leading path segments from each entry,
/// discarding entries that have fewer segments than that (mirroring GNU tar's
/// `--strip-components`).
pub fn unpack_tar<R: Read>(reader: R, dest: &Path, strip_components: usize) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_unpack_xattrs(false);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw_path = entry.path()?.into_owned();

        let mut components = raw_path.components();
        for _ in 0..strip_components {
            if components.next().is_none() {
                break;
            }
        }
        let stripped: PathBuf = components.collect();

        if stripped.as_os_str().is_empty() {
            continue;
        }

        let safe = sanitize_entry_path(&stripped)?;
        let out_path = dest.join(&safe);

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        entry.unpack(&out_path)?;
    }

    Ok(())
}

/// Unpack a tar stream compressed with the given format.
pub fn unpack_compressed_tar<R: Read + 'static>(
    reader: R,
    compression: Compression,
    dest: &Path,
    strip_components: usize,
) -> Result<()> {
    let decompressed = crate::io::read_decompressed(Box::new(reader), compression)?;
    unpack_tar(decompressed, dest, strip_components)
}

/// A single ar archive member read back out, for repository indexing.
pub struct ArMember {
    pub identifier: String,
    pub data: Vec<u8>,
}

/// Read all members of an `ar` archive into memory.
///
/// Used by the repository indexer, which needs only `control.tar.*` out of a
/// `.bolt` file and discards the rest.
pub fn read_ar_members<R: Read>(reader: R) -> Result<Vec<ArMember>> {
    let mut archive = ar::Archive::new(reader);
    let mut members = Vec::new();

    while let Some(entry) = archive.next_entry() {
        let mut entry = entry.map_err(|e| BoltError::ArchiveError(e.to_string()))?;
        let identifier = String::from_utf8_lossy(entry.header().identifier()).into_owned();

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;

        members.push(ArMember { identifier, data });
    }

    Ok(members)
}

/// Locate and decompress the `control.tar.*` member of a `.bolt` archive,
/// returning its decompressed bytes.
pub fn extract_control_tar<R: Read>(reader: R) -> Result<Vec<u8>> {
    let members = read_ar_members(reader)?;

    let member = members
        .iter()
        .find(|m| m.identifier.starts_with("control.tar"))
        .ok_or_else(|| BoltError::ArchiveError("no control.tar member found".to_string()))?;

    let compression = Compression::from_filename(&member.identifier);
    let mut decompressed = crate::io::read_decompressed(
        Box::new(std::io::Cursor::new(member.data.clone())),
        compression,
    )?;

    let mut out = Vec::new();
    decompressed.read_to_end(&mut out)?;

    Ok(out)
}

/// Extract the `control` file from a decompressed `control.tar` byte stream.
pub fn extract_control_file_from_tar(control_tar: &[u8]) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(std::io::Cursor::new(control_tar));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();

        if path == Path::new("control") || path == Path::new("./control") {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            return Ok(data);
        }
    }

    Err(BoltError::ArchiveError(
        "control.tar has no control member".to_string(),
    ))
}

/// Write a gzip-compressed copy of `data` to `writer`.
pub fn gzip_compress<W: Write>(mut writer: W, data: &[u8]) -> Result<()> {
    let mut encoder = libflate::gzip::Encoder::new(Vec::new())?;
    encoder.write_all(data)?;
    let compressed = encoder.finish().into_result()?;
    writer.write_all(&compressed)?;

    Ok(())
}

/// Decompress a gzip byte stream fully into memory.
pub fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = libflate::gzip::Decoder::new(data)?;
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_rejects_parent_dir() {
        assert!(sanitize_entry_path(Path::new("../etc/passwd")).is_err());
    }

    #[test]
    fn sanitize_rejects_absolute() {
        assert!(sanitize_entry_path(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn sanitize_accepts_normal() -> Result<()> {
        let p = sanitize_entry_path(Path::new("usr/bin/foo"))?;
        assert_eq!(p, Path::new("usr/bin/foo"));
        Ok(())
    }

    #[test]
    fn gzip_roundtrip() -> Result<()> {
        let mut buf = Vec::new();
        gzip_compress(&mut buf, b"hello world")?;
        let out = gzip_decompress(&buf)?;
        assert_eq!(out, b"hello world");
        Ok(())
    }

    #[test]
    fn unpack_strips_components_and_rejects_traversal() -> Result<()> {
        let mut builder = tar::Builder::new(Vec::new());
        let data = b"payload";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append_data(&mut header, "pkg-1.0/src/main.rs", &data[..])?;
        let archive_bytes = builder.into_inner()?;

        let dir = tempfile::tempdir()?;
        unpack_tar(std::io::Cursor::new(archive_bytes), dir.path(), 1)?;

        let unpacked = dir.path().join("src/main.rs");
        assert!(unpacked.exists());
        assert_eq!(std::fs::read(unpacked)?, data);

        Ok(())
    }
}
