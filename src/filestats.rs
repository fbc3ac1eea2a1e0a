// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! File type, mode and ELF metadata detection.

Grounded on the filesystem/magic inspection a content expander needs before
it can classify a path as a directory, regular file, symlink or device node,
and on whether a regular file is an ELF binary, its word size, build-id and
stripped-ness.
*/

use {
    crate::error::Result,
    std::{
        fs,
        os::unix::fs::{FileTypeExt, MetadataExt},
        path::Path,
    },
};

/// The kind of filesystem object a path denotes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    Dir,
    File,
    Symlink,
    CharDev,
    BlockDev,
    Fifo,
    Socket,
}

/// ELF word size, when a regular file is an ELF object.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl ElfClass {
    pub fn word_size(&self) -> u32 {
        match self {
            Self::Elf32 => 32,
            Self::Elf64 => 64,
        }
    }
}

/// Stat and, where applicable, ELF metadata for a single filesystem path.
///
/// Mirrors the `lstat()` fields a content expander and the debug-split /
/// shared-library passes need, without re-reading the file repeatedly.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub kind: FileKind,
    pub mode: u32,
    pub dev: u64,
    pub ino: u64,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub link_target: Option<String>,
    pub elf_class: Option<ElfClass>,
    pub build_id: Option<String>,
    pub is_stripped: bool,
    pub is_dynamically_linked: bool,
    /// The ELF machine name, or `"no machine"` for non-ELF files.
    pub machine: String,
}

impl FileStats {
    /// Stat-only entry for a synthesized directory that does not necessarily exist on disk.
    pub fn default_dir_stats() -> Self {
        Self {
            kind: FileKind::Dir,
            mode: 0o755,
            dev: 0,
            ino: 0,
            nlink: 1,
            uid: 0,
            gid: 0,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            link_target: None,
            elf_class: None,
            build_id: None,
            is_stripped: false,
            is_dynamically_linked: false,
            machine: "no machine".to_string(),
        }
    }

    /// Stat-only entry for a synthesized regular file.
    pub fn default_file_stats() -> Self {
        Self {
            kind: FileKind::File,
            mode: 0o644,
            ..Self::default_dir_stats()
        }
    }

    pub fn is_elf_binary(&self) -> bool {
        self.elf_class.is_some()
    }

    /// Detect the stats of a path on disk, without following a final symlink.
    pub fn detect_from_filename(path: &Path) -> Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        let file_type = metadata.file_type();

        let kind = if file_type.is_dir() {
            FileKind::Dir
        } else if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_char_device() {
            FileKind::CharDev
        } else if file_type.is_block_device() {
            FileKind::BlockDev
        } else if file_type.is_fifo() {
            FileKind::Fifo
        } else if file_type.is_socket() {
            FileKind::Socket
        } else {
            FileKind::File
        };

        let link_target = if kind == FileKind::Symlink {
            Some(fs::read_link(path)?.to_string_lossy().into_owned())
        } else {
            None
        };

        let (elf_class, build_id, is_stripped, is_dynamically_linked, machine) =
            if kind == FileKind::File {
                detect_elf(path)?
            } else {
                (None, None, false, false, "no machine".to_string())
            };

        Ok(Self {
            kind,
            mode: metadata.mode() & 0o7777,
            dev: metadata.dev(),
            ino: metadata.ino(),
            nlink: metadata.nlink(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            size: metadata.size(),
            atime: metadata.atime(),
            mtime: metadata.mtime(),
            ctime: metadata.ctime(),
            link_target,
            elf_class,
            build_id,
            is_stripped,
            is_dynamically_linked,
            machine,
        })
    }
}

type ElfDetection = (Option<ElfClass>, Option<String>, bool, bool, String);

/// Parse ELF headers of a regular file, returning `(class, build_id, is_stripped,
/// is_dynamically_linked, machine)`. Non-ELF files yield all-default values.
fn detect_elf(path: &Path) -> Result<ElfDetection> {
    let data = match fs::read(path) {
        Ok(d) => d,
        Err(_) => return Ok((None, None, false, false, "no machine".to_string())),
    };

    let elf = match goblin::elf::Elf::parse(&data) {
        Ok(elf) => elf,
        Err(_) => return Ok((None, None, false, false, "no machine".to_string())),
    };

    let class = if elf.is_64 {
        ElfClass::Elf64
    } else {
        ElfClass::Elf32
    };

    let build_id = elf.iter_note_sections(&data, None).and_then(|mut notes| {
        notes.find_map(|note| {
            let note = note.ok()?;
            if note.name == "GNU" && note.n_type == goblin::elf::note::NT_GNU_BUILD_ID {
                Some(hex::encode(note.desc))
            } else {
                None
            }
        })
    });

    let is_dynamically_linked = !elf.libraries.is_empty() || elf.dynamic.is_some();

    // A stripped binary has no `.symtab` section.
    let is_stripped = !elf
        .section_headers
        .iter()
        .any(|sh| elf.shdr_strtab.get_at(sh.sh_name) == Some(".symtab"));

    let machine = goblin::elf::header::machine_to_str(elf.header.e_machine).to_string();

    Ok((Some(class), build_id, is_stripped, is_dynamically_linked, machine))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_stats() {
        let d = FileStats::default_dir_stats();
        assert_eq!(d.kind, FileKind::Dir);
        assert_eq!(d.mode, 0o755);

        let f = FileStats::default_file_stats();
        assert_eq!(f.kind, FileKind::File);
        assert_eq!(f.mode, 0o644);
    }

    #[test]
    fn detect_regular_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("plain.txt");
        let mut fh = fs::File::create(&path)?;
        fh.write_all(b"hello")?;
        drop(fh);

        let stats = FileStats::detect_from_filename(&path)?;
        assert_eq!(stats.kind, FileKind::File);
        assert_eq!(stats.size, 5);
        assert!(!stats.is_elf_binary());

        Ok(())
    }

    #[test]
    fn detect_symlink() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("target");
        fs::write(&target, b"x")?;
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link)?;

        let stats = FileStats::detect_from_filename(&link)?;
        assert_eq!(stats.kind, FileKind::Symlink);
        assert_eq!(stats.link_target, Some(target.to_string_lossy().into_owned()));

        Ok(())
    }
}
