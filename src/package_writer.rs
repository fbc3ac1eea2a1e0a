// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Binary package archive writer.

Grounded on `deb::builder::DebBuilder` (`ar` member sequencing, USTAR tar
writer, uid/gid 0 + root owner/group convention, `./`-prefixed paths, GNU
long-path `@LongLink` handling), with the container renamed `.deb` → `.bolt`,
the control field order widened to the full set this crate's specfiles
carry, and conffiles/maintainer-script header synthesis added.
*/

use {
    crate::{
        content::ContentEntry,
        control::ControlParagraph,
        dependency::{Dependency, DependencyList},
        error::{BoltError, Result},
        filestats::FileKind,
        specfile::{BinaryPackageSpec, DependencySpecification, ReleaseEntry},
        version::{Constraint, ConstraintOp, Version},
    },
    std::{
        io::{Read, Write},
        path::Path,
    },
};

fn to_dependency_list(spec: &DependencySpecification) -> Result<DependencyList> {
    let mut groups = Vec::new();

    for group in spec.groups() {
        let mut alternatives = Vec::new();

        for entry in group {
            let constraint = match &entry.constraint {
                None => None,
                Some(raw) => {
                    let mut parts = raw.trim().splitn(2, char::is_whitespace);
                    let op = parts.next().ok_or_else(|| {
                        BoltError::DependencyParse(format!("missing relation in '{}'", raw))
                    })?;
                    let version = parts.next().ok_or_else(|| {
                        BoltError::DependencyParse(format!("missing version in '{}'", raw))
                    })?;
                    Some(Constraint::new(
                        ConstraintOp::parse(op)?,
                        Version::parse(version.trim())?,
                    ))
                }
            };

            alternatives.push(Dependency::new(entry.name.clone(), constraint));
        }

        if !alternatives.is_empty() {
            groups.push(alternatives);
        }
    }

    Ok(DependencyList::new(groups))
}

/// `Installed-Size`, per the rule that regular files and symlinks count
/// their actual byte size while every other kind (directories, device
/// nodes) counts as a flat 1 KiB, summed then rounded up to whole KiB.
pub fn installed_size(contents: &[ContentEntry]) -> u64 {
    let mut total_bytes: u64 = 0;

    for entry in contents {
        match entry.kind {
            FileKind::File | FileKind::Symlink => total_bytes += entry.stats.size,
            _ => total_bytes += 1024,
        }
    }

    (total_bytes + 1023) / 1024
}

/// Build the `control` paragraph in the exact field order a reader expects.
pub fn build_control_paragraph<'a>(
    spec: &BinaryPackageSpec,
    version: &str,
    release: &ReleaseEntry,
    contents: &[ContentEntry],
    extra_requires: &[(String, String)],
) -> Result<ControlParagraph<'a>> {
    let mut para = ControlParagraph::default();

    para.set_field_from_string("Package".into(), spec.name.clone().into());
    para.set_field_from_string("Version".into(), version.to_string().into());

    if let Some(source) = &spec.source {
        if source != &spec.name {
            para.set_field_from_string("Source".into(), source.clone().into());
        }
    }

    let architecture = spec.architecture.clone().unwrap_or_else(|| "all".to_string());
    para.set_field_from_string("Architecture".into(), architecture.into());

    para.set_field_from_string(
        "Maintainer".into(),
        format!("{} <{}>", release.maintainer, release.email).into(),
    );

    para.set_field_from_string(
        "Installed-Size".into(),
        installed_size(contents).to_string().into(),
    );

    let mut requires = to_dependency_list(&spec.requires)?;
    for (name, constraint) in extra_requires {
        let mut parts = constraint.trim().splitn(2, char::is_whitespace);
        let op = parts.next().unwrap_or("=");
        let version_str = parts.next().unwrap_or("");
        let dep = if version_str.is_empty() {
            Dependency::new(name.clone(), None)
        } else {
            Dependency::new(
                name.clone(),
                Some(Constraint::new(ConstraintOp::parse(op)?, Version::parse(version_str)?)),
            )
        };
        requires.push_group(vec![dep]);
    }
    if !requires.is_empty() {
        para.set_field_from_string("Depends".into(), requires.to_string().into());
    }

    let provides = to_dependency_list(&spec.provides)?;
    if !provides.is_empty() {
        para.set_field_from_string("Provides".into(), provides.to_string().into());
    }

    let conflicts = to_dependency_list(&spec.conflicts)?;
    if !conflicts.is_empty() {
        para.set_field_from_string("Conflicts".into(), conflicts.to_string().into());
    }

    let replaces = to_dependency_list(&spec.replaces)?;
    if !replaces.is_empty() {
        para.set_field_from_string("Replaces".into(), replaces.to_string().into());
    }

    para.set_field_from_string("Section".into(), spec.section.clone().into());

    let mut description = spec.description.summary.clone();
    if !spec.description.body.trim().is_empty() {
        let folded = spec
            .description
            .body
            .lines()
            .map(|line| {
                if line.trim().is_empty() {
                    " .".to_string()
                } else {
                    format!(" {}", line)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        description = format!("{}\n{}", description, folded);
    }
    para.set_field_from_string("Description".into(), description.into());

    Ok(para)
}

/// Collect the paths that belong in the `conffiles` control member: regular
/// files under `/etc/` by default, or explicitly marked `conffile=true`.
fn conffiles_list(contents: &[ContentEntry]) -> Vec<String> {
    let mut out: Vec<String> = contents
        .iter()
        .filter(|e| e.kind == FileKind::File)
        .filter(|e| e.is_conffile())
        .map(|e| e.target_path.clone())
        .collect();
    out.sort();
    out
}

/// The fixed preamble prepended to every maintainer script, exporting the
/// build prefix's install-location variables and a sanitized `PATH`.
fn maintainer_script_header(install_prefix: &str, host_type: &str) -> String {
    format!(
        "#!/bin/sh\nexport BOLT_INSTALL_PREFIX=\"{}\"\nexport BOLT_HOST_TYPE=\"{}\"\nexport PATH=\"/bin:/sbin:/usr/bin:/usr/sbin:/usr/local/bin\"\n",
        install_prefix, host_type
    )
}

fn new_tar_header(mtime: u64) -> Result<tar::Header> {
    let mut header = tar::Header::new_gnu();
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("root")?;
    header.set_groupname("root")?;
    header.set_mtime(mtime);
    Ok(header)
}

fn set_header_path(
    builder: &mut tar::Builder<impl Write>,
    header: &mut tar::Header,
    path: &str,
    is_directory: bool,
) -> Result<()> {
    assert!(header.as_ustar().is_none());

    let value = format!("./{}{}", path.trim_start_matches('/'), if is_directory { "/" } else { "" });
    let value_bytes = value.as_bytes();
    let name_buffer = &mut header.as_old_mut().name;

    if value_bytes.len() <= name_buffer.len() {
        name_buffer[0..value_bytes.len()].copy_from_slice(value_bytes);
    } else {
        let mut header2 = tar::Header::new_gnu();
        let name = b"././@LongLink";
        header2.as_gnu_mut().unwrap().name[..name.len()].clone_from_slice(&name[..]);
        header2.set_mode(0o644);
        header2.set_uid(0);
        header2.set_gid(0);
        header2.set_mtime(0);
        header2.set_size(value_bytes.len() as u64 + 1);
        header2.set_entry_type(tar::EntryType::new(b'L'));
        header2.set_cksum();
        let mut data = value_bytes.chain(std::io::repeat(0).take(1));
        builder.append(&header2, &mut data)?;

        let truncated = &value_bytes[0..name_buffer.len()];
        name_buffer[0..truncated.len()].copy_from_slice(truncated);
    }

    Ok(())
}

/// Write the `data.tar` member: every content entry, directories included,
/// in `target_path` order, with owner/group forced to root and mode
/// overridden when the declaration specified one.
fn write_data_tar<W: Write>(writer: W, contents: &[ContentEntry], basedir: &Path, mtime: u64) -> Result<()> {
    let mut builder = tar::Builder::new(writer);

    let mut header = new_tar_header(mtime)?;
    header.set_path(Path::new("./"))?;
    header.set_mode(0o755);
    header.set_size(0);
    header.set_entry_type(tar::EntryType::Directory);
    header.set_cksum();
    builder.append(&header, &*vec![])?;

    for entry in contents {
        let mode = entry.mode.map(|m| m as u32).unwrap_or(entry.stats.mode);
        let mut header = new_tar_header(mtime)?;

        match entry.kind {
            FileKind::Dir => {
                set_header_path(&mut builder, &mut header, &entry.target_path, true)?;
                header.set_mode(mode);
                header.set_size(0);
                header.set_entry_type(tar::EntryType::Directory);
                header.set_cksum();
                builder.append(&header, &*vec![])?;
            }
            FileKind::Symlink => {
                set_header_path(&mut builder, &mut header, &entry.target_path, false)?;
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_size(0);
                let target = entry.stats.link_target.clone().unwrap_or_default();
                header.set_link_name(&target)?;
                header.set_cksum();
                builder.append(&header, &*vec![])?;
            }
            FileKind::File => {
                let abs_path = basedir.join(entry.target_path.trim_start_matches('/'));
                let data = std::fs::read(&abs_path)?;
                set_header_path(&mut builder, &mut header, &entry.target_path, false)?;
                header.set_mode(mode);
                header.set_size(data.len() as u64);
                header.set_cksum();
                builder.append(&header, &*data)?;
            }
            FileKind::CharDev | FileKind::BlockDev | FileKind::Fifo | FileKind::Socket => {
                // Device nodes/fifos are synthesized empty; the rule script that
                // needs the real device creates it at install time.
                set_header_path(&mut builder, &mut header, &entry.target_path, false)?;
                header.set_mode(mode);
                header.set_size(0);
                header.set_cksum();
                builder.append(&header, &*vec![])?;
            }
        }
    }

    builder.finish()?;
    Ok(())
}

/// Write a `.bolt` package to `writer`.
///
/// `contents` must already have debug symbols split and shared-library
/// dependencies resolved (the caller merges those into `extra_requires` and
/// sets `debug_info_path`/stats beforehand); this function only serializes.
#[allow(clippy::too_many_arguments)]
pub fn write_package<W: Write>(
    writer: &mut W,
    spec: &BinaryPackageSpec,
    version: &str,
    release: &ReleaseEntry,
    contents: &[ContentEntry],
    extra_requires: &[(String, String)],
    basedir: &Path,
    host_type: &str,
    install_prefix: &str,
    mtime: u64,
) -> Result<()> {
    let mut ar_builder = ar::Builder::new(writer);

    let data: &[u8] = b"2.0\n";
    let mut header = ar::Header::new(b"debian-binary".to_vec(), data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    ar_builder.append(&header, data)?;

    let control_tar = {
        let mut tar_buf = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tar_buf);

            let mut control_bytes = Vec::new();
            let para = build_control_paragraph(spec, version, release, contents, extra_requires)?;
            para.write(&mut control_bytes)?;
            append_tar_file(&mut builder, "control", &control_bytes, 0o644, mtime)?;

            let conffiles = conffiles_list(contents);
            if !conffiles.is_empty() {
                let data = format!("{}\n", conffiles.join("\n"));
                append_tar_file(&mut builder, "conffiles", data.as_bytes(), 0o644, mtime)?;
            }

            for name in ["preinst", "postinst", "prerm", "postrm"] {
                if let Some(body) = spec.maintainer_scripts.get(name) {
                    let script = format!(
                        "{}{}",
                        maintainer_script_header(install_prefix, host_type),
                        body
                    );
                    append_tar_file(&mut builder, name, script.as_bytes(), 0o754, mtime)?;
                }
            }

            builder.finish()?;
        }
        let mut compressed = Vec::new();
        crate::archive::gzip_compress(&mut compressed, &tar_buf)?;
        compressed
    };

    let mut header = ar::Header::new(b"control.tar.gz".to_vec(), control_tar.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    ar_builder.append(&header, &*control_tar)?;

    let data_tar = {
        let mut tar_buf = Vec::new();
        write_data_tar(&mut tar_buf, contents, basedir, mtime)?;
        let mut compressed = Vec::new();
        crate::archive::gzip_compress(&mut compressed, &tar_buf)?;
        compressed
    };

    let mut header = ar::Header::new(b"data.tar.gz".to_vec(), data_tar.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    ar_builder.append(&header, &*data_tar)?;

    Ok(())
}

fn append_tar_file(
    builder: &mut tar::Builder<impl Write>,
    name: &str,
    data: &[u8],
    mode: u32,
    mtime: u64,
) -> Result<()> {
    let mut header = new_tar_header(mtime)?;
    set_header_path(builder, &mut header, name, false)?;
    header.set_mode(mode);
    header.set_size(data.len() as u64);
    header.set_cksum();
    builder.append(&header, data)?;
    Ok(())
}

/// `<name>_<upstream>-<revision>_<architecture-with-underscore-to-dash>.bolt`
pub fn package_filename(spec: &BinaryPackageSpec, version: &str) -> String {
    let architecture = spec
        .architecture
        .clone()
        .unwrap_or_else(|| "all".to_string())
        .replace('_', "-");
    format!("{}_{}_{}.bolt", spec.name, version, architecture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filestats::FileStats;

    fn dir_entry(path: &str) -> ContentEntry {
        ContentEntry {
            target_path: path.to_string(),
            kind: FileKind::Dir,
            mode: None,
            owner: None,
            group: None,
            conffile: None,
            stats: FileStats::default_dir_stats(),
            debug_info_path: None,
        }
    }

    fn file_entry(path: &str, size: u64) -> ContentEntry {
        let mut stats = FileStats::default_file_stats();
        stats.size = size;
        ContentEntry {
            target_path: path.to_string(),
            kind: FileKind::File,
            mode: None,
            owner: None,
            group: None,
            conffile: None,
            stats,
            debug_info_path: None,
        }
    }

    #[test]
    fn installed_size_rounds_up_to_kib() {
        let contents = vec![dir_entry("/usr"), file_entry("/usr/bin/hello", 1500)];
        // 1024 (dir) + 1500 (file) = 2524 bytes -> ceil(2524/1024) = 3
        assert_eq!(installed_size(&contents), 3);
    }

    #[test]
    fn conffiles_defaults_to_etc() {
        let contents = vec![file_entry("/etc/foo.conf", 10), file_entry("/usr/bin/hello", 10)];
        assert_eq!(conffiles_list(&contents), vec!["/etc/foo.conf".to_string()]);
    }

    #[test]
    fn conffiles_respects_explicit_false_under_etc() {
        let mut excluded = file_entry("/etc/foo.conf", 10);
        excluded.conffile = Some(false);
        let included = file_entry("/etc/bar.conf", 10);
        let contents = vec![excluded, included];
        assert_eq!(conffiles_list(&contents), vec!["/etc/bar.conf".to_string()]);
    }

    #[test]
    fn conffiles_respects_explicit_true_outside_etc() {
        let mut extra = file_entry("/opt/app/conf", 10);
        extra.conffile = Some(true);
        let contents = vec![extra];
        assert_eq!(conffiles_list(&contents), vec!["/opt/app/conf".to_string()]);
    }

    #[test]
    fn package_filename_dashes_architecture() {
        let spec = BinaryPackageSpec {
            name: "libfoo".to_string(),
            description: Default::default(),
            section: "libs".to_string(),
            source: None,
            architecture: Some("x86_64".to_string()),
            build_for: None,
            supported_on: None,
            requires: Default::default(),
            provides: Default::default(),
            conflicts: Default::default(),
            replaces: Default::default(),
            content_spec: vec![],
            maintainer_scripts: Default::default(),
            content_subdir: None,
            collect_py_cache_files: false,
        };
        assert_eq!(package_filename(&spec, "1.0-1"), "libfoo_1.0-1_x86-64.bolt");
    }
}
