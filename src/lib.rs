// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! A source-to-binary package build system for a Debian-style Linux
distribution.

This crate turns a package's specfile (`<control>` XML: source metadata,
patches, build rules, and the binary packages it produces) into installable
`.bolt` archives and maintains the `Packages.gz` index of a package pool.
It is not an implementation of Debian's own `.deb`/`dpkg` format; the wire
format is deliberately incompatible (`.bolt` instead of `.deb`, `Signify`
signatures instead of OpenPGP) while the packaging *workflow* — specfile,
changelog-driven version, quilt patches, shared-library dependency
inference, debug symbol splitting — follows it closely enough that anyone
who has packaged for Debian will recognize every step.

# A Tour of Functionality

[version] implements package version strings and the `Constraint` algebra
used by `Depends`/`Provides`/`Conflicts`/`Replaces` fields;
[version::Version] parses and orders `[epoch:]upstream[-revision]` strings
per Debian's comparison rules. [dependency] builds on top of it:
[dependency::Dependency] and [dependency::DependencyList] represent parsed
dependency expressions like `libc6 (>= 2.4), libx11-6`.

*Control files* — paragraphs of RFC-822-style key/value metadata — are the
common currency between a `.bolt` archive's control member, a
`Packages.gz` entry, and an upstream Debian `.dsc`/`debian/control` file.
[control] defines the low-level primitives:
[control::ControlParagraph] and [control::ControlField] make up one
paragraph, [control::ControlFile] a sequence of them, and
[control::ControlParagraphReader] streams paragraphs out of a reader.
Three typed views sit on top: [binary_package_control::BinaryPackageControlFile]
for a binary package's own control data, [debian_source_control::DebianSourceControlFile]
for an upstream `.dsc`, and [source_package_control::SourceControlFile] for
an upstream `debian/control`. [debian_source_package_list] collects many
parsed `.dsc`s, e.g. from a mirror's `Sources` file.

The package definition itself lives in XML, not a control file. [specfile]
loads a specfile: `<xi:include>` is inlined, every `if="…"` attribute is
evaluated by the recursive-descent boolean parser in [filter], and the
surviving tree is converted into [specfile::SourceSpec] and
[specfile::BinaryPackageSpec]. [source_package] operates on a loaded
[specfile::SourceSpec] at build time: unpacking declared sources, applying
quilt patches, and running the four lifecycle rules
(`prepare`/`build`/`install`/`clean`) as shell scripts via
[source_package::SourcePackage]; [source_package::PatchSeries] additionally
reads a bare quilt `series` file for the importer described below.

Once a package is installed into a staging directory, [content] expands a
`<contents>` block's `<file>`/`<dir>` declarations (including globs, brace
patterns, and `.pyc`/`.pyo` byte-compiled sibling discovery) into the
concrete list of files that will ship, stat'ing each one via [filestats].
[debug_split] peels `.debug` information off unstripped ELF binaries in
that list and registers it under `/usr/lib/debug`; [shlib] resolves every
remaining binary's dynamic library dependencies, consulting an `ldconfig
-p` snapshot ([shlib::ShlibCache]) overlaid with the libraries produced by
sibling packages in the same build, to synthesize `Depends` entries.
[package_writer] assembles the final `.bolt` archive (an `ar(SVR4)`
container wrapping `debian-binary`, `control.tar.gz`, and `data.tar.gz`,
exactly as a `.deb` is laid out) from a [specfile::BinaryPackageSpec] and
its expanded content list. [file_manifest] and [archive] are the supporting
deterministic file-list and tar/ar/gzip plumbing shared by the writer and
by [source_package]'s source unpacking. [download] fetches and caches
upstream source tarballs over a verified, resumable blocking HTTP client.

[repository] maintains a pool directory's `Packages.gz` index: incremental
rescans, pruning of vanished packages, and an optional `Signify` signature
produced by shelling out to an external `usign` binary.

[importer] is the one-shot migration path the other direction: given an
already-unpacked upstream Debian source package's `.dsc`, `debian/control`,
`debian/copyright`, and patch series, it renders a specfile XML skeleton a
maintainer can finish by hand.

[io] defines the content-digest and compression primitives ([io::ContentDigest],
[io::Compression]) shared across the crate. [logging] builds the crate's
`slog` root logger. [error] defines the unified [error::BoltError] type and
the crate-wide [error::Result] alias that every fallible operation returns.
*/

pub mod archive;
pub mod binary_package_control;
pub mod content;
pub mod control;
pub mod debian_source_control;
pub mod debian_source_package_list;
pub mod debug_split;
pub mod dependency;
pub mod download;
pub mod error;
pub mod file_manifest;
pub mod filestats;
pub mod filter;
pub mod importer;
pub mod io;
pub mod logging;
pub mod package_writer;
pub mod repository;
pub mod shlib;
pub mod source_package;
pub mod source_package_control;
pub mod specfile;
pub mod version;
