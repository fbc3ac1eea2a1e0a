// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian source control files (`.dsc`, `Sources` entries).

Used by the Debian importer to read an upstream source package's metadata
before converting it to a specfile.
*/

use {
    crate::{
        control::{ControlParagraph, ControlParagraphReader},
        dependency::{DependencyList, PackageDependencyFields},
        error::{BoltError, Result},
        io::{ChecksumType, ContentDigest},
        version::Version,
    },
    std::{
        io::BufRead,
        ops::{Deref, DerefMut},
        str::FromStr,
    },
};

/// A single file as described by a `Files` or `Checksums-*` field in a [DebianSourceControlFile].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DebianSourceControlFileEntry<'a> {
    /// The filename/path.
    pub filename: &'a str,

    /// The content digest of this file.
    pub digest: ContentDigest,

    /// The size in bytes of the file.
    pub size: u64,
}

/// Describes a single binary package entry in a `Package-List` field in a [DebianSourceControlFile].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DebianSourceControlFilePackage<'a> {
    /// The name of the binary package.
    pub name: &'a str,
    /// The package type.
    pub package_type: &'a str,
    /// The section it appears in.
    pub section: &'a str,
    /// The package priority.
    pub priority: &'a str,
    /// Extra fields.
    pub extra: Vec<&'a str>,
}

/// A Debian source control file/paragraph.
///
/// This control file consists of a single paragraph and defines a source package.
/// It is typically found in `.dsc` files and in `Sources` entries of a repository.
///
/// Fields are defined at
/// <https://www.debian.org/doc/debian-policy/ch-controlfields.html#debian-source-control-files-dsc>.
///
/// Only the already-dearmored paragraph is handled here; verifying or stripping
/// an upstream OpenPGP clearsign wrapper is the importer's job, done before the
/// data reaches this type.
#[derive(Default)]
pub struct DebianSourceControlFile<'a> {
    paragraph: ControlParagraph<'a>,
}

impl<'a> Deref for DebianSourceControlFile<'a> {
    type Target = ControlParagraph<'a>;

    fn deref(&self) -> &Self::Target {
        &self.paragraph
    }
}

impl<'a> DerefMut for DebianSourceControlFile<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.paragraph
    }
}

impl<'a> From<ControlParagraph<'a>> for DebianSourceControlFile<'a> {
    fn from(paragraph: ControlParagraph<'a>) -> Self {
        Self { paragraph }
    }
}

impl<'a> From<DebianSourceControlFile<'a>> for ControlParagraph<'a> {
    fn from(cf: DebianSourceControlFile<'a>) -> Self {
        cf.paragraph
    }
}

impl<'a> DebianSourceControlFile<'a> {
    /// Construct an instance by reading data from a reader.
    ///
    /// The source must be a Debian source control file with exactly 1 paragraph
    /// and must not carry an OpenPGP clearsign header.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let paragraphs = ControlParagraphReader::new(reader).collect::<Result<Vec<_>>>()?;

        if paragraphs.len() != 1 {
            return Err(BoltError::SourceControlParagraphMismatch(paragraphs.len()));
        }

        let paragraph = paragraphs
            .into_iter()
            .next()
            .expect("validated paragraph count above");

        Ok(Self { paragraph })
    }

    /// The format of the source package.
    pub fn format(&self) -> Result<&str> {
        self.required_field_str("Format")
    }

    /// The name of the source package.
    pub fn source(&self) -> Result<&str> {
        self.required_field_str("Source")
    }

    /// The binary packages this source package produces.
    pub fn binary(&self) -> Option<Box<(dyn Iterator<Item = &str> + '_)>> {
        self.iter_field_comma_delimited("Binary")
    }

    /// The architectures this source package will build for.
    pub fn architecture(&self) -> Option<Box<(dyn Iterator<Item = &str> + '_)>> {
        self.iter_field_words("Architecture")
    }

    /// The version number of the package as a string.
    pub fn version_str(&self) -> Result<&str> {
        self.required_field_str("Version")
    }

    /// The parsed version of the source package.
    pub fn version(&self) -> Result<Version> {
        Version::parse(self.version_str()?)
    }

    /// The package maintainer.
    pub fn maintainer(&self) -> Result<&str> {
        self.required_field_str("Maintainer")
    }

    /// The list of uploaders and co-maintainers.
    pub fn uploaders(&self) -> Option<Box<(dyn Iterator<Item = &str> + '_)>> {
        self.iter_field_comma_delimited("Uploaders")
    }

    /// The URL from which the upstream source of this package can be obtained.
    pub fn homepage(&self) -> Option<&str> {
        self.field_str("Homepage")
    }

    /// Test suites this package declares.
    pub fn testsuite(&self) -> Option<Box<(dyn Iterator<Item = &str> + '_)>> {
        self.iter_field_comma_delimited("Testsuite")
    }

    /// The most recent version of the standards this package conforms to.
    pub fn standards_version(&self) -> Result<&str> {
        self.required_field_str("Standards-Version")
    }

    /// The `Build-Depends` field, parsed to a [DependencyList].
    pub fn build_depends(&self) -> Option<Result<DependencyList>> {
        self.field_dependency_list("Build-Depends")
    }

    /// Obtain parsed values of all fields defining dependencies.
    pub fn package_dependency_fields(&self) -> Result<PackageDependencyFields> {
        PackageDependencyFields::from_paragraph(self)
    }

    /// Packages that can be built from this source package.
    pub fn package_list(
        &self,
    ) -> Option<Box<(dyn Iterator<Item = Result<DebianSourceControlFilePackage<'_>>> + '_)>> {
        if let Some(iter) = self.iter_field_lines("Package-List") {
            Some(Box::new(iter.map(move |v| {
                let mut words = v.split_ascii_whitespace();

                let name = words
                    .next()
                    .ok_or(BoltError::PackageListFieldMissing("name"))?;
                let package_type = words
                    .next()
                    .ok_or(BoltError::PackageListFieldMissing("type"))?;
                let section = words
                    .next()
                    .ok_or(BoltError::PackageListFieldMissing("section"))?;
                let priority = words
                    .next()
                    .ok_or(BoltError::PackageListFieldMissing("priority"))?;
                let extra = words.collect::<Vec<_>>();

                Ok(DebianSourceControlFilePackage {
                    name,
                    package_type,
                    section,
                    priority,
                    extra,
                })
            })))
        } else {
            None
        }
    }

    /// List of associated files with SHA-1 checksums.
    pub fn checksums_sha1(
        &self,
    ) -> Option<Box<(dyn Iterator<Item = Result<DebianSourceControlFileEntry<'_>>> + '_)>> {
        self.iter_files("Checksums-Sha1", ChecksumType::Sha1)
    }

    /// List of associated files with SHA-256 checksums.
    pub fn checksums_sha256(
        &self,
    ) -> Option<Box<(dyn Iterator<Item = Result<DebianSourceControlFileEntry<'_>>> + '_)>> {
        self.iter_files("Checksums-Sha256", ChecksumType::Sha256)
    }

    /// List of associated files with MD5 checksums.
    pub fn files(
        &self,
    ) -> Result<Box<(dyn Iterator<Item = Result<DebianSourceControlFileEntry<'_>>> + '_)>> {
        self.iter_files("Files", ChecksumType::Md5)
            .ok_or_else(|| BoltError::ControlRequiredFieldMissing("Files".to_string()))
    }

    fn iter_files(
        &self,
        field: &str,
        checksum: ChecksumType,
    ) -> Option<Box<(dyn Iterator<Item = Result<DebianSourceControlFileEntry<'_>>> + '_)>> {
        if let Some(iter) = self.iter_field_lines(field) {
            Some(Box::new(iter.map(move |v| {
                // Values are of form: <digest> <size> <path>
                let mut parts = v.split_ascii_whitespace();

                let digest = parts
                    .next()
                    .ok_or(BoltError::ChecksumLineFieldMissing("digest"))?;
                let size = parts
                    .next()
                    .ok_or(BoltError::ChecksumLineFieldMissing("size"))?;
                let filename = parts
                    .next()
                    .ok_or(BoltError::ChecksumLineFieldMissing("path"))?;

                if parts.next().is_some() {
                    return Err(BoltError::ChecksumLineTrailingData(v.to_string()));
                }

                let digest = ContentDigest::from_hex_digest(checksum, digest)?;
                let size = u64::from_str(size)?;

                Ok(DebianSourceControlFileEntry {
                    filename,
                    digest,
                    size,
                })
            })))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE_DSC: &str = indoc::indoc! {r#"
        Format: 3.0 (quilt)
        Source: libfoo
        Binary: libfoo-dev, libfoo1
        Architecture: any
        Version: 1.2.3-1
        Maintainer: Someone <someone@example.com>
        Uploaders: Alice <alice@example.com>, Bob <bob@example.com>
        Homepage: https://example.com/libfoo
        Standards-Version: 4.6.0
        Build-Depends: debhelper-compat (= 13), libbar-dev (>= 2.0)
        Package-List:
         libfoo-dev deb libdevel optional arch=any
         libfoo1 deb libs optional arch=any
        Checksums-Sha256:
         1e8ce5c4880a6d5bd8d3186e4186607dd19b64fc98a3877fc13aeefd566d67c5 1331996 libfoo_1.2.3.orig.tar.xz
        Files:
         943bed8b8d98a50c8d8a101b12693bb4 1331996 libfoo_1.2.3.orig.tar.xz
    "#};

    #[test]
    fn parse_dsc() -> Result<()> {
        let cf = DebianSourceControlFile::from_reader(std::io::Cursor::new(SAMPLE_DSC))?;

        assert_eq!(cf.format()?, "3.0 (quilt)");
        assert_eq!(cf.source()?, "libfoo");
        assert_eq!(
            cf.binary().unwrap().collect::<Vec<_>>(),
            vec!["libfoo-dev", "libfoo1"]
        );
        assert_eq!(cf.architecture().unwrap().collect::<Vec<_>>(), vec!["any"]);
        assert_eq!(cf.version()?.to_string(), "1.2.3-1");
        assert_eq!(
            cf.uploaders().unwrap().collect::<Vec<_>>(),
            vec!["Alice <alice@example.com>", "Bob <bob@example.com>"]
        );
        assert_eq!(cf.homepage(), Some("https://example.com/libfoo"));

        let deps = cf.build_depends().unwrap()?;
        assert_eq!(deps.groups().len(), 2);

        let packages = cf.package_list().unwrap().collect::<Result<Vec<_>>>()?;
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "libfoo-dev");
        assert_eq!(packages[0].package_type, "deb");

        let files = cf.files()?.collect::<Result<Vec<_>>>()?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "libfoo_1.2.3.orig.tar.xz");
        assert_eq!(files[0].size, 1331996);

        Ok(())
    }
}
