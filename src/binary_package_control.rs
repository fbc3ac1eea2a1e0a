// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Binary package control files. */

use crate::{
    control::ControlParagraph,
    dependency::{DependencyList, PackageDependencyFields},
    error::{BoltError, Result},
    io::{ChecksumType, ContentDigest},
    version::Version,
};

/// A binary package control file.
///
/// Binary package control files are defined by a single paragraph with well-defined
/// fields. This type is a low-level wrapper around an inner [ControlParagraph].
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BinaryPackageControlFile<'a> {
    paragraph: ControlParagraph<'a>,
}

impl<'a> AsRef<ControlParagraph<'a>> for BinaryPackageControlFile<'a> {
    fn as_ref(&self) -> &ControlParagraph<'a> {
        &self.paragraph
    }
}

impl<'a> AsMut<ControlParagraph<'a>> for BinaryPackageControlFile<'a> {
    fn as_mut(&mut self) -> &mut ControlParagraph<'a> {
        &mut self.paragraph
    }
}

impl<'a> From<ControlParagraph<'a>> for BinaryPackageControlFile<'a> {
    fn from(paragraph: ControlParagraph<'a>) -> Self {
        Self { paragraph }
    }
}

impl<'a> BinaryPackageControlFile<'a> {
    pub fn package(&self) -> Result<&str> {
        self.paragraph.required_field_str("Package")
    }

    /// The `Version` field as its original string.
    pub fn version_str(&self) -> Result<&str> {
        self.paragraph.required_field_str("Version")
    }

    /// The `Version` field parsed into a [Version].
    pub fn version(&self) -> Result<Version> {
        Version::parse(self.version_str()?)
    }

    pub fn architecture(&self) -> Result<&str> {
        self.paragraph.required_field_str("Architecture")
    }

    pub fn maintainer(&self) -> Result<&str> {
        self.paragraph.required_field_str("Maintainer")
    }

    pub fn description(&self) -> Result<&str> {
        self.paragraph.required_field_str("Description")
    }

    pub fn source(&self) -> Option<&str> {
        self.paragraph.field_str("Source")
    }

    pub fn section(&self) -> Option<&str> {
        self.paragraph.field_str("Section")
    }

    pub fn priority(&self) -> Option<&str> {
        self.paragraph.field_str("Priority")
    }

    pub fn essential(&self) -> Option<&str> {
        self.paragraph.field_str("Essential")
    }

    pub fn homepage(&self) -> Option<&str> {
        self.paragraph.field_str("Homepage")
    }

    pub fn installed_size(&self) -> Option<Result<usize>> {
        self.paragraph.field_usize("Installed-Size")
    }

    pub fn size(&self) -> Option<Result<usize>> {
        self.paragraph.field_usize("Size")
    }

    pub fn built_using(&self) -> Option<&str> {
        self.paragraph.field_str("Built-Using")
    }

    pub fn depends(&self) -> Option<Result<DependencyList>> {
        self.paragraph.field_dependency_list("Depends")
    }

    pub fn recommends(&self) -> Option<Result<DependencyList>> {
        self.paragraph.field_dependency_list("Recommends")
    }

    pub fn suggests(&self) -> Option<Result<DependencyList>> {
        self.paragraph.field_dependency_list("Suggests")
    }

    pub fn enhances(&self) -> Option<Result<DependencyList>> {
        self.paragraph.field_dependency_list("Enhances")
    }

    pub fn pre_depends(&self) -> Option<Result<DependencyList>> {
        self.paragraph.field_dependency_list("Pre-Depends")
    }

    /// Obtain parsed values of all fields defining dependencies.
    pub fn package_dependency_fields(&self) -> Result<PackageDependencyFields> {
        PackageDependencyFields::from_paragraph(&self.paragraph)
    }

    /// The byte size of the package archive, as recorded in the `Size` field.
    pub fn archive_size_bytes(&self) -> Result<usize> {
        self.size()
            .ok_or_else(|| BoltError::ControlRequiredFieldMissing("Size".to_string()))?
    }

    /// The archive digest of the requested type, as recorded in the corresponding field.
    pub fn archive_digest(&self, checksum: ChecksumType) -> Result<ContentDigest> {
        let hex_digest = self
            .paragraph
            .field_str(checksum.field_name())
            .ok_or_else(|| {
                BoltError::ControlRequiredFieldMissing(checksum.field_name().to_string())
            })?;

        ContentDigest::from_hex_digest(checksum, hex_digest)
    }

    /// The basename of the archive's `Filename` field, stripped of any directory component.
    pub fn archive_filename(&self) -> Result<String> {
        let filename = self
            .paragraph
            .field_str("Filename")
            .ok_or_else(|| BoltError::ControlRequiredFieldMissing("Filename".to_string()))?;

        Ok(if let Some((_, s)) = filename.rsplit_once('/') {
            s.to_string()
        } else {
            filename.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlParagraph;

    fn sample() -> BinaryPackageControlFile<'static> {
        let mut p = ControlParagraph::default();
        p.set_field_from_string("Package".into(), "libfoo".into());
        p.set_field_from_string("Version".into(), "1.2-1".into());
        p.set_field_from_string("Architecture".into(), "amd64".into());
        p.set_field_from_string("Maintainer".into(), "Someone <someone@example.com>".into());
        p.set_field_from_string("Description".into(), "a library".into());
        p.set_field_from_string("Installed-Size".into(), "42".into());
        p.set_field_from_string("Depends".into(), "libc6 (>= 2.17), libbar".into());
        p.into()
    }

    #[test]
    fn typed_accessors() -> Result<()> {
        let cf = sample();
        assert_eq!(cf.package()?, "libfoo");
        assert_eq!(cf.version()?.to_string(), "1.2-1");
        assert_eq!(cf.architecture()?, "amd64");
        assert_eq!(cf.installed_size().unwrap()?, 42);

        let deps = cf.depends().unwrap()?;
        assert_eq!(deps.groups().len(), 2);

        Ok(())
    }
}
