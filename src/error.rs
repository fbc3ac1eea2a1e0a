// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {crate::file_manifest::FileManifestError, thiserror::Error};

/// Primary crate error type. One variant per error kind in the error
/// taxonomy, plus the ambient transport/parse wrappers every fallible
/// operation needs to propagate with `?`.
#[derive(Debug, Error)]
pub enum BoltError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("hex parsing error: {0:?}")]
    Hex(#[from] hex::FromHexError),

    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("HTTP error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("file manifest error: {0}")]
    FileManifest(#[from] FileManifestError),

    #[error("specfile is not well-formed XML: {0}")]
    SpecSyntaxError(String),

    #[error("invalid `if` expression: {0}")]
    FilterSyntaxError(String),

    #[error("invalid version string: {0}")]
    InvalidVersion(String),

    #[error("unmet dependency: {0}")]
    UnmetDependency(String),

    #[error("source is not supported on the requested target: {0}")]
    SkipBuild(String),

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("download of {url} failed: {message}")]
    DownloadError { url: String, message: String },

    #[error("patch {0} failed to apply")]
    PatchFailed(String),

    #[error("rule {0} exited with a non-zero status")]
    RuleFailed(String),

    #[error("archive error: {0}")]
    ArchiveError(String),

    #[error("signature error: {0}")]
    SignatureError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("control file parse error: {0}")]
    ControlParseError(String),

    #[error("control file lacks a paragraph")]
    ControlFileNoParagraph,

    #[error("control field value has multiple lines and cannot be represented as simple")]
    ControlSimpleValueNoMultiline,

    #[error("required field missing in control file: {0}")]
    ControlRequiredFieldMissing(String),

    #[error("failed to parse dependency expression: {0}")]
    DependencyParse(String),

    #[error("source control file must have exactly 1 paragraph; got {0}")]
    SourceControlParagraphMismatch(usize),

    #[error("Package-List entry missing {0} field")]
    PackageListFieldMissing(&'static str),

    #[error("checksum line missing {0} field")]
    ChecksumLineFieldMissing(&'static str),

    #[error("checksum line has trailing data: {0}")]
    ChecksumLineTrailingData(String),

    #[error("external command {command} failed: {message}")]
    ExternalCommandFailed { command: String, message: String },

    #[error("required external tool not found on PATH: {0}")]
    ToolNotFound(String),

    #[error("formatting error in debian/copyright on line {0}")]
    CopyrightFormatError(usize),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, BoltError>;
