// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers: content digests and compression. */

use {
    crate::error::{BoltError, Result},
    digest::Digest,
    std::{
        fmt::Formatter,
        io::{Read, Write},
    },
};

/// Digest algorithm used for a piece of content.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha256,
}

impl ChecksumType {
    /// Name of the field holding this digest type in a control paragraph.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }
}

/// Represents a content digest.
#[derive(Clone, Eq, PartialEq, PartialOrd)]
pub enum ContentDigest {
    /// An MD5 digest.
    Md5(Vec<u8>),
    /// A SHA-1 digest.
    Sha1(Vec<u8>),
    /// A SHA-256 digest.
    Sha256(Vec<u8>),
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5(data) => write!(f, "Md5({})", hex::encode(data)),
            Self::Sha1(data) => write!(f, "Sha1({})", hex::encode(data)),
            Self::Sha256(data) => write!(f, "Sha256({})", hex::encode(data)),
        }
    }
}

impl ContentDigest {
    /// Create a new MD5 instance by parsing a hex digest.
    pub fn md5_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Md5, digest)
    }

    /// Create a new SHA-1 instance by parsing a hex digest.
    pub fn sha1_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Sha1, digest)
    }

    /// Create a new SHA-256 instance by parsing a hex digest.
    pub fn sha256_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Sha256, digest)
    }

    /// Obtain an instance by parsing a hex string as a [ChecksumType].
    pub fn from_hex_digest(checksum: ChecksumType, digest: &str) -> Result<Self> {
        let digest = hex::decode(digest)?;

        Ok(match checksum {
            ChecksumType::Md5 => Self::Md5(digest),
            ChecksumType::Sha1 => Self::Sha1(digest),
            ChecksumType::Sha256 => Self::Sha256(digest),
        })
    }

    /// Compute the digest of a byte slice directly.
    pub fn compute(checksum: ChecksumType, data: &[u8]) -> Self {
        match checksum {
            ChecksumType::Md5 => Self::Md5(md5::Md5::digest(data).to_vec()),
            ChecksumType::Sha1 => Self::Sha1(sha1::Sha1::digest(data).to_vec()),
            ChecksumType::Sha256 => Self::Sha256(sha2::Sha256::digest(data).to_vec()),
        }
    }

    /// Obtain the digest bytes for this content digest.
    pub fn digest_bytes(&self) -> &[u8] {
        match self {
            Self::Md5(x) => x,
            Self::Sha1(x) => x,
            Self::Sha256(x) => x,
        }
    }

    /// Obtain the hex encoded content digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest_bytes())
    }

    /// Obtain the [ChecksumType] for this digest.
    pub fn checksum_type(&self) -> ChecksumType {
        match self {
            Self::Md5(_) => ChecksumType::Md5,
            Self::Sha1(_) => ChecksumType::Sha1,
            Self::Sha256(_) => ChecksumType::Sha256,
        }
    }

    /// Obtain the name of the field in `Packages`/`Release`-style index files
    /// that holds this digest type.
    pub fn release_field_name(&self) -> &'static str {
        self.checksum_type().field_name()
    }
}

/// Compression format used by package primitives.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Compression {
    /// No compression (no extension).
    None,

    /// XZ compression (.xz extension).
    Xz,

    /// Gzip compression (.gz extension).
    Gzip,

    /// Bzip2 compression (.bz2 extension).
    Bzip2,
}

impl Compression {
    /// Filename extension for files compressed in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Xz => ".xz",
            Self::Gzip => ".gz",
            Self::Bzip2 => ".bz2",
        }
    }

    /// Infer compression from a filename's extension.
    pub fn from_filename(filename: &str) -> Self {
        if filename.ends_with(".xz") {
            Self::Xz
        } else if filename.ends_with(".gz") {
            Self::Gzip
        } else if filename.ends_with(".bz2") {
            Self::Bzip2
        } else {
            Self::None
        }
    }

    /// The default retrieval preference order for clients probing for a compressed variant.
    pub fn default_preferred_order() -> impl Iterator<Item = Compression> {
        [Self::Xz, Self::Gzip, Self::Bzip2, Self::None].into_iter()
    }
}

/// Wrap a reader with transparent decompression.
pub fn read_decompressed<'a>(
    stream: Box<dyn Read + 'a>,
    compression: Compression,
) -> Result<Box<dyn Read + 'a>> {
    Ok(match compression {
        Compression::None => stream,
        Compression::Gzip => Box::new(libflate::gzip::Decoder::new(stream)?),
        Compression::Xz => {
            return Err(BoltError::ArchiveError(
                "xz decompression requires the `xz` external helper; not implemented as a pure reader".to_string(),
            ))
        }
        Compression::Bzip2 => {
            return Err(BoltError::ArchiveError(
                "bzip2 decompression requires the `bunzip2` external helper; not implemented as a pure reader".to_string(),
            ))
        }
    })
}

/// Wrap a writer with transparent compression.
pub fn write_compressed<'a>(
    dest: Box<dyn Write + 'a>,
    compression: Compression,
) -> Result<Box<dyn Write + 'a>> {
    Ok(match compression {
        Compression::None => dest,
        Compression::Gzip => Box::new(libflate::gzip::Encoder::new(dest)?),
        Compression::Xz | Compression::Bzip2 => {
            return Err(BoltError::ArchiveError(format!(
                "{:?} compression is not supported for writing",
                compression
            )))
        }
    })
}

/// Drain content from a reader to a black hole, returning the number of bytes read.
pub fn drain_reader(mut reader: impl Read) -> std::io::Result<u64> {
    std::io::copy(&mut reader, &mut std::io::sink())
}

/// A [Read] adapter that validates source size and digest once fully consumed.
///
/// Validation only occurs once the expected source size bytes have been read. If
/// the reader is never drained to completion, no validation occurs.
pub struct ContentValidatingReader<R> {
    source: R,
    hasher: Option<MultiDigester>,
    expected_size: u64,
    expected_digest: ContentDigest,
    bytes_read: u64,
}

impl<R> ContentValidatingReader<R> {
    /// Create a new instance bound to a source and having expected size and content digest.
    pub fn new(source: R, expected_size: u64, expected_digest: ContentDigest) -> Self {
        Self {
            source,
            hasher: Some(MultiDigester::default()),
            expected_size,
            expected_digest,
            bytes_read: 0,
        }
    }
}

impl<R> Read for ContentValidatingReader<R>
where
    R: Read,
{
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let size = self.source.read(buf)?;

        if size > 0 {
            if let Some(hasher) = self.hasher.as_mut() {
                hasher.update(&buf[0..size]);
            }

            self.bytes_read += size as u64;
        }

        match self.bytes_read.cmp(&self.expected_size) {
            std::cmp::Ordering::Equal => {
                if let Some(hasher) = self.hasher.take() {
                    let got = hasher.finish();
                    let got_digest = got.digest_from_checksum(self.expected_digest.checksum_type());

                    if got_digest != &self.expected_digest {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!(
                                "digest mismatch of retrieved content: expected {}, got {}",
                                self.expected_digest.digest_hex(),
                                got_digest.digest_hex()
                            ),
                        ));
                    }
                }
            }
            std::cmp::Ordering::Greater => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!(
                        "extra bytes read: expected {}; got {}",
                        self.expected_size, self.bytes_read
                    ),
                ));
            }
            std::cmp::Ordering::Less => {}
        }

        Ok(size)
    }
}

/// Holds multiple flavors of content digests for the same content.
#[derive(Clone, Debug)]
pub struct MultiContentDigest {
    pub md5: ContentDigest,
    pub sha1: ContentDigest,
    pub sha256: ContentDigest,
}

impl MultiContentDigest {
    /// Whether this digest matches another one of a (possibly different) type.
    pub fn matches_digest(&self, other: &ContentDigest) -> bool {
        match other {
            ContentDigest::Md5(_) => &self.md5 == other,
            ContentDigest::Sha1(_) => &self.sha1 == other,
            ContentDigest::Sha256(_) => &self.sha256 == other,
        }
    }

    /// Obtain the [ContentDigest] for a given [ChecksumType].
    pub fn digest_from_checksum(&self, checksum: ChecksumType) -> &ContentDigest {
        match checksum {
            ChecksumType::Md5 => &self.md5,
            ChecksumType::Sha1 => &self.sha1,
            ChecksumType::Sha256 => &self.sha256,
        }
    }

    /// Obtain an iterator of [ContentDigest] in this instance.
    pub fn iter_digests(&self) -> impl Iterator<Item = &ContentDigest> + '_ {
        [&self.md5, &self.sha1, &self.sha256].into_iter()
    }
}

/// A content digester that simultaneously computes multiple digest types.
pub struct MultiDigester {
    md5: md5::Md5,
    sha1: sha1::Sha1,
    sha256: sha2::Sha256,
}

impl Default for MultiDigester {
    fn default() -> Self {
        Self {
            md5: md5::Md5::new(),
            sha1: sha1::Sha1::new(),
            sha256: sha2::Sha256::new(),
        }
    }
}

impl MultiDigester {
    /// Write content into the digesters.
    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.sha256.update(data);
    }

    /// Finish digesting content, consuming the instance.
    pub fn finish(self) -> MultiContentDigest {
        MultiContentDigest {
            md5: ContentDigest::Md5(self.md5.finalize().to_vec()),
            sha1: ContentDigest::Sha1(self.sha1.finalize().to_vec()),
            sha256: ContentDigest::Sha256(self.sha256.finalize().to_vec()),
        }
    }
}

/// A [Read] adapter that computes multiple [ContentDigest] as data is read.
pub struct DigestingReader<R> {
    digester: MultiDigester,
    source: R,
}

impl<R> DigestingReader<R> {
    /// Construct a new instance from a source reader.
    pub fn new(source: R) -> Self {
        Self {
            digester: MultiDigester::default(),
            source,
        }
    }

    /// Finish the stream, returning the source reader and resolved digests.
    pub fn finish(self) -> (R, MultiContentDigest) {
        (self.source, self.digester.finish())
    }
}

impl<R> Read for DigestingReader<R>
where
    R: Read,
{
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let size = self.source.read(buf)?;

        if size > 0 {
            self.digester.update(&buf[0..size]);
        }

        Ok(size)
    }
}

/// A [Write] adapter that computes multiple [ContentDigest] as data is written.
pub struct DigestingWriter<W> {
    digester: MultiDigester,
    dest: W,
}

impl<W> DigestingWriter<W> {
    /// Construct a new instance from a destination writer.
    pub fn new(dest: W) -> Self {
        Self {
            digester: MultiDigester::default(),
            dest,
        }
    }

    /// Finish the stream, returning the destination writer and resolved digests.
    pub fn finish(self) -> (W, MultiContentDigest) {
        (self.dest, self.digester.finish())
    }
}

impl<W> Write for DigestingWriter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let size = self.dest.write(buf)?;

        if size > 0 {
            self.digester.update(&buf[0..size]);
        }

        Ok(size)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.dest.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_compute_matches_known_vector() {
        let digest = ContentDigest::compute(ChecksumType::Sha256, b"");
        assert_eq!(
            digest.digest_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digesting_writer_roundtrip() {
        let mut writer = DigestingWriter::new(Vec::new());
        writer.write_all(b"hello world").unwrap();
        let (buf, digest) = writer.finish();
        assert_eq!(buf, b"hello world");
        assert_eq!(
            digest.sha256.digest_hex(),
            hex::encode(sha2::Sha256::digest(b"hello world"))
        );
    }

    #[test]
    fn content_validating_reader_detects_mismatch() {
        let data = b"hello".to_vec();
        let wrong_digest = ContentDigest::sha256_hex(
            "0000000000000000000000000000000000000000000000000000000000000000",
        );
        assert!(wrong_digest.is_err() || {
            let mut reader = ContentValidatingReader::new(
                data.as_slice(),
                data.len() as u64,
                ContentDigest::Sha256(vec![0u8; 32]),
            );
            let mut out = Vec::new();
            reader.read_to_end(&mut out).is_err()
        });
    }
}
