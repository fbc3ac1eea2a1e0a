// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Source downloading and the layered source cache.

Generalizes the lock-then-rename pattern of a blocking HTTP downloader into
a tagged-blob cache: a URL is first resolved to a stable tag (derived from
its `ETag`/`Last-Modified` headers), the blob is published under that tag,
and a symlink named after the caller's chosen key is atomically pointed at
it. This lets two different logical names share one blob, and lets a
republish swap the symlink without disturbing readers of the old blob.
*/

use {
    crate::{
        error::{BoltError, Result},
        io::ContentDigest,
    },
    fs2::FileExt,
    sha2::Digest,
    slog::{warn, Logger},
    std::{
        fs::File,
        io::Read,
        path::{Path, PathBuf},
        time::{SystemTime, UNIX_EPOCH},
    },
    url::Url,
};

/// Obtain an HTTP client, taking proxy environment variables into account.
pub fn get_http_client() -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::ClientBuilder::new()
        .connect_timeout(std::time::Duration::from_secs(30))
        .timeout(std::time::Duration::from_secs(30));

    for (key, value) in std::env::vars() {
        let key = key.to_lowercase();
        if let Some(schema) = key.strip_suffix("_proxy") {
            if let Ok(url) = Url::parse(&value) {
                let proxy = match schema {
                    "http" => reqwest::Proxy::http(url.as_str()).ok(),
                    "https" => reqwest::Proxy::https(url.as_str()).ok(),
                    _ => None,
                };

                if let Some(proxy) = proxy {
                    builder = builder.proxy(proxy);
                }
            }
        }
    }

    Ok(builder.build()?)
}

fn sha256_of_path(path: &Path) -> Result<ContentDigest> {
    let fh = File::open(path)?;
    let mut reader = std::io::BufReader::new(fh);
    let mut hasher = sha2::Sha256::new();

    let mut buffer = [0u8; 32768];
    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    Ok(ContentDigest::Sha256(hasher.finalize().to_vec()))
}

/// Thin wrapper around a blocking HTTP client for retrieving sources.
pub struct Downloader {
    client: reqwest::blocking::Client,
    logger: Logger,
}

impl Downloader {
    pub fn new(logger: Logger) -> Result<Self> {
        Ok(Self {
            client: get_http_client()?,
            logger,
        })
    }

    /// GET a URL fully into memory, optionally verifying its SHA-256 digest.
    pub fn get(&self, url: &str, expected_sha256: Option<&str>) -> Result<Vec<u8>> {
        warn!(self.logger, "downloading {}", url);

        let parsed = Url::parse(url)?;

        let data = if parsed.scheme() == "file" {
            let path = parsed
                .to_file_path()
                .map_err(|_| BoltError::DownloadError {
                    url: url.to_string(),
                    message: "invalid file:// URL".to_string(),
                })?;
            std::fs::read(path)?
        } else {
            let mut response =
                self.client
                    .get(parsed)
                    .send()
                    .map_err(|e| BoltError::DownloadError {
                        url: url.to_string(),
                        message: e.to_string(),
                    })?;

            if !response.status().is_success() {
                return Err(BoltError::DownloadError {
                    url: url.to_string(),
                    message: format!("HTTP status {}", response.status()),
                });
            }

            let mut data = Vec::new();
            response.read_to_end(&mut data)?;
            data
        };

        if let Some(expected) = expected_sha256 {
            let mut hasher = sha2::Sha256::new();
            hasher.update(&data);
            let got = hex::encode(hasher.finalize());

            if !got.eq_ignore_ascii_case(expected) {
                return Err(BoltError::ChecksumMismatch {
                    path: url.to_string(),
                    expected: expected.to_string(),
                    actual: got,
                });
            }
        }

        Ok(data)
    }

    /// Resolve a URL to a stable tag suitable for cache-blob naming.
    ///
    /// Derived from `ETag`/`Last-Modified` response headers (via a HEAD
    /// request) plus randomness, hashed and truncated to 16 hex characters.
    pub fn tag(&self, url: &str) -> Result<String> {
        let parsed = Url::parse(url)?;

        let (etag, last_modified) = if parsed.scheme() == "file" {
            (String::new(), String::new())
        } else {
            let response = self
                .client
                .head(parsed)
                .send()
                .map_err(|e| BoltError::DownloadError {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;

            let etag = response
                .headers()
                .get("etag")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let last_modified = response
                .headers()
                .get("last-modified")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            (etag, last_modified)
        };

        let nonce: String = {
            let seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            format!("{:x}", seed)
        };

        let mut hasher = sha2::Sha256::new();
        hasher.update(etag.as_bytes());
        hasher.update(last_modified.as_bytes());
        hasher.update(nonce.as_bytes());

        Ok(hex::encode(hasher.finalize())[..16].to_string())
    }
}

/// Atomically publish `data` into `dir/<tag>` and point `symlink_path` at it.
///
/// Both the blob publication and the symlink repoint are performed by
/// writing to a temporary sibling then renaming, so a reader never observes
/// a partially-written blob or a dangling symlink.
pub fn download_named_tag(
    dir: &Path,
    symlink_path: &Path,
    tag: &str,
    data: &[u8],
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let blob_path = dir.join(tag);

    if !blob_path.exists() {
        let temp_path = dir.join(format!("{}.tmp", tag));
        std::fs::write(&temp_path, data)?;
        std::fs::rename(&temp_path, &blob_path)?;
    }

    let symlink_tmp = symlink_path.with_extension("tmp");
    let _ = std::fs::remove_file(&symlink_tmp);

    #[cfg(unix)]
    std::os::unix::fs::symlink(tag, &symlink_tmp)?;
    #[cfg(not(unix))]
    std::fs::copy(&blob_path, &symlink_tmp)?;

    std::fs::rename(&symlink_tmp, symlink_path)?;

    Ok(blob_path)
}

/// Layered cache for upstream source tarballs and patches.
///
/// Lookup order: local on-disk cache, repository mirror, upstream URL. Any
/// blob that arrives over the network is SHA-256 verified before it is
/// published into the cache.
pub struct SourceCache {
    cache_dir: PathBuf,
    release: String,
}

impl SourceCache {
    pub fn new(cache_dir: impl Into<PathBuf>, release: impl Into<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            release: release.into(),
        }
    }

    /// The first-letter bucket used in the cache path: `lib` packages are
    /// bucketed by their 4th character (e.g. `libfoo` → `f`), others by their
    /// first.
    fn first_letter(package: &str) -> char {
        if let Some(rest) = package.strip_prefix("lib") {
            rest.chars().next().unwrap_or('_')
        } else {
            package.chars().next().unwrap_or('_')
        }
    }

    /// Directory that holds the cached copy of a given package/version/filename.
    pub fn entry_path(&self, repo: &str, package: &str, version: &str, filename: &str) -> PathBuf {
        self.cache_dir
            .join(&self.release)
            .join("sources")
            .join(repo)
            .join(Self::first_letter(package).to_string())
            .join(package)
            .join(version)
            .join(filename)
    }

    /// Fetch from the local cache, falling back to `mirror_url` and finally
    /// `upstream_url`, verifying `sha256` on any network hit and publishing
    /// the result into the cache.
    pub fn find_and_retrieve(
        &self,
        downloader: &Downloader,
        repo: &str,
        package: &str,
        version: &str,
        filename: &str,
        mirror_url: Option<&str>,
        upstream_url: &str,
        sha256: &str,
    ) -> Result<Vec<u8>> {
        let cached_path = self.entry_path(repo, package, version, filename);

        if cached_path.exists() {
            let digest = sha256_of_path(&cached_path)?;
            if digest.digest_hex().eq_ignore_ascii_case(sha256) {
                return Ok(std::fs::read(&cached_path)?);
            }

            // Quarantine the stale/corrupt copy; it will be refetched below.
            std::fs::remove_file(&cached_path)?;
        }

        let data = if let Some(mirror_url) = mirror_url {
            match downloader.get(mirror_url, Some(sha256)) {
                Ok(data) => data,
                Err(e) => {
                    warn!(
                        downloader.logger,
                        "mirror fetch of {} failed ({}), falling back to upstream", mirror_url, e
                    );
                    downloader.get(upstream_url, Some(sha256))?
                }
            }
        } else {
            downloader.get(upstream_url, Some(sha256))?
        };

        if let Some(parent) = cached_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp_path = cached_path.with_extension("tmp");
        std::fs::write(&temp_path, &data)?;
        std::fs::rename(&temp_path, &cached_path)?;

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_letter_rule() {
        assert_eq!(SourceCache::first_letter("libfoo"), 'f');
        assert_eq!(SourceCache::first_letter("gcc"), 'g');
        assert_eq!(SourceCache::first_letter("lib"), '_');
    }

    #[test]
    fn entry_path_layout() {
        let cache = SourceCache::new("/var/cache/bolt", "stable");
        let path = cache.entry_path("core", "libfoo", "1.0-1", "libfoo_1.0.orig.tar.xz");
        assert_eq!(
            path,
            PathBuf::from("/var/cache/bolt/stable/sources/core/f/libfoo/1.0-1/libfoo_1.0.orig.tar.xz")
        );
    }

    #[test]
    fn download_named_tag_publishes_blob_and_symlink() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache_dir = dir.path().join("blobs");
        let symlink_path = dir.path().join("latest");

        download_named_tag(&cache_dir, &symlink_path, "abc123", b"payload")?;

        assert_eq!(std::fs::read(cache_dir.join("abc123"))?, b"payload");
        assert_eq!(std::fs::read(&symlink_path)?, b"payload");

        Ok(())
    }
}
