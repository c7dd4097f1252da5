//! Release tarball acquisition.
//!
//! Tarballs live in an on-disk cache keyed by (version, OS build, arch).
//! Several units can share one tarball (the same arch and OS build across
//! OS-version tags), so downloads are deduplicated: an exclusive file lock
//! per cache key admits one downloader at a time, and everyone re-checks
//! the cache after acquiring the lock. There are no retries; transient
//! network failures are the operator's to re-invoke.

use fs2::FileExt;
use log::info;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ProductConfig;
use crate::distro::Arch;
use crate::error::{Error, Result};
use crate::fsutil::{atomic_move, tmp_name};
use crate::version::VersionSpec;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Obtains release tarballs into the cache directory.
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    cache_dir: PathBuf,
    download_host: String,
    product: String,
}

impl ArtifactFetcher {
    pub fn new(config: &ProductConfig, cache_dir: &Path) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            download_host: config.download_host.clone(),
            product: config.product.clone(),
        }
    }

    /// Deterministic cache path for a (version, OS build, arch) key.
    pub fn cache_path(&self, version: &VersionSpec, os_build: &str, arch: Arch) -> PathBuf {
        self.cache_dir.join(format!(
            "{}-linux-{}-{}-{}.tar.gz",
            self.product,
            version.raw(),
            os_build,
            arch
        ))
    }

    /// Download URL for a (arch, OS build, version) key.
    pub fn download_url(&self, version: &VersionSpec, os_build: &str, arch: Arch) -> String {
        format!(
            "{}/linux/{}-linux-{}-{}-{}.tgz",
            self.download_host,
            self.product,
            arch,
            os_build,
            version.raw()
        )
    }

    /// Place a caller-supplied tarball at the cache path for this key.
    ///
    /// Used for single-unit runs with a local artifact; no network access.
    pub fn adopt_local(
        &self,
        local: &Path,
        version: &VersionSpec,
        os_build: &str,
        arch: Arch,
    ) -> Result<PathBuf> {
        if !local.is_file() {
            return Err(Error::fetch(format!(
                "local tarball '{}' does not exist",
                local.display()
            )));
        }
        let dest = self.cache_path(version, os_build, arch);
        fs::create_dir_all(&self.cache_dir)?;
        let tmp = self.cache_dir.join(tmp_name(".local"));
        fs::copy(local, &tmp)?;
        atomic_move(&tmp, &dest)?;
        info!("adopted local tarball '{}' as '{}'", local.display(), dest.display());
        Ok(dest)
    }

    /// Fetch the tarball for a key, reusing the cache when possible.
    ///
    /// At most one downloader runs per key; concurrent requesters block on
    /// the key's lock file and find the cache populated when they get it.
    pub fn fetch(&self, version: &VersionSpec, os_build: &str, arch: Arch) -> Result<PathBuf> {
        let dest = self.cache_path(version, os_build, arch);
        if dest.is_file() {
            info!("cache hit '{}'", dest.display());
            return Ok(dest);
        }

        fs::create_dir_all(&self.cache_dir)?;
        let _lock = KeyLock::acquire(&dest.with_extension("gz.lock"))?;

        // The lock holder before us may have finished the download.
        if dest.is_file() {
            info!("cache hit after lock '{}'", dest.display());
            return Ok(dest);
        }

        let url = self.download_url(version, os_build, arch);
        self.download(&url, &dest)?;
        Ok(dest)
    }

    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        info!("downloading '{}' to '{}'", url, dest.display());
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| Error::fetch(format!("building HTTP client: {}", err)))?;

        let mut response = client
            .get(url)
            .send()
            .map_err(|err| Error::fetch(format!("GET {}: {}", url, err)))?;

        if !response.status().is_success() {
            return Err(Error::fetch(format!(
                "GET {} returned status {}",
                url,
                response.status()
            )));
        }

        let tmp = dest.with_file_name(tmp_name(".partial"));
        let mut file = File::create(&tmp)?;
        response
            .copy_to(&mut file)
            .map_err(|err| Error::fetch(format!("reading body of {}: {}", url, err)))?;
        file.flush()?;
        drop(file);

        atomic_move(&tmp, dest)?;
        Ok(())
    }
}

/// Sha256 of a cached tarball, recorded in the run report.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// RAII guard: blocks until the key's exclusive lock is held, removes the
/// lock file on drop.
struct KeyLock {
    _file: File,
    path: PathBuf,
}

impl KeyLock {
    fn acquire(path: &Path) -> Result<Self> {
        // Never unlink a "stale" lock file here: a second process could
        // then lock a fresh file at the same path and both would proceed.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
