//! Repository index regeneration and signing.
//!
//! Runs once per physical repository directory after every build destined
//! for it has landed. Debian-style trees get per-directory package
//! indices plus a signed release manifest at the codename level;
//! RPM-style trees get their directory metadata regenerated in place.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ProductConfig;
use crate::distro::{Arch, Distro, PackageFormat};
use crate::error::{Error, Result};
use crate::process::{run_tool, Toolchain};
use crate::version::VersionSpec;

/// Regenerates and signs repository metadata.
pub struct RepositoryPublisher<'a> {
    config: &'a ProductConfig,
    toolchain: &'a Toolchain,
}

impl<'a> RepositoryPublisher<'a> {
    pub fn new(config: &'a ProductConfig, toolchain: &'a Toolchain) -> Self {
        Self { config, toolchain }
    }

    /// Publish the repository directory a unit's packages landed in.
    pub fn publish(&self, distro: Distro, version: &VersionSpec, repo_dir: &Path) -> Result<()> {
        match distro.format() {
            PackageFormat::Deb => self.publish_deb(distro, version, repo_dir),
            PackageFormat::Rpm => self.publish_rpm(repo_dir),
        }
    }

    /// Regenerate package indices for every populated directory under the
    /// apt tree, then rewrite and sign the codename-level Release file.
    fn publish_deb(&self, distro: Distro, version: &VersionSpec, repo_dir: &Path) -> Result<()> {
        let (apt_root, codename_dir) = locate_dists_level(repo_dir)?;

        for dir in dirs_with_packages(&apt_root, "deb")? {
            self.scan_packages(&apt_root, &dir)?;
        }

        self.write_release(distro, version, &codename_dir)?;
        self.sign_release(&codename_dir)
    }

    /// Run the package scanner for one directory and write its index plus
    /// a compressed copy.
    fn scan_packages(&self, apt_root: &Path, dir: &Path) -> Result<()> {
        let rel = dir
            .strip_prefix(apt_root)
            .map_err(|_| Error::publish(format!("'{}' is outside the apt tree", dir.display())))?;
        let output = run_tool(
            &self.toolchain.dpkg_scanpackages,
            &[rel.as_os_str(), OsStr::new("/dev/null")],
            apt_root,
        )
        .map_err(as_publish)?;

        fs::write(dir.join("Packages"), &output.stdout)?;

        let gz = File::create(dir.join("Packages.gz"))?;
        let mut encoder = GzEncoder::new(gz, Compression::best());
        encoder.write_all(&output.stdout)?;
        encoder.finish().map_err(|err| {
            Error::publish(format!("compressing index for '{}': {}", dir.display(), err))
        })?;
        Ok(())
    }

    /// Rewrite the Release manifest: a fixed preamble followed by the
    /// checksum section emitted by the archive tool. Stale manifests and
    /// signatures are removed first so a failed signing pass never leaves
    /// a current signature over new contents.
    fn write_release(
        &self,
        distro: Distro,
        version: &VersionSpec,
        codename_dir: &Path,
    ) -> Result<()> {
        for stale in ["Release", "Release.gpg"] {
            let path = codename_dir.join(stale);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }

        let codename = codename_dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::publish(format!("bad codename dir '{}'", codename_dir.display()))
            })?;
        let branch = if version.is_pre_release() {
            "testing".to_string()
        } else {
            version.branch()
        };
        let component = format!(
            "{}{}/{}/{}",
            self.config.product,
            self.config.suffix(version.minor_version()),
            branch,
            distro.repo_component()
        );
        let arches = Arch::ALL
            .iter()
            .map(|a| distro.arch_name(*a))
            .collect::<Vec<_>>()
            .join(" ");

        let mut release = format!(
            "Origin: {origin}\nLabel: {label}\nSuite: {codename}\nCodename: {codename}\nArchitectures: {arches}\nComponents: {component}\nDescription: {description}\n",
            origin = self.config.repo_origin,
            label = self.config.repo_label,
            codename = codename,
            arches = arches,
            component = component,
            description = self.config.repo_description,
        );

        let output = run_tool(
            &self.toolchain.apt_ftparchive,
            &["release", "."],
            codename_dir,
        )
        .map_err(as_publish)?;
        release.push_str(&output.stdout_string());

        fs::write(codename_dir.join("Release"), release)?;
        Ok(())
    }

    /// Detach-sign the Release file with the first identity in the local
    /// keyring.
    fn sign_release(&self, codename_dir: &Path) -> Result<()> {
        let keys = run_tool(&self.toolchain.gpg, &["--list-keys"], codename_dir)
            .map_err(as_publish)?;
        let identity = keys
            .stdout_string()
            .lines()
            .find_map(|line| line.strip_prefix("uid").map(|rest| rest.trim().to_string()))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::publish("no signing identity in the local keyring"))?;

        run_tool(
            &self.toolchain.gpg,
            &[
                "-r",
                identity.as_str(),
                "--no-secmem-warning",
                "-abs",
                "--output",
                "Release.gpg",
                "Release",
            ],
            codename_dir,
        )
        .map_err(as_publish)?;
        Ok(())
    }

    /// Regenerate the directory-level metadata for an RPM architecture
    /// directory.
    fn publish_rpm(&self, repo_dir: &Path) -> Result<()> {
        let arch_dir = repo_dir.parent().ok_or_else(|| {
            Error::publish(format!("repo dir '{}' has no parent", repo_dir.display()))
        })?;
        run_tool(&self.toolchain.createrepo, &["."], arch_dir).map_err(as_publish)?;
        Ok(())
    }
}

fn as_publish(err: Error) -> Error {
    Error::publish(err.to_string())
}

/// Walk up from a unit repository directory to the apt tree root and the
/// `dists/<codename>` level it publishes under.
fn locate_dists_level(repo_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let mut cur = repo_dir;
    while let Some(parent) = cur.parent() {
        if parent.file_name() == Some(OsStr::new("dists")) {
            let apt_root = parent.parent().ok_or_else(|| {
                Error::publish(format!("dists dir '{}' has no parent", parent.display()))
            })?;
            return Ok((apt_root.to_path_buf(), cur.to_path_buf()));
        }
        cur = parent;
    }
    Err(Error::publish(format!(
        "'{}' is not under a dists/<codename> tree",
        repo_dir.display()
    )))
}

/// Directories under `root` holding at least one file with `extension`.
fn dirs_with_packages(root: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry =
            entry.map_err(|err| Error::publish(format!("walking '{}': {}", root.display(), err)))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let has_package = fs::read_dir(entry.path())?.any(|child| {
            child
                .map(|c| {
                    c.path().extension().and_then(|e| e.to_str()) == Some(extension)
                        && c.path().is_file()
                })
                .unwrap_or(false)
        });
        if has_package {
            dirs.push(entry.path().to_path_buf());
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn locate_dists_level_finds_root_and_codename() {
        let repo = Path::new("/r/apt/debian/dists/wheezy/ferrodb-org/3.2/main/binary-amd64");
        let (apt_root, codename_dir) = locate_dists_level(repo).unwrap();
        assert_eq!(apt_root, Path::new("/r/apt/debian"));
        assert_eq!(codename_dir, Path::new("/r/apt/debian/dists/wheezy"));
    }

    #[test]
    fn locate_dists_level_rejects_foreign_paths() {
        assert!(locate_dists_level(Path::new("/r/yum/redhat/62")).is_err());
    }

    #[test]
    fn dirs_with_packages_finds_only_populated_dirs() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("dists/wheezy/main/binary-amd64");
        let b = temp.path().join("dists/wheezy/main/binary-i386");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::write(a.join("ferrodb-org_3.2.1_amd64.deb"), "pkg").unwrap();

        let dirs = dirs_with_packages(temp.path(), "deb").unwrap();
        assert_eq!(dirs, vec![a]);
    }
}
