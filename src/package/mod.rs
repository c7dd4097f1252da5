//! Native package builds.
//!
//! Dispatches a staged unit to the Debian or RPM toolchain by family tag
//! and lands the produced package file in its repository directory. The
//! two paths never share an execution path.

mod deb;
mod rpm;

use std::fs;
use std::path::{Path, PathBuf};
use time::Date;

use crate::config::ProductConfig;
use crate::distro::{Arch, Distro, PackageFormat};
use crate::error::{Error, Result};
use crate::process::Toolchain;
use crate::version::VersionSpec;

/// Builds native packages out of staging trees.
pub struct PackageBuilder<'a> {
    config: &'a ProductConfig,
    toolchain: &'a Toolchain,
    repo_root: PathBuf,
    today: Date,
}

impl<'a> PackageBuilder<'a> {
    pub fn new(
        config: &'a ProductConfig,
        toolchain: &'a Toolchain,
        repo_root: &Path,
        today: Date,
    ) -> Self {
        Self {
            config,
            toolchain,
            repo_root: repo_root.to_path_buf(),
            today,
        }
    }

    /// Build the unit's package and return the repository directory it
    /// was placed in.
    pub fn build(
        &self,
        distro: Distro,
        tag: &str,
        arch: Arch,
        version: &VersionSpec,
        staging: &Path,
    ) -> Result<PathBuf> {
        let repo_dir = self
            .repo_root
            .join(distro.repo_directory(self.config, arch, tag, version)?);
        fs::create_dir_all(&repo_dir)?;

        match distro.format() {
            PackageFormat::Deb => deb::build(
                self.toolchain,
                &self.config.deb_signing_key,
                distro,
                arch,
                staging,
                &repo_dir,
            )?,
            PackageFormat::Rpm => rpm::build(
                self.config,
                self.toolchain,
                distro,
                tag,
                arch,
                version,
                self.today,
                staging,
                &repo_dir,
            )?,
        }
        Ok(repo_dir)
    }
}

/// Copy every file matching `extension` from `src_dir` into `dest_dir`.
///
/// Producing zero matches means the external builder claimed success
/// without leaving a package behind, which is treated as a tool failure.
fn collect_packages(src_dir: &Path, extension: &str, dest_dir: &Path, tool: &str) -> Result<()> {
    let mut found = 0usize;
    for entry in fs::read_dir(src_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension) && path.is_file() {
            let name = entry.file_name();
            fs::copy(&path, dest_dir.join(name))?;
            found += 1;
        }
    }
    if found == 0 {
        return Err(Error::BuildTool {
            tool: tool.to_string(),
            status: 0,
            stderr: format!("no .{} produced under '{}'", extension, src_dir.display()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn collect_packages_copies_matches() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("dest");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(src.join("a.deb"), "pkg").unwrap();
        fs::write(src.join("b.changes"), "meta").unwrap();

        collect_packages(&src, "deb", &dest, "dpkg-buildpackage").unwrap();

        assert!(dest.join("a.deb").exists());
        assert!(!dest.join("b.changes").exists());
    }

    #[test]
    fn collect_packages_requires_at_least_one() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("dest");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dest).unwrap();

        let err = collect_packages(&src, "rpm", &dest, "rpmbuild").unwrap_err();
        assert!(matches!(err, Error::BuildTool { .. }));
    }
}
