//! Staging tree assembly.
//!
//! One staging directory per (distro, OS version, arch, version) unit,
//! holding the extracted release binaries plus the packaging metadata
//! (control/spec files, init scripts, changelog) checked out at the
//! version's pinned revision. Rebuilt from scratch on every run, so
//! re-assembly is idempotent; the tree is left on disk afterwards for
//! inspection.

use flate2::read::GzDecoder;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tar::Archive;

use crate::config::ProductConfig;
use crate::distro::{Arch, Distro, PackageFormat};
use crate::error::{Error, Result};
use crate::fsutil::{copy_dir_recursive, recreate_dir};
use crate::process::{run_tool, Toolchain};
use crate::version::VersionSpec;

/// Where the packaging metadata templates come from.
///
/// Production runs check out a pinned revision from a git repository;
/// plain directories serve offline runs and tests. Both populate the
/// staging tree's `debian/` and `rpm/` subtrees.
#[derive(Debug, Clone)]
pub enum MetadataSource {
    Git { repo: PathBuf },
    LocalDir(PathBuf),
}

impl MetadataSource {
    pub fn is_git(&self) -> bool {
        matches!(self, MetadataSource::Git { .. })
    }

    /// Materialize one metadata subtree at `revision` into `dest`.
    ///
    /// The git path captures `git archive` output and unpacks it
    /// in-process; the archive already carries the `subtree/` prefix.
    /// Local directories ignore the revision.
    fn checkout(
        &self,
        toolchain: &Toolchain,
        subtree: &str,
        revision: &str,
        dest: &Path,
    ) -> Result<()> {
        match self {
            MetadataSource::Git { repo } => {
                let output = run_tool(
                    &toolchain.git,
                    &["archive", "--format=tar", revision, subtree],
                    repo,
                )
                .map_err(|err| {
                    Error::staging(format!(
                        "checking out '{}' at '{}' from '{}': {}",
                        subtree,
                        revision,
                        repo.display(),
                        err
                    ))
                })?;
                Archive::new(&output.stdout[..]).unpack(dest).map_err(|err| {
                    Error::staging(format!(
                        "unpacking metadata subtree '{}' into '{}': {}",
                        subtree,
                        dest.display(),
                        err
                    ))
                })
            }
            MetadataSource::LocalDir(dir) => {
                let src = dir.join(subtree);
                if !src.is_dir() {
                    return Err(Error::staging(format!(
                        "metadata source has no '{}' subtree under '{}'",
                        subtree,
                        dir.display()
                    )));
                }
                copy_dir_recursive(&src, &dest.join(subtree))
            }
        }
    }
}

/// Builds per-unit staging directories.
pub struct StagingAssembler<'a> {
    config: &'a ProductConfig,
    toolchain: &'a Toolchain,
    staging_root: PathBuf,
}

impl<'a> StagingAssembler<'a> {
    pub fn new(config: &'a ProductConfig, toolchain: &'a Toolchain, staging_root: &Path) -> Self {
        Self {
            config,
            toolchain,
            staging_root: staging_root.to_path_buf(),
        }
    }

    /// Deterministic staging path for a unit.
    pub fn staging_path(
        &self,
        distro: Distro,
        tag: &str,
        arch: Arch,
        version: &VersionSpec,
    ) -> PathBuf {
        let name = format!(
            "{}-{}",
            self.config.package_name(version.minor_version()),
            version.package_version(PackageFormat::Deb)
        );
        self.staging_root
            .join(arch.as_str())
            .join(distro.name())
            .join(tag)
            .join(name)
    }

    /// Assemble the staging tree for a unit and return its path.
    pub fn assemble(
        &self,
        distro: Distro,
        tag: &str,
        arch: Arch,
        version: &VersionSpec,
        metadata: &MetadataSource,
        tarball: &Path,
    ) -> Result<PathBuf> {
        let dir = self.staging_path(distro, tag, arch, version);
        recreate_dir(&dir)?;

        let revision = version.metadata_revision();
        metadata.checkout(self.toolchain, "debian", &revision, &dir)?;
        metadata.checkout(self.toolchain, "rpm", &revision, &dir)?;

        extract_release_tarball(tarball, &dir)?;

        for excluded in &self.config.excluded_binaries {
            let path = dir.join(excluded);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }

        self.fix_init_scripts(distro, version, &dir)?;

        if distro.format() == PackageFormat::Deb {
            self.finish_debian_metadata(distro, version, &dir)?;
        }

        Ok(dir)
    }

    /// Keep the init mechanism the target family uses and drop the other.
    fn fix_init_scripts(&self, distro: Distro, version: &VersionSpec, dir: &Path) -> Result<()> {
        let pkg = self.config.package_name(version.minor_version());
        let daemon = &self.config.daemon;
        match distro {
            Distro::Debian => {
                link_metadata_file(
                    &dir.join("debian/init.d"),
                    &dir.join(format!("debian/{}-server.{}.init", pkg, daemon)),
                )?;
                remove_metadata_file(&dir.join(format!("debian/{}.upstart", daemon)))
            }
            Distro::Ubuntu => {
                link_metadata_file(
                    &dir.join(format!("debian/{}.upstart", daemon)),
                    &dir.join(format!("debian/{}-server.{}.upstart", pkg, daemon)),
                )?;
                remove_metadata_file(&dir.join("debian/init.d"))
            }
            Distro::Suse => {
                let plain = dir.join(format!("rpm/init.d-{}", daemon));
                remove_metadata_file(&plain)?;
                link_metadata_file(&dir.join(format!("rpm/init.d-{}.suse", daemon)), &plain)
            }
            Distro::Redhat | Distro::Amazon => Ok(()),
        }
    }

    /// Rewrite the changelog for the unit's package name and version, and
    /// install the suffixed control/rules/postinst files.
    fn finish_debian_metadata(
        &self,
        distro: Distro,
        version: &VersionSpec,
        dir: &Path,
    ) -> Result<()> {
        let base = &self.config.package_base;
        let suffix = self.config.suffix(version.minor_version());
        let pkg = self.config.package_name(version.minor_version());
        let deb_version = version.package_version(distro.format());

        let changelog = dir.join("debian/changelog");
        let content = fs::read_to_string(&changelog).map_err(|err| {
            Error::staging(format!("reading '{}': {}", changelog.display(), err))
        })?;
        fs::write(
            &changelog,
            rewrite_changelog(&content, base, suffix, &deb_version),
        )?;

        let control = dir.join(format!("debian/{}.control", pkg));
        copy_metadata_file(&control, &dir.join("debian/control"))?;

        let rules = dir.join(format!("debian/{}.rules", pkg));
        let dest_rules = dir.join("debian/rules");
        copy_metadata_file(&rules, &dest_rules)?;
        fs::set_permissions(&dest_rules, fs::Permissions::from_mode(0o755))?;

        for entry in fs::read_dir(dir.join("debian"))? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(".postinst") || !name.starts_with(base.as_str()) {
                continue;
            }
            let final_name = splice_suffix(name, base, suffix);
            if final_name != name {
                copy_metadata_file(&entry.path(), &dir.join("debian").join(final_name))?;
            }
        }
        Ok(())
    }
}

/// Unpack a gzipped release tarball into `dir`, hoisting the contents of
/// its single top-level wrapper directory up into `dir` itself.
fn extract_release_tarball(tarball: &Path, dir: &Path) -> Result<()> {
    let file = fs::File::open(tarball).map_err(|err| {
        Error::staging(format!("opening tarball '{}': {}", tarball.display(), err))
    })?;
    let unpack_dir = dir.join(".unpack");
    recreate_dir(&unpack_dir)?;
    Archive::new(GzDecoder::new(file))
        .unpack(&unpack_dir)
        .map_err(|err| {
            Error::staging(format!("extracting '{}': {}", tarball.display(), err))
        })?;

    let mut entries = fs::read_dir(&unpack_dir)?
        .collect::<std::io::Result<Vec<_>>>()?;
    let wrapper = match entries.pop() {
        Some(entry) if entries.is_empty() && entry.file_type()?.is_dir() => entry.path(),
        _ => {
            return Err(Error::staging(format!(
                "tarball '{}' does not contain a single top-level directory",
                tarball.display()
            )))
        }
    };

    for entry in fs::read_dir(&wrapper)? {
        let entry = entry?;
        fs::rename(entry.path(), dir.join(entry.file_name()))?;
    }
    fs::remove_dir_all(&unpack_dir)?;

    if !dir.join("bin").is_dir() {
        return Err(Error::staging(format!(
            "tarball '{}' has no bin/ directory",
            tarball.display()
        )));
    }
    Ok(())
}

/// Rewrite a Debian changelog for the suffixed package name and version.
///
/// The first entry line gets the unit's package version; every entry line
/// for the base package is renamed to the suffixed name; maintainer lines
/// are tightened from two leading spaces to one.
pub fn rewrite_changelog(content: &str, base: &str, suffix: &str, version: &str) -> String {
    let entry_prefix = format!("{} (", base);
    let mut version_done = false;
    let mut out = Vec::new();
    for line in content.lines() {
        let mut line = line.to_string();
        if !version_done && line.starts_with(&entry_prefix) {
            let rest = line[entry_prefix.len()..]
                .split_once(')')
                .map(|(_, rest)| rest.to_string())
                .unwrap_or_default();
            line = format!("{} ({}){}", base, version, rest);
            version_done = true;
        }
        if line.starts_with(base) {
            line = format!("{}{}{}", base, suffix, &line[base.len()..]);
        } else if let Some(rest) = line.strip_prefix("  --") {
            line = format!(" --{}", rest);
        }
        out.push(line);
    }
    let mut result = out.join("\n");
    if content.ends_with('\n') {
        result.push('\n');
    }
    result
}

/// Insert `suffix` after the leading `base` in a metadata file name,
/// e.g. `ferrodb-server.postinst` -> `ferrodb-org-server.postinst`.
fn splice_suffix(name: &str, base: &str, suffix: &str) -> String {
    match name.strip_prefix(base) {
        Some(rest) => format!("{}{}{}", base, suffix, rest),
        None => name.to_string(),
    }
}

fn link_metadata_file(src: &Path, dst: &Path) -> Result<()> {
    fs::hard_link(src, dst).map_err(|err| {
        Error::staging(format!(
            "linking '{}' to '{}': {}",
            src.display(),
            dst.display(),
            err
        ))
    })
}

fn remove_metadata_file(path: &Path) -> Result<()> {
    fs::remove_file(path)
        .map_err(|err| Error::staging(format!("removing '{}': {}", path.display(), err)))
}

fn copy_metadata_file(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst).map(|_| ()).map_err(|err| {
        Error::staging(format!(
            "copying '{}' to '{}': {}",
            src.display(),
            dst.display(),
            err
        ))
    })
}
