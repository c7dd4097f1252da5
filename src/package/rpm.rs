//! RPM package builds.
//!
//! Lays out an rpmbuild top directory next to the staging tree, writes a
//! macro file binding the build root and `%dist` tag, archives the
//! staging tree as the source tarball, and invokes the RPM builder with
//! the dynamic version/release values as defines. The produced `.rpm`
//! files are copied into the unit's repository directory.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use time::Date;
use walkdir::WalkDir;

use crate::config::ProductConfig;
use crate::distro::{Arch, Distro, PackageFormat};
use crate::error::{Error, Result};
use crate::process::{run_tool, Toolchain};
use crate::version::VersionSpec;

const TOPDIR_SUBDIRS: [&str; 5] = ["BUILD", "RPMS", "SOURCES", "SPECS", "SRPMS"];

#[allow(clippy::too_many_arguments)]
pub(super) fn build(
    config: &ProductConfig,
    toolchain: &Toolchain,
    distro: Distro,
    tag: &str,
    arch: Arch,
    version: &VersionSpec,
    today: Date,
    staging: &Path,
    repo_dir: &Path,
) -> Result<()> {
    let pkg = config.package_name(version.minor_version());
    let rpm_version = version.package_version(PackageFormat::Rpm);
    let release = version.release_number(PackageFormat::Rpm, today);

    let topdir = topdir_for(staging)?;
    for sub in TOPDIR_SUBDIRS {
        fs::create_dir_all(topdir.join(sub))?;
    }

    let macros = topdir.join("macros");
    fs::write(
        &macros,
        format!(
            "%_topdir {}\n%dist .{}\n%_use_internal_dependency_generator 0\n",
            topdir.display(),
            distro.release_dist(tag)?
        ),
    )?;

    let source_name = format!("{}-{}", pkg, rpm_version);
    write_source_tarball(
        staging,
        &source_name,
        &topdir.join("SOURCES").join(format!("{}.tar.gz", source_name)),
    )?;

    let spec_name = format!("{}.spec", pkg);
    let spec_src = staging.join("rpm").join(&spec_name);
    let spec_dst = topdir.join("SPECS").join(&spec_name);
    fs::copy(&spec_src, &spec_dst).map_err(|err| {
        Error::staging(format!("copying spec '{}': {}", spec_src.display(), err))
    })?;

    run_tool(
        &toolchain.rpmbuild,
        &[
            "--load".to_string(),
            macros.display().to_string(),
            "-ba".to_string(),
            "--target".to_string(),
            arch.as_str().to_string(),
            "-D".to_string(),
            format!("dynamic_version {}", rpm_version),
            "-D".to_string(),
            format!("dynamic_release {}", release),
            format!("SPECS/{}", spec_name),
        ],
        &topdir,
    )?;

    let rpms = topdir.join("RPMS").join(arch.as_str());
    super::collect_packages(&rpms, "rpm", repo_dir, "rpmbuild")
}

/// The rpmbuild top directory for a staging tree, as a sibling so the
/// source tarball never picks up build outputs.
fn topdir_for(staging: &Path) -> Result<PathBuf> {
    let name = staging
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            Error::staging(format!("staging dir '{}' has no name", staging.display()))
        })?;
    Ok(staging.with_file_name(format!("{}.rpmbuild", name)))
}

/// Archive `src_dir` as `<prefix>/...` into a gzipped tarball.
///
/// Entries are appended in sorted order with symlinks preserved, so the
/// same staging tree always produces the same archive listing.
fn write_source_tarball(src_dir: &Path, prefix: &str, out_path: &Path) -> Result<()> {
    let out = File::create(out_path)?;
    let encoder = GzEncoder::new(out, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut entries: Vec<PathBuf> = WalkDir::new(src_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .map(|ent| ent.path().to_path_buf())
        .filter(|p| p != src_dir)
        .collect();
    entries.sort();

    for path in entries {
        let rel = path.strip_prefix(src_dir).map_err(|_| {
            Error::staging(format!(
                "path '{}' escapes source dir '{}'",
                path.display(),
                src_dir.display()
            ))
        })?;
        let name = Path::new(prefix).join(rel);
        if fs::symlink_metadata(&path)?.is_dir() {
            builder.append_dir(&name, &path)?;
        } else {
            builder.append_path_with_name(&path, &name)?;
        }
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(|err| {
            Error::staging(format!(
                "writing source tarball '{}': {}",
                out_path.display(),
                err
            ))
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    #[test]
    fn topdir_is_a_sibling_of_staging() {
        let topdir = topdir_for(Path::new("/work/dst/x86_64/redhat/rhel62/ferrodb-org-3.2.1"))
            .unwrap();
        assert_eq!(
            topdir,
            PathBuf::from("/work/dst/x86_64/redhat/rhel62/ferrodb-org-3.2.1.rpmbuild")
        );
    }

    #[test]
    fn source_tarball_carries_prefix_and_sorted_entries() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("staging");
        fs::create_dir_all(src.join("bin")).unwrap();
        fs::write(src.join("bin/ferrod"), "elf").unwrap();
        fs::write(src.join("README"), "readme").unwrap();

        let out = temp.path().join("src.tar.gz");
        write_source_tarball(&src, "ferrodb-org-3.2.1", &out).unwrap();

        let mut names = Vec::new();
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&out).unwrap()));
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            names.push(entry.path().unwrap().to_string_lossy().into_owned());
        }
        assert_eq!(
            names,
            vec![
                "ferrodb-org-3.2.1/README",
                "ferrodb-org-3.2.1/bin",
                "ferrodb-org-3.2.1/bin/ferrod",
            ]
        );
    }
}
