//! Debian package builds.
//!
//! Runs the Debian builder against a staging tree whose `debian/`
//! directory was populated during assembly. The builder drops its
//! products in the staging directory's parent; the resulting `.deb`
//! files are copied into the unit's repository directory.

use std::path::Path;

use crate::distro::{Arch, Distro};
use crate::error::{Error, Result};
use crate::process::{run_tool, Toolchain};

pub(super) fn build(
    toolchain: &Toolchain,
    signing_key: &str,
    distro: Distro,
    arch: Arch,
    staging: &Path,
    repo_dir: &Path,
) -> Result<()> {
    let arch_flag = format!("-a{}", distro.arch_name(arch));
    let key_flag = format!("-k{}", signing_key);
    run_tool(
        &toolchain.dpkg_buildpackage,
        &[arch_flag.as_str(), key_flag.as_str()],
        staging,
    )?;

    let parent = staging.parent().ok_or_else(|| {
        Error::staging(format!("staging dir '{}' has no parent", staging.display()))
    })?;
    super::collect_packages(parent, "deb", repo_dir, "dpkg-buildpackage")
}
