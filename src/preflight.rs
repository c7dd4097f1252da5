//! Preflight checks for host tool availability.
//!
//! Run before any unit starts so missing packaging tools surface as one
//! clear configuration error instead of mid-batch build failures.

use std::collections::BTreeSet;
use std::path::Path;

use crate::distro::PackageFormat;
use crate::error::{Error, Result};
use crate::process::Toolchain;

/// Check if a tool resolves to an executable. Bare names go through
/// PATH; paths are checked directly.
pub fn tool_exists(tool: &Path) -> bool {
    which::which(tool).is_ok()
}

/// Check that specific tools are available, each paired with the host
/// package that provides it.
pub fn check_required_tools(tools: &[(&Path, &str)]) -> Result<()> {
    let mut missing = Vec::new();

    for (tool, package) in tools {
        if !tool_exists(tool) {
            missing.push((*tool, *package));
        }
    }

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t.display(), p))
            .collect::<Vec<_>>()
            .join("\n");
        return Err(Error::config(format!("missing required host tools:\n{}", msg)));
    }

    Ok(())
}

/// Check the tools needed for a run covering the given package formats.
///
/// `needs_git` is set when the packaging metadata source is a git
/// repository rather than a plain directory.
pub fn check_host_tools(
    toolchain: &Toolchain,
    formats: &BTreeSet<PackageFormat>,
    needs_git: bool,
) -> Result<()> {
    let mut tools: Vec<(&Path, &str)> = Vec::new();
    if formats.contains(&PackageFormat::Deb) {
        tools.push((&toolchain.dpkg_buildpackage, "dpkg-dev"));
        tools.push((&toolchain.dpkg_scanpackages, "dpkg-dev"));
        tools.push((&toolchain.apt_ftparchive, "apt-utils"));
        tools.push((&toolchain.gpg, "gnupg"));
    }
    if formats.contains(&PackageFormat::Rpm) {
        tools.push((&toolchain.rpmbuild, "rpm-build"));
        tools.push((&toolchain.createrepo, "createrepo"));
    }
    if needs_git {
        tools.push((&toolchain.git, "git"));
    }
    check_required_tools(&tools)
}
