//! Distribution families and their naming conventions.
//!
//! Each supported family knows its architecture names, OS-version
//! codenames, repository layout, and which packaging toolchain applies.
//! The set is closed; adding a family means adding a variant and letting
//! the compiler point at every match that needs a new arm.

use std::fmt;
use std::path::PathBuf;

use crate::config::ProductConfig;
use crate::error::{Error, Result};
use crate::version::VersionSpec;

/// Native package format, selects the build and publish toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackageFormat {
    Deb,
    Rpm,
}

/// Build architectures accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    I686,
}

impl Arch {
    pub const ALL: [Arch; 2] = [Arch::X86_64, Arch::I686];

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "x86_64" => Ok(Arch::X86_64),
            "i686" => Ok(Arch::I686),
            other => Err(Error::config(format!("unsupported architecture '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::I686 => "i686",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported distribution families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Distro {
    Debian,
    Ubuntu,
    Redhat,
    Suse,
    Amazon,
}

impl Distro {
    pub const ALL: [Distro; 5] = [
        Distro::Debian,
        Distro::Ubuntu,
        Distro::Redhat,
        Distro::Suse,
        Distro::Amazon,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Distro::Debian => "debian",
            Distro::Ubuntu => "ubuntu",
            Distro::Redhat => "redhat",
            Distro::Suse => "suse",
            Distro::Amazon => "amazon",
        }
    }

    pub fn format(&self) -> PackageFormat {
        match self {
            Distro::Debian | Distro::Ubuntu => PackageFormat::Deb,
            Distro::Redhat | Distro::Suse | Distro::Amazon => PackageFormat::Rpm,
        }
    }

    /// The family owning a given OS-build target tag.
    pub fn for_build_target(tag: &str) -> Result<Distro> {
        for distro in Distro::ALL {
            if distro.build_targets().contains(&tag) {
                return Ok(distro);
            }
        }
        Err(Error::config(format!("unknown OS build target '{}'", tag)))
    }

    /// OS-build target tags this family publishes for.
    pub fn build_targets(&self) -> &'static [&'static str] {
        match self {
            Distro::Debian => &["debian71"],
            Distro::Ubuntu => &["ubuntu1204", "ubuntu1404"],
            Distro::Redhat => &["rhel70", "rhel62", "rhel55"],
            Distro::Suse => &["suse11"],
            Distro::Amazon => &["amazon"],
        }
    }

    /// The ecosystem's own name for a build architecture.
    pub fn arch_name(&self, arch: Arch) -> &'static str {
        match self.format() {
            PackageFormat::Deb => match arch {
                Arch::X86_64 => "amd64",
                Arch::I686 => "i386",
            },
            PackageFormat::Rpm => arch.as_str(),
        }
    }

    /// Codename (or version segment) an OS-version tag publishes under.
    pub fn os_codename(&self, tag: &str) -> Result<String> {
        let unsupported = || Error::UnsupportedTarget {
            distro: self.name().to_string(),
            what: format!("OS version tag '{}'", tag),
        };
        match self {
            Distro::Debian => match tag {
                "debian71" => Ok("wheezy".to_string()),
                _ => Err(unsupported()),
            },
            Distro::Ubuntu => match tag {
                "ubuntu1204" => Ok("precise".to_string()),
                "ubuntu1404" => Ok("trusty".to_string()),
                _ => Err(unsupported()),
            },
            Distro::Redhat => match tag.strip_prefix("rhel") {
                Some(digits) if !digits.is_empty() => Ok(digits.to_string()),
                _ => Err(unsupported()),
            },
            Distro::Suse => match tag.strip_prefix("suse") {
                Some(digits) if !digits.is_empty() => Ok(digits.to_string()),
                _ => Err(unsupported()),
            },
            Distro::Amazon => match tag {
                "amazon" => Ok("2013.03".to_string()),
                _ => Err(unsupported()),
            },
        }
    }

    /// Repository component/section for Debian-style layouts.
    pub fn repo_component(&self) -> &'static str {
        match self {
            Distro::Ubuntu => "multiverse",
            _ => "main",
        }
    }

    /// RPM `%dist` tag for an OS-version target.
    pub fn release_dist(&self, tag: &str) -> Result<String> {
        match self {
            Distro::Redhat => match tag.strip_prefix("rhel") {
                Some(digits) if digits.len() >= 2 => Ok(format!("el{}", &digits[..1])),
                _ => Err(Error::UnsupportedTarget {
                    distro: self.name().to_string(),
                    what: format!("release dist for '{}'", tag),
                }),
            },
            Distro::Suse => Ok(tag.to_string()),
            Distro::Amazon => Ok("amzn1".to_string()),
            Distro::Debian | Distro::Ubuntu => Err(Error::UnsupportedTarget {
                distro: self.name().to_string(),
                what: "release dist is an RPM concept".to_string(),
            }),
        }
    }

    /// Repository directory a unit's packages land in, relative to the
    /// repository root.
    ///
    /// Pre-release versions always publish under the `testing` branch
    /// segment, never under the stable branch directory.
    pub fn repo_directory(
        &self,
        config: &ProductConfig,
        arch: Arch,
        tag: &str,
        version: &VersionSpec,
    ) -> Result<PathBuf> {
        let codename = self.os_codename(tag)?;
        let branch = if version.is_pre_release() {
            "testing".to_string()
        } else {
            version.branch()
        };
        let series = format!(
            "{}{}",
            config.product,
            config.suffix(version.minor_version())
        );
        let path = match self.format() {
            PackageFormat::Deb => format!(
                "apt/{}/dists/{}/{}/{}/{}/binary-{}",
                self.name(),
                codename,
                series,
                branch,
                self.repo_component(),
                self.arch_name(arch)
            ),
            PackageFormat::Rpm => {
                let root = match self {
                    Distro::Suse => "zypper",
                    _ => "yum",
                };
                format!(
                    "{}/{}/{}/{}/{}/{}/RPMS",
                    root,
                    self.name(),
                    codename,
                    series,
                    branch,
                    self.arch_name(arch)
                )
            }
        };
        Ok(PathBuf::from(path))
    }
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(raw: &str) -> VersionSpec {
        VersionSpec::new(raw, None, None).expect("valid version")
    }

    #[test]
    fn deb_family_maps_arch_names() {
        assert_eq!(Distro::Debian.arch_name(Arch::X86_64), "amd64");
        assert_eq!(Distro::Ubuntu.arch_name(Arch::I686), "i386");
        assert_eq!(Distro::Redhat.arch_name(Arch::X86_64), "x86_64");
    }

    #[test]
    fn build_target_lookup_finds_owner() {
        assert_eq!(
            Distro::for_build_target("rhel62").expect("rhel62"),
            Distro::Redhat
        );
        assert_eq!(
            Distro::for_build_target("ubuntu1404").expect("ubuntu1404"),
            Distro::Ubuntu
        );
        assert!(Distro::for_build_target("slackware").is_err());
    }

    #[test]
    fn codenames_resolve_per_family() {
        assert_eq!(Distro::Debian.os_codename("debian71").expect("wheezy"), "wheezy");
        assert_eq!(Distro::Ubuntu.os_codename("ubuntu1204").expect("precise"), "precise");
        assert_eq!(Distro::Redhat.os_codename("rhel70").expect("70"), "70");
        assert_eq!(Distro::Amazon.os_codename("amazon").expect("amzn"), "2013.03");
        assert!(Distro::Debian.os_codename("debian99").is_err());
    }

    #[test]
    fn release_dist_tags() {
        assert_eq!(Distro::Redhat.release_dist("rhel62").expect("el6"), "el6");
        assert_eq!(Distro::Suse.release_dist("suse11").expect("suse11"), "suse11");
        assert_eq!(Distro::Amazon.release_dist("amazon").expect("amzn1"), "amzn1");
        assert!(Distro::Debian.release_dist("debian71").is_err());
    }

    #[test]
    fn stable_deb_repo_directory_uses_branch_and_component() {
        let config = ProductConfig::default();
        let dir = Distro::Debian
            .repo_directory(&config, Arch::X86_64, "debian71", &version("3.2.1"))
            .expect("repo dir");
        assert_eq!(
            dir,
            PathBuf::from("apt/debian/dists/wheezy/ferrodb-org/3.2/main/binary-amd64")
        );
    }

    #[test]
    fn pre_release_publishes_under_testing() {
        let config = ProductConfig::default();
        let dir = Distro::Redhat
            .repo_directory(&config, Arch::X86_64, "rhel62", &version("3.3.0-rc1"))
            .expect("repo dir");
        let path = dir.to_string_lossy();
        assert!(path.contains("/testing/"), "got {}", path);
        assert!(!path.contains("/3.3/"), "got {}", path);
        assert!(path.ends_with("x86_64/RPMS"), "got {}", path);
    }

    #[test]
    fn suse_publishes_under_zypper() {
        let config = ProductConfig::default();
        let dir = Distro::Suse
            .repo_directory(&config, Arch::X86_64, "suse11", &version("3.2.1"))
            .expect("repo dir");
        assert!(dir.starts_with("zypper/suse"));
    }
}
