//! Package and repository builder for ferrodb release tarballs.
//!
//! Takes one prebuilt Linux tarball per (architecture, OS build) and turns
//! it into native Debian/RPM packages, then assembles those packages into
//! installable apt/yum/zypper repository trees with regenerated indices and
//! a signed release manifest.
//!
//! The pipeline per (distro, OS version, arch) unit:
//!
//! ```text
//! fetch ──► stage ──► build ──► publish
//!   │         │          │          │
//!   │         │          │          └── dpkg-scanpackages / apt-ftparchive /
//!   │         │          │              gpg, or createrepo
//!   │         │          └── dpkg-buildpackage or rpmbuild
//!   │         └── metadata checkout + tarball extraction + fixups
//!   └── HTTP download or local tarball, cached on disk
//! ```
//!
//! Units are independent and run on a worker pool; a failing unit never
//! stops its siblings. Index regeneration for a physical repository
//! directory runs only after every build destined for it has finished.

pub mod config;
pub mod distro;
pub mod error;
pub mod fetch;
pub mod fsutil;
pub mod package;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod publish;
pub mod staging;
pub mod version;

pub use config::ProductConfig;
pub use distro::{Arch, Distro, PackageFormat};
pub use error::{Error, Result};
pub use version::VersionSpec;
