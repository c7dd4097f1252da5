//! Product configuration.
//!
//! The constants that tie the pipeline to a concrete product: names, the
//! download host, package-name suffixes, and the apt Release preamble
//! fields. Loadable from a TOML file; every field has a default so a bare
//! invocation packages ferrodb.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProductConfig {
    /// Product name used in tarball and repository path segments.
    pub product: String,
    /// Base name of the generated packages, before the channel suffix.
    pub package_base: String,
    /// Name of the server daemon, used by init-script fixups.
    pub daemon: String,
    /// Host serving release tarballs over HTTP.
    pub download_host: String,
    /// Package-name suffix for even-minor (stable) release series.
    pub stable_suffix: String,
    /// Package-name suffix for odd-minor (unstable) release series.
    pub unstable_suffix: String,
    /// Staging-relative paths of binaries excluded from every package.
    ///
    /// These link against libraries not guaranteed present on target
    /// systems and must not ship.
    pub excluded_binaries: Vec<String>,
    /// Identity passed to the Debian package builder for signing.
    pub deb_signing_key: String,
    /// `Origin:` field of the apt Release preamble.
    pub repo_origin: String,
    /// `Label:` field of the apt Release preamble.
    pub repo_label: String,
    /// `Description:` field of the apt Release preamble.
    pub repo_description: String,
}

impl Default for ProductConfig {
    fn default() -> Self {
        Self {
            product: "ferrodb".to_string(),
            package_base: "ferrodb".to_string(),
            daemon: "ferrod".to_string(),
            download_host: "http://downloads.ferrodb.org".to_string(),
            stable_suffix: "-org".to_string(),
            unstable_suffix: "-org-unstable".to_string(),
            excluded_binaries: vec!["bin/ferrosniff".to_string()],
            deb_signing_key: "packaging@ferrodb.org".to_string(),
            repo_origin: "ferrodb".to_string(),
            repo_label: "ferrodb".to_string(),
            repo_description: "ferrodb packages".to_string(),
        }
    }
}

impl ProductConfig {
    /// Load from a TOML file. Unknown keys are rejected, absent keys fall
    /// back to the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            Error::config(format!("reading config '{}': {}", path.display(), err))
        })?;
        toml::from_str(&raw)
            .map_err(|err| Error::config(format!("parsing config '{}': {}", path.display(), err)))
    }

    /// Package-name suffix for a release series: even minor versions are
    /// stable, odd minor versions are unstable.
    pub fn suffix(&self, minor: u32) -> &str {
        if minor % 2 == 0 {
            &self.stable_suffix
        } else {
            &self.unstable_suffix
        }
    }

    /// Full package name for a release series, e.g. `ferrodb-org`.
    pub fn package_name(&self, minor: u32) -> String {
        format!("{}{}", self.package_base, self.suffix(minor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_describe_ferrodb() {
        let config = ProductConfig::default();
        assert_eq!(config.product, "ferrodb");
        assert_eq!(config.package_name(4), "ferrodb-org");
        assert_eq!(config.package_name(5), "ferrodb-org-unstable");
    }

    #[test]
    fn load_merges_partial_file_over_defaults() {
        let temp = tempfile::TempDir::new().expect("tempdir");
        let path = temp.path().join("product.toml");
        fs::write(&path, "product = \"otherdb\"\ndaemon = \"otherd\"\n").expect("write config");

        let config = ProductConfig::load(&path).expect("load config");
        assert_eq!(config.product, "otherdb");
        assert_eq!(config.daemon, "otherd");
        assert_eq!(config.stable_suffix, "-org");
    }

    #[test]
    fn load_rejects_unknown_keys() {
        let temp = tempfile::TempDir::new().expect("tempdir");
        let path = temp.path().join("product.toml");
        fs::write(&path, "no_such_key = true\n").expect("write config");

        assert!(ProductConfig::load(&path).is_err());
    }
}
