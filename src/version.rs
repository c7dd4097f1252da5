//! Release version handling.
//!
//! A raw version string like `3.2.1`, `3.3.0-rc1`, or `3.3.0-` (nightly
//! marker) plus two optional overrides: the packaging-metadata revision and
//! the release/iteration number. Everything else is derived.

use std::cmp::Ordering;
use time::Date;

use crate::distro::PackageFormat;
use crate::error::{Error, Result};

/// One release version with its packaging overrides.
///
/// Constructed once per invocation from user input, immutable after that.
#[derive(Debug, Clone)]
pub struct VersionSpec {
    raw: String,
    metadata_revision: Option<String>,
    release_override: Option<u32>,
}

impl VersionSpec {
    /// Validate and wrap a raw version string.
    ///
    /// Accepts `major.minor[.rest][-suffix]` where major and minor are
    /// decimal. Anything else is a configuration error.
    pub fn new(
        raw: &str,
        metadata_revision: Option<String>,
        release_override: Option<u32>,
    ) -> Result<Self> {
        let spec = Self {
            raw: raw.to_string(),
            metadata_revision,
            release_override,
        };
        spec.minor()?;
        Ok(spec)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Revision of the packaging-metadata tree to check out.
    /// Defaults to the `r<version>` release tag.
    pub fn metadata_revision(&self) -> String {
        match &self.metadata_revision {
            Some(rev) => rev.clone(),
            None => format!("r{}", self.raw),
        }
    }

    /// Nightly builds are marked by a trailing `-` with nothing after it.
    pub fn is_nightly(&self) -> bool {
        self.raw.ends_with('-')
    }

    /// True for versions of the form `<base>-rc<digits>`.
    pub fn is_release_candidate(&self) -> bool {
        self.rc_suffix().is_some()
    }

    pub fn is_pre_release(&self) -> bool {
        self.is_nightly() || self.is_release_candidate()
    }

    /// The `rcN` suffix, when present.
    fn rc_suffix(&self) -> Option<&str> {
        let (_, tail) = self.raw.rsplit_once('-')?;
        let digits = tail.strip_prefix("rc")?;
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            Some(tail)
        } else {
            None
        }
    }

    /// First two dot-separated components, e.g. `2.5.5` -> `2.5`.
    pub fn branch(&self) -> String {
        let mut fields = self.raw.split('.');
        match (fields.next(), fields.next()) {
            (Some(major), Some(minor)) => {
                let minor = minor
                    .split(|c: char| !c.is_ascii_digit())
                    .next()
                    .unwrap_or(minor);
                format!("{}.{}", major, minor)
            }
            _ => self.raw.clone(),
        }
    }

    fn minor(&self) -> Result<u32> {
        let mut fields = self.raw.split('.');
        let major = fields
            .next()
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()));
        let minor = fields.next().and_then(|s| {
            s.split(|c: char| !c.is_ascii_digit())
                .next()
                .filter(|d| !d.is_empty())
        });
        match (major, minor) {
            (Some(_), Some(minor)) => minor.parse().map_err(|_| {
                Error::config(format!("version '{}' has a non-numeric minor field", self.raw))
            }),
            _ => Err(Error::config(format!(
                "malformed version '{}': expected <major>.<minor>[...]",
                self.raw
            ))),
        }
    }

    /// Release channel from the minor version: even is stable, odd is
    /// unstable. Used to pick the package-name suffix.
    pub fn is_stable_series(&self) -> Result<bool> {
        Ok(self.minor()? % 2 == 0)
    }

    /// Minor version number, already validated at construction.
    pub fn minor_version(&self) -> u32 {
        self.minor().unwrap_or(0)
    }

    /// The version string written into the native package's version field.
    ///
    /// Debian versions may not contain raw hyphens beyond the release
    /// separator, so hyphens become `~` (which also sorts pre-releases
    /// before the final release). RPM forbids hyphens entirely, so any
    /// trailing `-suffix` is cut off.
    pub fn package_version(&self, format: PackageFormat) -> String {
        match format {
            PackageFormat::Deb => self.raw.replace('-', "~"),
            PackageFormat::Rpm => match self.raw.split_once('-') {
                Some((base, _)) => base.to_string(),
                None => self.raw.clone(),
            },
        }
    }

    /// The package release/iteration number.
    ///
    /// Stable: the override or 1. Release candidates and nightlies sort
    /// below any stable build via a leading `0.`; nightlies embed the
    /// build date, so the caller passes in today's UTC date (fixed dates
    /// in tests).
    pub fn release_number(&self, _format: PackageFormat, today: Date) -> String {
        let release = self.release_override.unwrap_or(1);
        if let Some(rc) = self.rc_suffix() {
            format!("0.{}.{}", release, rc)
        } else if self.is_nightly() {
            format!(
                "0.{}.{:04}{:02}{:02}",
                release,
                today.year(),
                u8::from(today.month()),
                today.day()
            )
        } else {
            release.to_string()
        }
    }

    /// Numeric dotted-version comparison.
    ///
    /// Fields compare as integers, a missing field compares as lower, and
    /// any pre-release tail is ignored. `3.10.0` orders above `3.9.0`.
    pub fn compare_versions(a: &str, b: &str) -> Ordering {
        let fields = |v: &str| -> Vec<u64> {
            let base = v.split('-').next().unwrap_or(v);
            base.split('.')
                .map(|f| f.parse().unwrap_or(0))
                .collect()
        };
        let (a, b) = (fields(a), fields(b));
        let len = a.len().max(b.len());
        for i in 0..len {
            let (x, y) = (
                a.get(i).copied().unwrap_or(0),
                b.get(i).copied().unwrap_or(0),
            );
            match x.cmp(&y) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn spec(raw: &str) -> VersionSpec {
        VersionSpec::new(raw, None, None).expect("valid version")
    }

    #[test]
    fn stable_version_is_not_pre_release() {
        let v = spec("3.2.1");
        assert!(!v.is_nightly());
        assert!(!v.is_release_candidate());
        assert!(!v.is_pre_release());
        assert_eq!(v.branch(), "3.2");
    }

    #[test]
    fn rc_version_is_pre_release() {
        let v = spec("3.3.0-rc1");
        assert!(v.is_release_candidate());
        assert!(v.is_pre_release());
        assert!(!v.is_nightly());
    }

    #[test]
    fn trailing_separator_marks_nightly() {
        let v = spec("3.3.0-");
        assert!(v.is_nightly());
        assert!(!v.is_release_candidate());
        assert!(v.is_pre_release());
    }

    #[test]
    fn rc_detection_requires_digits() {
        assert!(!spec("3.3.0-rcX").is_release_candidate());
        assert!(!spec("3.3.0-beta1").is_release_candidate());
    }

    #[test]
    fn malformed_versions_rejected() {
        assert!(VersionSpec::new("", None, None).is_err());
        assert!(VersionSpec::new("3", None, None).is_err());
        assert!(VersionSpec::new("three.two", None, None).is_err());
    }

    #[test]
    fn debian_version_escapes_hyphens() {
        assert_eq!(spec("3.3.0-rc1").package_version(PackageFormat::Deb), "3.3.0~rc1");
        assert_eq!(spec("3.2.1").package_version(PackageFormat::Deb), "3.2.1");
    }

    #[test]
    fn rpm_version_strips_suffix() {
        assert_eq!(spec("3.3.0-rc1").package_version(PackageFormat::Rpm), "3.3.0");
        assert_eq!(spec("3.3.0-").package_version(PackageFormat::Rpm), "3.3.0");
        assert_eq!(spec("3.2.1").package_version(PackageFormat::Rpm), "3.2.1");
    }

    #[test]
    fn stable_release_number_is_override_or_one() {
        let today = date!(2024 - 06 - 01);
        assert_eq!(spec("3.2.1").release_number(PackageFormat::Deb, today), "1");

        let v = VersionSpec::new("3.2.1", None, Some(4)).expect("valid version");
        assert_eq!(v.release_number(PackageFormat::Rpm, today), "4");
    }

    #[test]
    fn rc_release_number_embeds_suffix() {
        let today = date!(2024 - 06 - 01);
        let v = VersionSpec::new("3.3.0-rc1", None, Some(2)).expect("valid version");
        assert_eq!(v.release_number(PackageFormat::Deb, today), "0.2.rc1");
    }

    #[test]
    fn nightly_release_number_embeds_date() {
        let v = spec("3.3.0-");
        assert_eq!(
            v.release_number(PackageFormat::Deb, date!(2024 - 06 - 01)),
            "0.1.20240601"
        );
    }

    #[test]
    fn metadata_revision_defaults_to_release_tag() {
        assert_eq!(spec("3.2.1").metadata_revision(), "r3.2.1");
        let v = VersionSpec::new("3.2.1", Some("deadbeef".to_string()), None)
            .expect("valid version");
        assert_eq!(v.metadata_revision(), "deadbeef");
    }

    #[test]
    fn even_minor_is_stable_series() {
        assert!(spec("3.2.1").is_stable_series().expect("series"));
        assert!(!spec("3.3.0-rc1").is_stable_series().expect("series"));
    }

    #[test]
    fn version_comparison_is_numeric() {
        assert_eq!(
            VersionSpec::compare_versions("3.10.0", "3.9.0"),
            Ordering::Greater
        );
        assert_eq!(
            VersionSpec::compare_versions("3.2", "3.2.1"),
            Ordering::Less
        );
        assert_eq!(
            VersionSpec::compare_versions("3.3.0-rc1", "3.3.0"),
            Ordering::Equal
        );
    }
}
