//! Run orchestration.
//!
//! Enumerates the cross-product of requested build targets and
//! architectures into units, drives each unit through
//! fetch -> stage -> build on a worker pool, and publishes each physical
//! repository directory once after every build destined for it has
//! finished. A failing unit is recorded and never stops its siblings.

use log::{error, info};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use time::Date;

use crate::config::ProductConfig;
use crate::distro::{Arch, Distro};
use crate::error::{Error, Result};
use crate::fetch::{sha256_file, ArtifactFetcher};
use crate::package::PackageBuilder;
use crate::preflight::check_host_tools;
use crate::process::Toolchain;
use crate::publish::RepositoryPublisher;
use crate::staging::{MetadataSource, StagingAssembler};
use crate::version::VersionSpec;

/// One (distro, OS-version tag, arch) tuple processed end to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub distro: Distro,
    pub tag: String,
    pub arch: Arch,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.distro, self.tag, self.arch)
    }
}

/// Pipeline progress of a unit. `Published` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Pending,
    Fetched,
    Staged,
    Built,
    Published,
    Failed,
}

/// Final record for one unit.
#[derive(Debug)]
pub struct UnitOutcome {
    pub unit: Unit,
    pub state: UnitState,
    pub error: Option<String>,
    pub tarball_sha256: Option<String>,
}

impl UnitOutcome {
    fn skipped(unit: Unit) -> Self {
        Self {
            unit,
            state: UnitState::Pending,
            error: None,
            tarball_sha256: None,
        }
    }
}

/// Aggregate result of a run.
#[derive(Debug)]
pub struct RunReport {
    pub outcomes: Vec<UnitOutcome>,
}

impl RunReport {
    /// True when every unit reached `Published`.
    pub fn succeeded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.state == UnitState::Published)
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.state == UnitState::Failed)
    }

    /// Machine-readable report, one row per unit.
    pub fn to_json(&self) -> serde_json::Value {
        let units: Vec<serde_json::Value> = self
            .outcomes
            .iter()
            .map(|o| {
                serde_json::json!({
                    "distro": o.unit.distro.name(),
                    "tag": o.unit.tag,
                    "arch": o.unit.arch.as_str(),
                    "state": o.state,
                    "error": o.error,
                    "tarball_sha256": o.tarball_sha256,
                })
            })
            .collect();
        serde_json::json!({ "units": units, "succeeded": self.succeeded() })
    }
}

/// Everything one run needs.
pub struct RunRequest {
    pub version: VersionSpec,
    /// Requested OS-build target tags; empty means every supported target.
    pub build_targets: Vec<String>,
    /// Requested architectures; empty means every supported architecture.
    pub arches: Vec<Arch>,
    /// Pre-supplied tarball, only valid when the run has exactly one unit.
    pub local_tarball: Option<PathBuf>,
    pub metadata_source: MetadataSource,
    pub cache_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub repo_dir: PathBuf,
    /// Worker threads; 0 means the host's available parallelism.
    pub jobs: usize,
    /// UTC build date stamped into nightly release numbers.
    pub today: Date,
}

/// Expand requested targets and arches into concrete units.
///
/// Unknown target tags are a configuration error; the supported set is
/// closed and a typo should stop the run before any work starts.
pub fn enumerate_units(build_targets: &[String], arches: &[Arch]) -> Result<Vec<Unit>> {
    let arches: Vec<Arch> = if arches.is_empty() {
        Arch::ALL.to_vec()
    } else {
        arches.to_vec()
    };

    let mut tags: Vec<(Distro, String)> = Vec::new();
    if build_targets.is_empty() {
        for distro in Distro::ALL {
            for tag in distro.build_targets() {
                tags.push((distro, tag.to_string()));
            }
        }
    } else {
        let mut seen = BTreeSet::new();
        for tag in build_targets {
            if !seen.insert(tag.clone()) {
                continue;
            }
            tags.push((Distro::for_build_target(tag)?, tag.clone()));
        }
    }

    let mut units = Vec::new();
    for (distro, tag) in tags {
        for arch in &arches {
            units.push(Unit {
                distro,
                tag: tag.clone(),
                arch: *arch,
            });
        }
    }
    Ok(units)
}

/// Drives fetch -> stage -> build -> publish across a worker pool.
pub struct Orchestrator<'a> {
    config: &'a ProductConfig,
    toolchain: &'a Toolchain,
    abort: Arc<AtomicBool>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a ProductConfig, toolchain: &'a Toolchain, abort: Arc<AtomicBool>) -> Self {
        Self {
            config,
            toolchain,
            abort,
        }
    }

    pub fn run(&self, request: &RunRequest) -> Result<RunReport> {
        let units = enumerate_units(&request.build_targets, &request.arches)?;
        if units.is_empty() {
            return Err(Error::config("no units to build"));
        }
        if request.local_tarball.is_some() && units.len() != 1 {
            return Err(Error::config(format!(
                "a local tarball is only accepted for a single-unit run, but {} units were requested",
                units.len()
            )));
        }

        let formats: BTreeSet<_> = units.iter().map(|u| u.distro.format()).collect();
        check_host_tools(self.toolchain, &formats, request.metadata_source.is_git())?;

        info!(
            "building {} for {} unit(s)",
            request.version.raw(),
            units.len()
        );

        let queue: Mutex<VecDeque<(usize, Unit)>> =
            Mutex::new(units.iter().cloned().enumerate().collect());
        let results: Mutex<Vec<Option<UnitOutcome>>> =
            Mutex::new(units.iter().map(|_| None).collect());
        // Physical repo dir -> (owning distro, indices of units built into it).
        let built_dirs: Mutex<BTreeMap<PathBuf, (Distro, Vec<usize>)>> = Mutex::new(BTreeMap::new());

        let jobs = match request.jobs {
            0 => thread::available_parallelism().map(usize::from).unwrap_or(1),
            n => n,
        }
        .min(units.len());

        thread::scope(|scope| {
            for _ in 0..jobs {
                scope.spawn(|| loop {
                    if self.abort.load(Ordering::Relaxed) {
                        break;
                    }
                    let next = lock(&queue).pop_front();
                    let Some((index, unit)) = next else { break };

                    let (outcome, repo_dir) = self.process_unit(request, &unit);
                    if let Some(dir) = repo_dir {
                        let mut dirs = lock(&built_dirs);
                        dirs.entry(dir)
                            .or_insert_with(|| (unit.distro, Vec::new()))
                            .1
                            .push(index);
                    }
                    lock(&results)[index] = Some(outcome);
                });
            }
        });

        let mut outcomes: Vec<UnitOutcome> = results
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .into_iter()
            .zip(units)
            .map(|(outcome, unit)| outcome.unwrap_or_else(|| UnitOutcome::skipped(unit)))
            .collect();

        // Index regeneration must see every package built for a directory,
        // so publishing happens only after the pool has drained.
        let publisher = RepositoryPublisher::new(self.config, self.toolchain);
        let built_dirs = built_dirs.into_inner().unwrap_or_else(|e| e.into_inner());
        for (dir, (distro, indices)) in built_dirs {
            match publisher.publish(distro, &request.version, &dir) {
                Ok(()) => {
                    for index in indices {
                        outcomes[index].state = UnitState::Published;
                    }
                }
                Err(err) => {
                    error!("publishing '{}' failed: {}", dir.display(), err);
                    for index in indices {
                        outcomes[index].state = UnitState::Failed;
                        outcomes[index].error = Some(err.to_string());
                    }
                }
            }
        }

        Ok(RunReport { outcomes })
    }

    /// Run one unit up to `Built`, returning its repo directory on success.
    fn process_unit(&self, request: &RunRequest, unit: &Unit) -> (UnitOutcome, Option<PathBuf>) {
        let mut outcome = UnitOutcome {
            unit: unit.clone(),
            state: UnitState::Pending,
            error: None,
            tarball_sha256: None,
        };

        let fail = |mut outcome: UnitOutcome, err: Error| {
            error!("unit {} failed: {}", outcome.unit, err);
            outcome.state = UnitState::Failed;
            outcome.error = Some(err.to_string());
            (outcome, None)
        };

        let fetcher = ArtifactFetcher::new(self.config, &request.cache_dir);
        let fetched = match &request.local_tarball {
            Some(local) => fetcher.adopt_local(local, &request.version, &unit.tag, unit.arch),
            None => fetcher.fetch(&request.version, &unit.tag, unit.arch),
        };
        let tarball = match fetched {
            Ok(path) => path,
            Err(err) => return fail(outcome, err),
        };
        outcome.state = UnitState::Fetched;
        outcome.tarball_sha256 = sha256_file(&tarball).ok();

        let assembler = StagingAssembler::new(self.config, self.toolchain, &request.staging_dir);
        let staging = match assembler.assemble(
            unit.distro,
            &unit.tag,
            unit.arch,
            &request.version,
            &request.metadata_source,
            &tarball,
        ) {
            Ok(path) => path,
            Err(err) => return fail(outcome, err),
        };
        outcome.state = UnitState::Staged;

        let builder = PackageBuilder::new(
            self.config,
            self.toolchain,
            &request.repo_dir,
            request.today,
        );
        let repo_dir = match builder.build(unit.distro, &unit.tag, unit.arch, &request.version, &staging)
        {
            Ok(dir) => dir,
            Err(err) => return fail(outcome, err),
        };
        outcome.state = UnitState::Built;
        info!("unit {} built into '{}'", unit, repo_dir.display());

        (outcome, Some(repo_dir))
    }
}

/// Lock a mutex, recovering the guard if a worker panicked while holding it.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_request_expands_to_full_cross_product() {
        let units = enumerate_units(&[], &[]).unwrap();
        // 8 supported targets x 2 arches.
        assert_eq!(units.len(), 16);
    }

    #[test]
    fn requested_tags_filter_targets() {
        let units = enumerate_units(
            &["rhel62".to_string(), "debian71".to_string()],
            &[Arch::X86_64],
        )
        .unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].distro, Distro::Redhat);
        assert_eq!(units[1].distro, Distro::Debian);
    }

    #[test]
    fn duplicate_tags_collapse() {
        let units = enumerate_units(
            &["rhel62".to_string(), "rhel62".to_string()],
            &[Arch::X86_64],
        )
        .unwrap();
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn unknown_tag_is_a_configuration_error() {
        let err = enumerate_units(&["slackware".to_string()], &[]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
