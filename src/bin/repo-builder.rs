use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::warn;
use time::OffsetDateTime;

use repo_builder::config::ProductConfig;
use repo_builder::distro::Arch;
use repo_builder::pipeline::{Orchestrator, RunRequest};
use repo_builder::process::Toolchain;
use repo_builder::staging::MetadataSource;
use repo_builder::version::VersionSpec;

/// Build native packages from release tarballs and publish them into
/// apt and yum repository trees.
#[derive(Parser)]
#[clap(about, disable_version_flag = true)]
struct Args {
    /// Product version to package, e.g. 3.2.1 or 3.3.0-rc1
    #[clap(short = 's', long = "version")]
    product_version: String,

    /// Packaging-metadata revision to check out (defaults to r<version>)
    #[clap(short = 'm', long)]
    metadata_revision: Option<String>,

    /// Release number override for stable builds
    #[clap(short = 'r', long)]
    release: Option<u32>,

    /// OS build target tag, repeatable; all supported targets when omitted
    #[clap(short = 'd', long = "distro")]
    distros: Vec<String>,

    /// Architecture, repeatable; all supported architectures when omitted
    #[clap(short = 'a', long = "arch")]
    arches: Vec<String>,

    /// Use a local release tarball instead of downloading (single-unit runs only)
    #[clap(short = 't', long)]
    tarball: Option<PathBuf>,

    /// Packaging-metadata tree: a git repository or a plain directory
    #[clap(long, default_value = ".")]
    metadata_source: PathBuf,

    /// Directory for downloaded release tarballs
    #[clap(long, default_value = "dl")]
    cache_dir: PathBuf,

    /// Directory for staging trees and build scratch space
    #[clap(long, default_value = "dst")]
    staging_dir: PathBuf,

    /// Root of the published repository trees
    #[clap(long, default_value = "repo")]
    repo_dir: PathBuf,

    /// Product configuration file (TOML); built-in defaults when omitted
    #[clap(long)]
    config: Option<PathBuf>,

    /// Worker threads; defaults to the host's available parallelism
    #[clap(short = 'j', long, default_value_t = 0)]
    jobs: usize,

    /// Write a machine-readable run report to this path
    #[clap(long)]
    report: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()) {
        Ok(succeeded) => {
            if succeeded {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<bool> {
    let abort = Arc::new(AtomicBool::new(false));
    signal_flag(signal_hook::consts::SIGINT, &abort);
    signal_flag(signal_hook::consts::SIGTERM, &abort);

    let config = match &args.config {
        Some(path) => ProductConfig::load(path)
            .with_context(|| format!("loading config '{}'", path.display()))?,
        None => ProductConfig::default(),
    };
    let toolchain = Toolchain::default();

    let version = VersionSpec::new(
        &args.product_version,
        args.metadata_revision.clone(),
        args.release,
    )?;
    let arches = args
        .arches
        .iter()
        .map(|a| Arch::parse(a))
        .collect::<repo_builder::error::Result<Vec<_>>>()?;

    let metadata_source = if args.metadata_source.join(".git").exists() {
        MetadataSource::Git {
            repo: args.metadata_source.clone(),
        }
    } else {
        MetadataSource::LocalDir(args.metadata_source.clone())
    };

    let request = RunRequest {
        version,
        build_targets: args.distros.clone(),
        arches,
        local_tarball: args.tarball.clone(),
        metadata_source,
        cache_dir: args.cache_dir.clone(),
        staging_dir: args.staging_dir.clone(),
        repo_dir: args.repo_dir.clone(),
        jobs: args.jobs,
        today: OffsetDateTime::now_utc().date(),
    };

    let orchestrator = Orchestrator::new(&config, &toolchain, abort);
    let report = orchestrator.run(&request)?;

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report.to_json())?;
        std::fs::write(path, json)
            .with_context(|| format!("writing report '{}'", path.display()))?;
    }

    for failure in report.failures() {
        eprintln!(
            "failed: {} ({})",
            failure.unit,
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(report.succeeded())
}

fn signal_flag(signal: i32, flag: &Arc<AtomicBool>) {
    if let Err(err) = signal_hook::flag::register(signal, Arc::clone(flag)) {
        warn!("cannot register handler for signal {}: {}", signal, err);
    }
}
