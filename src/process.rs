//! External command execution.
//!
//! Every packaging tool is an opaque collaborator: the observed contract
//! is its exit status plus captured output. Each invocation logs its
//! working directory and argument vector before spawning, and takes the
//! working directory as an explicit parameter so concurrent units never
//! touch process-global state.

use log::info;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

/// Paths of the external tools the pipeline shells out to.
///
/// Defaults to bare command names resolved via PATH. Tests point these at
/// scripted stand-ins.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub dpkg_buildpackage: PathBuf,
    pub dpkg_scanpackages: PathBuf,
    pub apt_ftparchive: PathBuf,
    pub rpmbuild: PathBuf,
    pub createrepo: PathBuf,
    pub gpg: PathBuf,
    pub git: PathBuf,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            dpkg_buildpackage: PathBuf::from("dpkg-buildpackage"),
            dpkg_scanpackages: PathBuf::from("dpkg-scanpackages"),
            apt_ftparchive: PathBuf::from("apt-ftparchive"),
            rpmbuild: PathBuf::from("rpmbuild"),
            createrepo: PathBuf::from("createrepo"),
            gpg: PathBuf::from("gpg"),
            git: PathBuf::from("git"),
        }
    }
}

/// Output of a completed external command.
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

fn describe(program: &Path, args: &[&OsStr]) -> String {
    let mut parts = vec![program.display().to_string()];
    parts.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run a tool in `cwd`, capturing output. Non-zero exit is an error
/// carrying the tool name, status, and captured stderr.
pub fn run_tool<S: AsRef<OsStr>>(program: &Path, args: &[S], cwd: &Path) -> Result<CommandOutput> {
    let args: Vec<&OsStr> = args.iter().map(AsRef::as_ref).collect();
    info!("running [{}] in '{}'", describe(program, &args), cwd.display());

    let output = Command::new(program)
        .args(&args)
        .current_dir(cwd)
        .output()
        .map_err(|err| Error::BuildTool {
            tool: program.display().to_string(),
            status: -1,
            stderr: format!("failed to spawn: {}", err),
        })?;

    if !output.status.success() {
        return Err(Error::BuildTool {
            tool: program.display().to_string(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(CommandOutput {
        stdout: output.stdout,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn captures_stdout_on_success() {
        let temp = TempDir::new().unwrap();
        let tool = script(temp.path(), "ok.sh", "echo out-data");

        let output = run_tool(&tool, &["ignored"], temp.path()).unwrap();
        assert_eq!(output.stdout_string().trim(), "out-data");
    }

    #[test]
    fn nonzero_exit_carries_stderr() {
        let temp = TempDir::new().unwrap();
        let tool = script(temp.path(), "fail.sh", "echo broken >&2; exit 3");

        let err = run_tool::<&str>(&tool, &[], temp.path()).unwrap_err();
        match err {
            Error::BuildTool { status, stderr, .. } => {
                assert_eq!(status, 3);
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn runs_in_requested_directory() {
        let temp = TempDir::new().unwrap();
        let work = temp.path().join("work");
        fs::create_dir_all(&work).unwrap();
        let tool = script(temp.path(), "pwd.sh", "pwd");

        let output = run_tool::<&str>(&tool, &[], &work).unwrap();
        assert!(output.stdout_string().trim().ends_with("work"));
    }
}
