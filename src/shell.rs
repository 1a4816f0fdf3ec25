//! Shell capability and build stages.
//!
//! The shell turns a build stage into a script the sandbox executes. The
//! executor never inspects script contents; it only needs the invocation
//! (command + arguments), the environment to inject, and the guarantee that
//! the script arrives on stdin rather than through a file.

use crate::error::Result;
use crate::job::BuildJob;
use serde::{Deserialize, Serialize};

/// One step of the build pipeline. Each stage runs in its own sandbox
/// container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    /// Prepare the environment (tool checks, directory layout).
    Prepare,
    /// Hook before source checkout.
    PreGetSources,
    /// Fetch or clone the project sources.
    GetSources,
    /// Restore tool caches archived by a previous run.
    RestoreCache,
    /// Download artifacts from dependent jobs.
    DownloadArtifacts,
    /// The user's script.
    Build,
    /// The user's after-script, run regardless of the build result.
    AfterScript,
    /// Archive tool caches for the next run.
    ArchiveCache,
    /// Upload artifacts produced by this job.
    UploadArtifacts,
}

impl BuildStage {
    /// Stable identifier used in container names.
    pub fn slug(self) -> &'static str {
        match self {
            BuildStage::Prepare => "prepare_script",
            BuildStage::PreGetSources => "pre_get_sources_script",
            BuildStage::GetSources => "get_sources_script",
            BuildStage::RestoreCache => "restore_cache_script",
            BuildStage::DownloadArtifacts => "download_artifacts_script",
            BuildStage::Build => "build_script",
            BuildStage::AfterScript => "after_script",
            BuildStage::ArchiveCache => "archive_cache_script",
            BuildStage::UploadArtifacts => "upload_artifacts_script",
        }
    }
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// How to invoke the shell inside the sandbox.
#[derive(Debug, Clone, Default)]
pub struct ShellConfiguration {
    /// Interpreter binary, e.g. `bash`.
    pub command: String,
    /// Arguments passed to the interpreter.
    pub arguments: Vec<String>,
    /// Environment entries (`KEY=VALUE`) the shell needs inside the sandbox.
    pub environment: Vec<String>,
    /// OS user the job nominally runs as; selects whose credential store
    /// is consulted. Empty means the process owner.
    pub user: String,
    /// True when the shell must be handed a script file instead of stdin.
    /// Such shells cannot be used with this executor.
    pub pass_file: bool,
    /// Script file extension, only meaningful when `pass_file` is set.
    pub extension: String,
}

/// Script generator capability.
///
/// Implementations are expected to be cheap and pure: the executor calls
/// `generate_script` once per stage.
pub trait Shell: Send + Sync {
    /// Shell name, used in diagnostics.
    fn name(&self) -> &str;

    /// Returns the invocation configuration for this job.
    fn configuration(&self, job: &BuildJob) -> Result<ShellConfiguration>;

    /// Generates the script for one stage of the job.
    ///
    /// Returning `Ok(None)` skips the stage (e.g. no after-script defined).
    fn generate_script(&self, stage: BuildStage, job: &BuildJob) -> Result<Option<String>>;
}
