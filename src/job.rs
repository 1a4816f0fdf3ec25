//! Build-job input model.
//!
//! A [`BuildJob`] is the immutable description of one job: where the sources
//! live, which image and services it declared, its variables and registry
//! credentials. The executor never mutates it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

use regex::Regex;

// =============================================================================
// Variables
// =============================================================================

/// A single job variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobVariable {
    pub key: String,
    pub value: String,
    /// Public variables are exposed to service containers.
    #[serde(default)]
    pub public: bool,
    /// Internal variables are injected by the runner itself.
    #[serde(default)]
    pub internal: bool,
    /// File variables materialize as files; they still expand by value here.
    #[serde(default)]
    pub file: bool,
}

impl JobVariable {
    /// Convenience constructor for a public variable.
    pub fn public(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            public: true,
            internal: false,
            file: false,
        }
    }
}

static VARIABLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(?:\{([A-Za-z0-9_]+)\}|([A-Za-z0-9_]+))").unwrap());

/// An ordered set of job variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableSet(Vec<JobVariable>);

impl VariableSet {
    pub fn new(variables: Vec<JobVariable>) -> Self {
        Self(variables)
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobVariable> {
        self.0.iter()
    }

    /// Looks up a variable by key; later definitions win.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|v| v.key == key)
            .map(|v| v.value.as_str())
    }

    /// The subset exposed to service containers.
    pub fn public_or_internal(&self) -> VariableSet {
        VariableSet(
            self.0
                .iter()
                .filter(|v| v.public || v.internal)
                .cloned()
                .collect(),
        )
    }

    /// Renders `KEY=VALUE` pairs for container environments.
    pub fn string_list(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|v| format!("{}={}", v.key, v.value))
            .collect()
    }

    /// Substitutes `$VAR` and `${VAR}` occurrences. Unknown variables expand
    /// to the empty string.
    pub fn expand(&self, input: &str) -> String {
        VARIABLE_PATTERN
            .replace_all(input, |caps: &regex::Captures<'_>| {
                let key = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                self.get(key).unwrap_or_default().to_string()
            })
            .into_owned()
    }
}

// =============================================================================
// Credentials and Git Strategy
// =============================================================================

/// A credential attached to the job by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCredential {
    /// Credential kind; registry credentials carry `"registry"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub username: String,
    pub password: String,
}

/// How sources are brought into the build directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitStrategy {
    /// Reuse an existing checkout, fetching new objects.
    #[default]
    Fetch,
    /// Fresh clone every run.
    Clone,
}

// =============================================================================
// Per-Job Options
// =============================================================================

/// Options carried in the job's metadata payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// Image override declared by the job.
    #[serde(default)]
    pub image: String,
    /// Services declared by the job.
    #[serde(default)]
    pub services: Vec<String>,
}

// =============================================================================
// Build Job
// =============================================================================

/// Immutable description of one build job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    /// Coordinator-issued job id.
    pub id: i64,
    /// Project the job belongs to.
    pub project_id: i64,
    /// Commit being built.
    pub sha: String,
    /// Previous commit on the ref.
    pub before_sha: String,
    /// Ref name (branch or tag).
    pub ref_name: String,
    /// Registration token of the runner executing this job. Only a short
    /// hash of it ever leaves the process.
    pub runner_token: String,
    /// Runner-local id.
    pub runner_id: i64,
    /// Index of this job among the runner's concurrent slots.
    pub concurrent_id: i64,
    /// Absolute path of the project checkout inside the sandbox.
    pub full_project_dir: String,
    /// Root of the builds tree inside the sandbox.
    pub root_dir: String,
    #[serde(default)]
    pub git_strategy: GitStrategy,
    #[serde(default)]
    pub variables: VariableSet,
    #[serde(default)]
    pub credentials: Vec<JobCredential>,
    /// Raw per-build registry auth map (Docker config JSON), possibly empty.
    #[serde(default)]
    pub auth_config_json: String,
    /// Raw per-job options payload; decoded into [`JobOptions`] at prepare.
    #[serde(default)]
    pub options: serde_json::Value,
    #[serde(default)]
    pub debug_trace: bool,
}

impl BuildJob {
    /// Short hash of the runner token, safe to expose in names and labels.
    pub fn runner_short_id(&self) -> String {
        let digest = Sha256::digest(self.runner_token.as_bytes());
        hex::encode(&digest[..4])
    }

    /// Deterministic, DNS-safe name unique to this (runner, project,
    /// concurrency slot) triple. Every container and cache name derives
    /// from it.
    pub fn project_unique_name(&self) -> String {
        format!(
            "runner-{}-project-{}-concurrent-{}",
            self.runner_short_id(),
            self.project_id,
            self.concurrent_id
        )
    }

    /// Decodes the per-job options payload.
    pub fn decode_options(&self) -> crate::error::Result<JobOptions> {
        if self.options.is_null() {
            return Ok(JobOptions::default());
        }
        serde_json::from_value(self.options.clone()).map_err(crate::error::Error::OptionsDecode)
    }
}
