//! Runner configuration: the host policy a job runs under.
//!
//! These types mirror the runner's configuration file; loading the file is
//! the embedder's job. Everything here is plain data with serde defaults so
//! partially specified sections deserialize cleanly.

use serde::{Deserialize, Serialize};

/// When the executor must fetch an image from a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    /// Pull on every use, except when the caller passed an image ID.
    #[default]
    Always,
    /// Pull only when the image is not locally present.
    IfNotPresent,
    /// Never pull; missing images fail the build.
    Never,
}

/// Docker section of the runner configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    /// Default image when the job declares none.
    pub image: String,
    /// Glob patterns of images jobs may declare. Empty means any.
    pub allowed_images: Vec<String>,
    /// Services started for every job.
    pub services: Vec<String>,
    /// Glob patterns of services jobs may declare. Empty means any.
    pub allowed_services: Vec<String>,
    /// Host directory for path-based caches; empty selects cache containers.
    pub cache_dir: String,
    /// Disables automatic cache volumes (host binds stay untouched).
    pub disable_cache: bool,
    pub privileged: bool,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    pub extra_hosts: Vec<String>,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub network_mode: String,
    pub volume_driver: String,
    /// User-declared volumes, `host:container` or lone `container` paths.
    pub volumes: Vec<String>,
    /// Device mappings, `host[:container[:permissions]]`.
    pub devices: Vec<String>,
    /// Extra container links, `name:alias`.
    pub links: Vec<String>,
    /// Extra volumes-from sources.
    pub volumes_from: Vec<String>,
    pub pull_policy: PullPolicy,
    /// Seconds to wait for services. `0` selects the default; negative
    /// skips the wait entirely.
    pub wait_for_services_timeout: i64,
    /// Hostname override for the sandbox; defaults to the unique job name.
    pub hostname: String,
    /// CPUs the sandbox may use (cpuset syntax, e.g. `0-2,7`).
    pub cpuset_cpus: String,
    /// Root of the builds tree; empty selects the image default.
    pub builds_dir: String,
}

/// Top-level runner configuration consumed by the executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Docker host policy; required by this executor.
    pub docker: Option<DockerSettings>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_policy_deserializes_kebab_case() {
        let policy: PullPolicy = serde_json::from_str("\"if-not-present\"").unwrap();
        assert_eq!(policy, PullPolicy::IfNotPresent);
        let policy: PullPolicy = serde_json::from_str("\"never\"").unwrap();
        assert_eq!(policy, PullPolicy::Never);
    }

    #[test]
    fn docker_settings_default_from_empty_object() {
        let settings: DockerSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.pull_policy, PullPolicy::Always);
        assert!(settings.volumes.is_empty());
        assert_eq!(settings.wait_for_services_timeout, 0);
    }

    #[test]
    fn runner_config_without_docker_section() {
        let config: RunnerConfig = serde_json::from_str("{}").unwrap();
        assert!(config.docker.is_none());
    }
}
