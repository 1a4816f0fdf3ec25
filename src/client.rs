//! Container daemon capability.
//!
//! The executor talks to the container daemon exclusively through the
//! [`ContainerClient`] trait. Any transport conforming to it is acceptable;
//! the HTTP/socket protocol, API version negotiation, and TLS are the
//! implementation's concern. Operations block until the daemon answers and
//! honor no internal deadline; the caller bounds them.
//!
//! Wire types mirror the daemon's API shapes, reduced to the fields the
//! executor consumes.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};

// =============================================================================
// System
// =============================================================================

/// Daemon system information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Hardware architecture as the daemon reports it (`x86_64`, `aarch64`, …).
    pub architecture: String,
    /// Operating system type (`linux`, `windows`).
    pub os_type: String,
    /// Daemon version string.
    pub server_version: String,
}

// =============================================================================
// Images
// =============================================================================

/// Credentials presented to a registry for one pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    /// Registry the credentials belong to.
    pub server_address: String,
}

/// Options for an image pull.
#[derive(Debug, Clone, Default)]
pub struct ImagePullOptions {
    /// Credentials, or anonymous when absent.
    pub auth: Option<RegistryAuth>,
}

/// Result of inspecting an image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageInspect {
    /// Canonical content-addressed id.
    pub id: String,
    /// Tags pointing at this image.
    #[serde(default)]
    pub repo_tags: Vec<String>,
    /// Architecture recorded in the image config.
    #[serde(default)]
    pub architecture: String,
}

// =============================================================================
// Containers
// =============================================================================

/// Container configuration (the daemon's `Config` object).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub image: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub cmd: Vec<String>,
    /// `KEY=VALUE` environment entries.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Paths declared as anonymous volumes.
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub attach_stdin: bool,
    #[serde(default)]
    pub attach_stdout: bool,
    #[serde(default)]
    pub attach_stderr: bool,
    #[serde(default)]
    pub open_stdin: bool,
    /// Close stdin after the first attached client detaches.
    #[serde(default)]
    pub stdin_once: bool,
}

/// Restart policy. The executor only ever uses `no`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub name: String,
}

impl RestartPolicy {
    /// The policy applied to every executor-managed container.
    pub fn never() -> Self {
        Self {
            name: crate::constants::RESTART_POLICY_NEVER.to_string(),
        }
    }
}

/// Log driver selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(rename = "type")]
    pub driver: String,
}

impl LogConfig {
    /// The driver applied to every executor-managed container.
    pub fn json_file() -> Self {
        Self {
            driver: crate::constants::LOG_DRIVER_JSON_FILE.to_string(),
        }
    }
}

/// One device mapped into a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMapping {
    pub path_on_host: String,
    pub path_in_container: String,
    pub cgroup_permissions: String,
}

/// Host-side container configuration (the daemon's `HostConfig` object).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub cpuset_cpus: String,
    #[serde(default)]
    pub devices: Vec<DeviceMapping>,
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub dns_search: Vec<String>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub cap_add: Vec<String>,
    #[serde(default)]
    pub cap_drop: Vec<String>,
    #[serde(default)]
    pub security_opt: Vec<String>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default)]
    pub extra_hosts: Vec<String>,
    #[serde(default)]
    pub network_mode: String,
    /// `name:alias` links resolvable from inside the container.
    #[serde(default)]
    pub links: Vec<String>,
    /// `hostPath:containerPath` bind mounts.
    #[serde(default)]
    pub binds: Vec<String>,
    #[serde(default)]
    pub volume_driver: String,
    /// Containers whose volumes are inherited.
    #[serde(default)]
    pub volumes_from: Vec<String>,
    #[serde(default)]
    pub log_config: LogConfig,
}

/// Response from container creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerCreateResponse {
    /// Daemon-issued id. May be present even when creation failed partway.
    pub id: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Runtime state portion of a container inspect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: i64,
}

/// Result of inspecting a container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerDetails {
    pub id: String,
    /// Daemon-side name, without the leading slash.
    pub name: String,
    pub state: ContainerState,
    /// Configuration recorded at creation, including declared volumes.
    pub config: ContainerConfig,
}

/// Options for container removal.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerRemoveOptions {
    pub remove_volumes: bool,
    pub force: bool,
}

/// Options for fetching container logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogsOptions {
    pub stdout: bool,
    pub stderr: bool,
    pub timestamps: bool,
}

// =============================================================================
// Networks
// =============================================================================

/// A container endpoint attached to a network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkEndpoint {
    /// Container name as recorded by the network.
    pub name: String,
}

/// One daemon-known network and its attachments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkResource {
    pub id: String,
    pub name: String,
    /// Attached containers keyed by container id.
    #[serde(default)]
    pub containers: HashMap<String, NetworkEndpoint>,
}

// =============================================================================
// Attach Stream
// =============================================================================

/// Bidirectional hijacked stream to a container.
///
/// `reader` carries the daemon's multiplexed output frames (demultiplex
/// with [`crate::streams::demux_output`]); `writer` feeds the container's
/// stdin. Shutting the writer down half-closes the stream, which is how a
/// stdin-once container learns its input is complete.
pub struct AttachedStream {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

// =============================================================================
// Client Capability
// =============================================================================

/// Operations the executor requires from a container daemon.
///
/// Every method may block indefinitely; cancellation is the caller's
/// responsibility. Implementations map the daemon's "no such entity"
/// responses to [`crate::error::Error::NotFound`] so callers can
/// distinguish them from transport trouble.
#[async_trait]
pub trait ContainerClient: Send + Sync {
    /// Fetches daemon system information.
    async fn info(&self) -> Result<SystemInfo>;

    /// Inspects a local image by name or id.
    async fn image_inspect(&self, name: &str) -> Result<ImageInspect>;

    /// Pulls an image, blocking until the pull completes.
    async fn image_pull(&self, reference: &str, options: ImagePullOptions) -> Result<()>;

    /// Imports a filesystem archive as an image, blocking until done.
    async fn image_import(&self, data: &[u8], reference: &str, tag: &str) -> Result<()>;

    /// Creates a container. An empty `name` requests an anonymous container.
    async fn container_create(
        &self,
        name: &str,
        config: ContainerConfig,
        host_config: HostConfig,
    ) -> Result<ContainerCreateResponse>;

    /// Starts a created container.
    async fn container_start(&self, id: &str) -> Result<()>;

    /// Inspects a container by id or name.
    async fn container_inspect(&self, id: &str) -> Result<ContainerDetails>;

    /// Attaches to a container's stdio as a hijacked bidirectional stream.
    async fn container_attach(&self, id: &str) -> Result<AttachedStream>;

    /// Fetches container logs as a multiplexed stream.
    async fn container_logs(
        &self,
        id: &str,
        options: LogsOptions,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>>;

    /// Sends a signal to a running container.
    async fn container_kill(&self, id: &str, signal: &str) -> Result<()>;

    /// Removes a container.
    async fn container_remove(&self, id: &str, options: ContainerRemoveOptions) -> Result<()>;

    /// Lists all networks the daemon knows.
    async fn network_list(&self) -> Result<Vec<NetworkResource>>;

    /// Disconnects a container from a network.
    async fn network_disconnect(&self, network_id: &str, container: &str, force: bool)
        -> Result<()>;

    /// Releases the connection. Further calls may fail.
    async fn close(&self);
}
