//! Volume planning.
//!
//! Translates declared volume strings into host binds, named cache
//! containers, or host-path caches, and builds the persistent project-root
//! volume. Cache containers are the one piece of state that outlives a
//! run: their names are a pure function of the project and path, so a
//! later run of the same project finds and reuses them.

use crate::client::{ContainerConfig, DeviceMapping, HostConfig, LogConfig, RestartPolicy};
use crate::constants::{CACHE_CONTAINER_INFIX, CACHE_INIT_COMMAND};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::job::GitStrategy;
use crate::network;
use crate::sandbox;
use std::path::Path;
use tracing::{debug, error};

// =============================================================================
// Path Helpers
// =============================================================================

/// Lexically cleans a slash-separated path: collapses repeats and resolves
/// `.` and `..` without touching the filesystem.
pub(crate) fn clean_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                match parts.last() {
                    Some(last) if *last != ".." => {
                        parts.pop();
                    }
                    _ if absolute => {}
                    _ => parts.push(".."),
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Parent directory of a slash-separated path, after cleaning.
pub(crate) fn parent_dir(path: &str) -> String {
    let cleaned = clean_path(path);
    match cleaned.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => cleaned[..idx].to_string(),
        None => ".".to_string(),
    }
}

/// True when `dir` equals `parent` or lies below it.
fn is_parent_of(parent: &str, dir: &str) -> bool {
    let mut dir = clean_path(dir);
    while dir != "/" && dir != "." {
        if dir == parent {
            return true;
        }
        dir = parent_dir(&dir);
    }
    false
}

/// True when any two-part volume's container side covers `dir`.
pub(crate) fn is_host_mounted_volume(dir: &str, volumes: &[String]) -> bool {
    volumes.iter().any(|volume| {
        let parts: Vec<&str> = volume.split(':').collect();
        parts.len() >= 2 && is_parent_of(&clean_path(parts[1]), dir)
    })
}

/// Deterministic cache-container name for a (project, path) pair. Must
/// stay a pure function: the name is how a later run finds the cache.
pub(crate) fn cache_container_name(project_unique_name: &str, container_path: &str) -> String {
    format!(
        "{project_unique_name}{CACHE_CONTAINER_INFIX}{:x}",
        md5::compute(container_path.as_bytes())
    )
}

/// Absolutizes a host path against the working directory and normalizes
/// separators to forward slashes.
fn absolute_host_path(path: &str) -> Result<String> {
    let absolute = if Path::new(path).is_absolute() {
        path.to_string()
    } else {
        std::env::current_dir()?
            .join(path)
            .to_string_lossy()
            .into_owned()
    };
    Ok(absolute.replace('\\', "/"))
}

// =============================================================================
// Device Strings
// =============================================================================

/// Parses `hostPath[:containerPath[:cgroupPermissions]]`.
pub(crate) fn parse_device_string(device: &str) -> Result<DeviceMapping> {
    let parts: Vec<&str> = device.split(':').collect();
    if parts.len() > 3 {
        return Err(Error::InvalidDevice {
            device: device.to_string(),
            reason: "too many colons".to_string(),
        });
    }

    Ok(DeviceMapping {
        path_on_host: parts[0].to_string(),
        // default: same path inside the container
        path_in_container: parts.get(1).unwrap_or(&parts[0]).to_string(),
        // default: rwm, matching `docker run`
        cgroup_permissions: parts.get(2).unwrap_or(&"rwm").to_string(),
    })
}

// =============================================================================
// Volume Planning
// =============================================================================

impl Executor {
    /// Absolutizes a container path against the project directory.
    pub(crate) fn absolute_container_path(&self, dir: &str) -> String {
        if dir.starts_with('/') {
            dir.to_string()
        } else {
            clean_path(&format!("{}/{dir}", self.job.full_project_dir))
        }
    }

    /// Parses every configured device mapping into the accumulator.
    pub(crate) fn bind_devices(&mut self) -> Result<()> {
        for device in &self.docker.devices {
            self.devices.push(parse_device_string(device)?);
        }
        Ok(())
    }

    /// Adds a host bind for a two-part volume declaration.
    fn add_host_volume(&mut self, host_path: &str, container_path: &str) -> Result<()> {
        let container_path = self.absolute_container_path(container_path);
        debug!(host = host_path, container = %container_path, "using host-based volume");
        self.binds.push(format!("{host_path}:{container_path}"));
        Ok(())
    }

    /// Plans a cache for a lone container path: a host-path bind when a
    /// cache directory is configured, otherwise a named cache container,
    /// reused when its recorded volumes still cover the path.
    async fn add_cache_volume(&mut self, container_path: &str) -> Result<()> {
        let container_path = self.absolute_container_path(container_path);

        // Only automatic caches disable; host binds are shared on purpose.
        if self.docker.disable_cache {
            debug!(path = %container_path, "container cache is disabled");
            return Ok(());
        }

        if !self.docker.cache_dir.is_empty() {
            let host_path = format!(
                "{}/{}/{:x}",
                self.docker.cache_dir,
                self.job.project_unique_name(),
                md5::compute(container_path.as_bytes()),
            );
            let host_path = absolute_host_path(&host_path)?;
            debug!(host = %host_path, path = %container_path, "using path as cache");
            self.binds.push(format!("{host_path}:{container_path}"));
            return Ok(());
        }

        let container_name =
            cache_container_name(&self.job.project_unique_name(), &container_path);

        let mut container_id = String::new();
        if let Ok(existing) = self.client.container_inspect(&container_name).await {
            if existing
                .config
                .volumes
                .iter()
                .any(|volume| volume == &container_path)
            {
                container_id = existing.id;
            } else {
                // Stale: the recorded volumes no longer cover this path.
                let _ = network::remove_container(
                    self.client.as_ref(),
                    self.trace.as_ref(),
                    &existing.id,
                )
                .await;
            }
        }

        if container_id.is_empty() {
            container_id = self
                .create_cache_volume(&container_name, &container_path)
                .await?;
        }

        debug!(id = %container_id, path = %container_path, "using container as cache");
        self.volumes_from.push(container_id);
        Ok(())
    }

    /// Routes one declared volume to a bind or a cache.
    pub(crate) async fn add_volume(&mut self, volume: &str) -> Result<()> {
        let (host_part, container_part) = match volume.split_once(':') {
            Some((host, container)) => (Some(host.to_string()), container.to_string()),
            None => (None, volume.to_string()),
        };

        let result = match host_part {
            Some(host) => self.add_host_volume(&host, &container_part),
            None => self.add_cache_volume(&container_part).await,
        };

        if let Err(err) = &result {
            error!(volume, error = %err, "failed to create container volume");
        }
        result
    }

    /// Creates and initializes a cache container holding `container_path`
    /// as a declared volume. An empty name requests an anonymous container.
    /// Returns the new container's id; any id allocated on a failed path is
    /// registered for cleanup.
    pub(crate) async fn create_cache_volume(
        &mut self,
        container_name: &str,
        container_path: &str,
    ) -> Result<String> {
        let cache_image = self.ensure_prebuilt_image().await?;

        let config = ContainerConfig {
            image: cache_image.id,
            cmd: vec![CACHE_INIT_COMMAND.to_string(), container_path.to_string()],
            volumes: vec![container_path.to_string()],
            labels: self.labels("cache", &[("cache.dir", container_path)]),
            ..Default::default()
        };
        let host_config = HostConfig {
            restart_policy: RestartPolicy::never(),
            log_config: LogConfig::json_file(),
            ..Default::default()
        };

        let response = match self
            .client
            .container_create(container_name, config, host_config)
            .await
        {
            Ok(response) => response,
            Err(err) => return Err(self.register_create_failure(err)),
        };

        debug!(id = %response.id, "starting cache container");
        if let Err(err) = self.client.container_start(&response.id).await {
            self.failures.push(response.id);
            return Err(err);
        }

        debug!(id = %response.id, "waiting for cache container");
        if let Err(err) = sandbox::wait_for_container(self.client.as_ref(), &response.id).await {
            self.failures.push(response.id);
            return Err(err);
        }

        Ok(response.id)
    }

    /// Creates the volume that persists the project checkout.
    ///
    /// The volume covers the parent of the project directory because the
    /// build script removes the project directory itself; the mount must
    /// survive that deletion.
    pub(crate) async fn create_build_volume(&mut self) -> Result<()> {
        let parent = parent_dir(&self.job.full_project_dir);

        if !parent.starts_with('/') || parent == "/" {
            return Err(Error::InvalidBuildsDir {
                path: parent.into(),
            });
        }

        if is_host_mounted_volume(&self.job.root_dir, &self.docker.volumes) {
            // A user bind already covers the builds tree.
            return Ok(());
        }

        if self.job.git_strategy == GitStrategy::Fetch && !self.docker.disable_cache {
            // Persistent, named cache so the next run reuses the checkout.
            return self.add_volume(&parent).await;
        }

        // Fresh checkout every run: an anonymous cache container scoped to
        // this run is enough.
        let id = self.create_cache_volume("", &parent).await?;
        self.caches.push(id.clone());
        self.volumes_from.push(id);
        Ok(())
    }

    /// Plans every user-declared volume, in declaration order.
    pub(crate) async fn create_user_volumes(&mut self) -> Result<()> {
        for volume in self.docker.volumes.clone() {
            self.add_volume(&volume).await?;
        }
        Ok(())
    }
}
