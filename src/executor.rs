//! Job lifecycle coordination.
//!
//! An [`Executor`] owns one job from `prepare` through `run` to `cleanup`.
//! Every daemon-side resource any component creates registers its id here,
//! which makes `cleanup` a pure drain: remove everything ever registered,
//! concurrently, swallowing errors.
//!
//! ```text
//! prepare ──► devices ──► project volume ──► services ──► user volumes
//!    │
//!    ├─ run(stage) ──► create sandbox ──► attach/stream/wait ─┐  (× stages)
//!    │                                                        │
//!    └─ cleanup ◄─────────────────────────────────────────────┘
//!       failures ∪ services ∪ caches ∪ builds, removed in parallel
//! ```
//!
//! One executor serves one build: the accumulators are written only from
//! the single `prepare`/`run` thread of control, so no locking is needed.

use crate::client::{ContainerClient, DeviceMapping, SystemInfo};
use crate::config::{DockerSettings, RunnerConfig};
use crate::constants::CONTAINER_LABEL_PREFIX;
use crate::error::{Error, Result};
use crate::job::{BuildJob, JobOptions};
use crate::network;
use crate::services::ServiceContainer;
use crate::shell::{BuildStage, Shell, ShellConfiguration};
use crate::trace::TraceSink;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Container-backed build executor.
///
/// Constructed per job with its capabilities injected; call
/// [`prepare`](Self::prepare), then [`run`](Self::run) once per stage, and
/// always [`cleanup`](Self::cleanup) regardless of the outcome.
pub struct Executor {
    pub(crate) client: Arc<dyn ContainerClient>,
    pub(crate) shell: Arc<dyn Shell>,
    pub(crate) trace: Arc<dyn TraceSink>,
    pub(crate) config: RunnerConfig,
    pub(crate) job: BuildJob,

    // Resolved at prepare.
    pub(crate) docker: DockerSettings,
    pub(crate) options: JobOptions,
    pub(crate) shell_config: ShellConfiguration,
    pub(crate) info: SystemInfo,
    pub(crate) image: String,
    pub(crate) shared_builds_dir: bool,

    // Per-run accumulators. Append-only during prepare/run; drained by
    // cleanup exactly once.
    pub(crate) failures: Vec<String>,
    pub(crate) builds: Vec<String>,
    pub(crate) services: Vec<ServiceContainer>,
    pub(crate) caches: Vec<String>,
    pub(crate) binds: Vec<String>,
    pub(crate) volumes_from: Vec<String>,
    pub(crate) devices: Vec<DeviceMapping>,
    pub(crate) links: Vec<String>,
}

impl Executor {
    /// Creates an executor for one job.
    pub fn new(
        client: Arc<dyn ContainerClient>,
        shell: Arc<dyn Shell>,
        trace: Arc<dyn TraceSink>,
        config: RunnerConfig,
        job: BuildJob,
    ) -> Self {
        Self {
            client,
            shell,
            trace,
            config,
            job,
            docker: DockerSettings::default(),
            options: JobOptions::default(),
            shell_config: ShellConfiguration::default(),
            info: SystemInfo::default(),
            image: String::new(),
            shared_builds_dir: false,
            failures: Vec::new(),
            builds: Vec::new(),
            services: Vec::new(),
            caches: Vec::new(),
            binds: Vec::new(),
            volumes_from: Vec::new(),
            devices: Vec::new(),
            links: Vec::new(),
        }
    }

    // =========================================================================
    // Prepare
    // =========================================================================

    /// Validates the configuration and stands up everything the sandbox
    /// needs: devices, the project volume, services, user volumes.
    ///
    /// The first failure surfaces immediately; resources created before it
    /// stay registered for [`cleanup`](Self::cleanup).
    pub async fn prepare(&mut self, cancel: &CancellationToken) -> Result<()> {
        let shell_config = self.shell.configuration(&self.job)?;
        if shell_config.pass_file {
            return Err(Error::ScriptFileShell {
                shell: self.shell.name().to_string(),
            });
        }
        self.shell_config = shell_config;

        self.docker = self
            .config
            .docker
            .clone()
            .ok_or(Error::MissingDockerSettings)?;

        self.prepare_builds_dir();

        self.options = self.job.decode_options()?;

        let image = self.image_name()?;
        self.trace
            .println(&format!("Using Docker executor with image {image} ..."));
        self.image = image;

        self.info = self.client.info().await?;

        // Acquire the build image up front: a job doomed by a missing or
        // unpullable image must fail before any resource exists.
        let image = self.image.clone();
        self.ensure_image(&image).await?;

        self.create_dependencies(cancel).await
    }

    /// Flags a builds tree that lives on a host mount; such checkouts are
    /// shared between concurrent jobs and the shell must serialize around
    /// that.
    fn prepare_builds_dir(&mut self) {
        let root_dir = if self.docker.builds_dir.is_empty() {
            self.job.root_dir.clone()
        } else {
            self.docker.builds_dir.clone()
        };
        self.shared_builds_dir =
            crate::volumes::is_host_mounted_volume(&root_dir, &self.docker.volumes);
    }

    /// True when the builds tree is shared with the host through a bind.
    pub fn shared_builds_dir(&self) -> bool {
        self.shared_builds_dir
    }

    async fn create_dependencies(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.check_abort(cancel)?;
        self.debugln("Binding devices...");
        self.bind_devices()?;

        self.check_abort(cancel)?;
        self.debugln("Creating build volume...");
        self.create_build_volume().await?;

        self.check_abort(cancel)?;
        self.debugln("Creating services...");
        self.create_services().await?;

        self.check_abort(cancel)?;
        self.debugln("Creating user-defined volumes...");
        self.create_user_volumes().await?;

        Ok(())
    }

    /// Operator-level detail: always logged, and mirrored into the build
    /// trace when the job asked for a debug trace.
    pub(crate) fn debugln(&self, line: &str) {
        debug!("{line}");
        if self.job.debug_trace {
            self.trace.println(line);
        }
    }

    fn check_abort(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Run
    // =========================================================================

    /// Runs one stage of the build in a fresh sandbox container, feeding
    /// the stage script through stdin and streaming output to the trace.
    ///
    /// A stage whose shell produces no script is skipped silently.
    pub async fn run(&mut self, stage: BuildStage, cancel: &CancellationToken) -> Result<()> {
        let script = match self.shell.generate_script(stage, &self.job)? {
            Some(script) => script,
            None => return Ok(()),
        };

        let mut cmd = vec![self.shell_config.command.clone()];
        cmd.extend(self.shell_config.arguments.iter().cloned());

        let image = self.image.clone();
        let details = self.create_container(stage.slug(), &image, cmd).await?;
        self.builds.push(details.id.clone());

        self.watch_container(&details.id, script.into_bytes(), cancel)
            .await
    }

    // =========================================================================
    // Cleanup
    // =========================================================================

    /// Removes every registered container concurrently and releases the
    /// client. Idempotent: a second call finds nothing to remove. Removal
    /// errors are logged and swallowed.
    pub async fn cleanup(&mut self) {
        let mut ids: Vec<String> = Vec::new();
        ids.append(&mut self.failures);
        ids.extend(std::mem::take(&mut self.services).into_iter().map(|s| s.id));
        ids.append(&mut self.caches);
        ids.append(&mut self.builds);

        let mut removals = JoinSet::new();
        for id in ids {
            let client = Arc::clone(&self.client);
            let trace = Arc::clone(&self.trace);
            removals.spawn(async move {
                let _ = network::remove_container(client.as_ref(), trace.as_ref(), &id).await;
            });
        }
        while removals.join_next().await.is_some() {}

        self.client.close().await;
    }

    // =========================================================================
    // Image Selection and Allow-Lists
    // =========================================================================

    /// Resolves the image the sandbox runs, applying variable expansion and
    /// the allow-list to a job-declared override.
    pub(crate) fn image_name(&self) -> Result<String> {
        if !self.options.image.is_empty() {
            let image = self.job.variables.expand(&self.options.image);
            self.verify_allowed_image(
                &self.options.image,
                "images",
                &self.docker.allowed_images,
                std::slice::from_ref(&self.docker.image),
            )?;
            return Ok(image);
        }

        if self.docker.image.is_empty() {
            return Err(Error::NoImageSpecified);
        }
        Ok(self.docker.image.clone())
    }

    /// Checks an image against glob patterns plus an internal list. An
    /// empty pattern list is permissive. On rejection the trace shows what
    /// would have been allowed.
    pub(crate) fn verify_allowed_image(
        &self,
        image: &str,
        option_name: &str,
        allowed_images: &[String],
        internal_images: &[String],
    ) -> Result<()> {
        for allowed in allowed_images {
            if let Ok(pattern) = glob::Pattern::new(allowed) {
                if pattern.matches(image) {
                    return Ok(());
                }
            }
        }

        for internal in internal_images {
            if internal == image {
                return Ok(());
            }
        }

        if allowed_images.is_empty() {
            // Overriding the image is allowed by default.
            return Ok(());
        }

        self.trace.println("");
        self.trace.println(&format!(
            "The {image} is not present on list of allowed {option_name}:"
        ));
        for allowed in allowed_images {
            self.trace.println(&format!("- {allowed}"));
        }
        self.trace.println("");
        self.trace
            .println("Please check the runner's configuration.");

        Err(Error::ImageNotAllowed {
            image: image.to_string(),
        })
    }

    // =========================================================================
    // Labels
    // =========================================================================

    /// Builds the label set for one container. `container_type` is the
    /// `type` label; `extra` adds per-type pairs such as `cache.dir`.
    pub(crate) fn labels(
        &self,
        container_type: &str,
        extra: &[(&str, &str)],
    ) -> HashMap<String, String> {
        let prefix = CONTAINER_LABEL_PREFIX;
        let mut labels = HashMap::from([
            (format!("{prefix}.build.id"), self.job.id.to_string()),
            (format!("{prefix}.build.sha"), self.job.sha.clone()),
            (
                format!("{prefix}.build.before_sha"),
                self.job.before_sha.clone(),
            ),
            (
                format!("{prefix}.build.ref_name"),
                self.job.ref_name.clone(),
            ),
            (
                format!("{prefix}.project.id"),
                self.job.project_id.to_string(),
            ),
            (format!("{prefix}.runner.id"), self.job.runner_short_id()),
            (
                format!("{prefix}.runner.local_id"),
                self.job.runner_id.to_string(),
            ),
            (format!("{prefix}.type"), container_type.to_string()),
        ]);
        for (key, value) in extra {
            labels.insert(format!("{prefix}.{key}"), (*value).to_string());
        }
        labels
    }

    // =========================================================================
    // Shared Helpers
    // =========================================================================

    /// Environment for service containers: public or internal variables.
    pub(crate) fn service_variables(&self) -> Vec<String> {
        self.job.variables.public_or_internal().string_list()
    }

    /// Registers the partial id of a failed creation, when the daemon
    /// allocated one, so cleanup can collect it.
    pub(crate) fn register_create_failure(&mut self, err: Error) -> Error {
        if let Error::CreateFailed { id: Some(id), .. } = &err {
            self.failures.push(id.clone());
        }
        err
    }
}
