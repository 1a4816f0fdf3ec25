//! Shared test support: an in-memory container daemon, a buffering trace,
//! a stdin-injected test shell, and fixture builders.
//!
//! The mock daemon implements the full client capability over a mutexed
//! state table. Containers behave by their `type` label: cache containers
//! exit cleanly on start, services keep running, readiness probes exit
//! clean unless their service is marked unhealthy, and build containers
//! run a scripted stdin/stdout exchange over duplex pipes.

#![allow(dead_code)]

use async_trait::async_trait;
use buildrun::client::{
    AttachedStream, ContainerClient, ContainerConfig, ContainerCreateResponse, ContainerDetails,
    ContainerRemoveOptions, ContainerState, HostConfig, ImageInspect, ImagePullOptions,
    LogsOptions, NetworkResource, SystemInfo,
};
use buildrun::constants::CONTAINER_LABEL_PREFIX;
use buildrun::error::{Error, Result};
use buildrun::job::{BuildJob, GitStrategy, VariableSet};
use buildrun::shell::{BuildStage, Shell, ShellConfiguration};
use buildrun::streams::{mux_frame, StreamKind};
use buildrun::trace::TraceSink;
use buildrun::{DockerSettings, RunnerConfig};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;

// =============================================================================
// Mock Daemon
// =============================================================================

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub name: String,
    pub config: ContainerConfig,
    pub host_config: HostConfig,
    pub running: bool,
    pub exit_code: i64,
    pub started: bool,
}

#[derive(Default)]
struct MockState {
    architecture: String,
    /// Locally present images by every name they answer to.
    images: HashMap<String, ImageInspect>,
    /// References the registry can serve.
    registry: HashSet<String>,
    pulls: Vec<String>,
    imports: Vec<String>,
    containers: HashMap<String, MockContainer>,
    names: HashMap<String, String>,
    removed: Vec<String>,
    kills: Vec<(String, String)>,
    networks: Vec<NetworkResource>,
    disconnects: Vec<(String, String)>,
    /// Service container names whose readiness probe should never finish.
    unhealthy_services: HashSet<String>,
    /// Service container names that die right after starting.
    dying_services: HashSet<String>,
    /// Every container name ever created, including later-removed ones.
    created_names: Vec<String>,
    /// Canned log bytes per container name (multiplexed on fetch).
    logs: HashMap<String, Vec<u8>>,
    /// Build container names whose script never finishes on its own.
    hanging_builds: HashSet<String>,
    /// Exit code override per build container name.
    build_exit_codes: HashMap<String, i64>,
    /// Output written to every build container's stdout.
    build_output: Vec<u8>,
    /// Stdin captured per container id.
    stdin: HashMap<String, Vec<u8>>,
    next_id: u64,
    closed: bool,
}

#[derive(Clone)]
pub struct MockDaemon {
    state: Arc<Mutex<MockState>>,
}

impl MockDaemon {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                architecture: "x86_64".to_string(),
                build_output: b"job output\n".to_vec(),
                ..MockState::default()
            })),
        }
    }

    pub fn with_architecture(self, architecture: &str) -> Self {
        self.state.lock().unwrap().architecture = architecture.to_string();
        self
    }

    /// Registers a locally present image reachable under several names.
    pub fn add_local_image(&self, id: &str, names: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let inspect = ImageInspect {
            id: id.to_string(),
            repo_tags: names.iter().map(|n| n.to_string()).collect(),
            architecture: state.architecture.clone(),
        };
        state.images.insert(id.to_string(), inspect.clone());
        for name in names {
            state.images.insert(name.to_string(), inspect.clone());
        }
    }

    /// Makes a reference pullable; the pull materializes a local image.
    pub fn add_registry_image(&self, reference: &str) {
        self.state
            .lock()
            .unwrap()
            .registry
            .insert(reference.to_string());
    }

    pub fn add_network(&self, network: NetworkResource) {
        self.state.lock().unwrap().networks.push(network);
    }

    pub fn mark_service_unhealthy(&self, container_name: &str) {
        self.state
            .lock()
            .unwrap()
            .unhealthy_services
            .insert(container_name.to_string());
    }

    pub fn mark_service_dying(&self, container_name: &str) {
        self.state
            .lock()
            .unwrap()
            .dying_services
            .insert(container_name.to_string());
    }

    pub fn set_container_logs(&self, container_name: &str, lines: &[&str]) {
        let mut raw = Vec::new();
        for line in lines {
            raw.extend(mux_frame(StreamKind::Stdout, format!("{line}\n").as_bytes()));
        }
        self.state
            .lock()
            .unwrap()
            .logs
            .insert(container_name.to_string(), raw);
    }

    pub fn mark_build_hanging(&self, container_name: &str) {
        self.state
            .lock()
            .unwrap()
            .hanging_builds
            .insert(container_name.to_string());
    }

    pub fn set_build_exit_code(&self, container_name: &str, code: i64) {
        self.state
            .lock()
            .unwrap()
            .build_exit_codes
            .insert(container_name.to_string(), code);
    }

    /// Plants a pre-existing container, e.g. a cache left by an earlier run.
    pub fn plant_container(
        &self,
        id: &str,
        name: &str,
        config: ContainerConfig,
        running: bool,
    ) {
        let mut state = self.state.lock().unwrap();
        state.containers.insert(
            id.to_string(),
            MockContainer {
                id: id.to_string(),
                name: name.to_string(),
                config,
                host_config: HostConfig::default(),
                running,
                exit_code: 0,
                started: false,
            },
        );
        state.names.insert(name.to_string(), id.to_string());
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    pub fn pulls(&self) -> Vec<String> {
        self.state.lock().unwrap().pulls.clone()
    }

    pub fn imports(&self) -> Vec<String> {
        self.state.lock().unwrap().imports.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn kills(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().kills.clone()
    }

    pub fn disconnects(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().disconnects.clone()
    }

    pub fn closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn created_names(&self) -> Vec<String> {
        self.state.lock().unwrap().created_names.clone()
    }

    /// Live containers, in creation order.
    pub fn live_containers(&self) -> Vec<MockContainer> {
        let state = self.state.lock().unwrap();
        let mut containers: Vec<_> = state.containers.values().cloned().collect();
        containers.sort_by(|a, b| a.id.cmp(&b.id));
        containers
    }

    pub fn container_by_name(&self, name: &str) -> Option<MockContainer> {
        let state = self.state.lock().unwrap();
        let id = state.names.get(name)?;
        state.containers.get(id).cloned()
    }

    pub fn stdin_for(&self, id: &str) -> Vec<u8> {
        self.state
            .lock()
            .unwrap()
            .stdin
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    fn resolve(&self, id_or_name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        if state.containers.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        state.names.get(id_or_name).cloned()
    }

    fn container_type(config: &ContainerConfig) -> String {
        config
            .labels
            .get(&format!("{CONTAINER_LABEL_PREFIX}.type"))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContainerClient for MockDaemon {
    async fn info(&self) -> Result<SystemInfo> {
        let state = self.state.lock().unwrap();
        Ok(SystemInfo {
            architecture: state.architecture.clone(),
            os_type: "linux".to_string(),
            server_version: "mock".to_string(),
        })
    }

    async fn image_inspect(&self, name: &str) -> Result<ImageInspect> {
        let state = self.state.lock().unwrap();
        state
            .images
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                what: format!("image {name}"),
            })
    }

    async fn image_pull(&self, reference: &str, _options: ImagePullOptions) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.pulls.push(reference.to_string());
        if !state.registry.contains(reference) {
            return Err(Error::NotFound {
                what: format!("image {reference}"),
            });
        }
        let id = format!("sha256:{:x}", md5::compute(reference.as_bytes()));
        let inspect = ImageInspect {
            id: id.clone(),
            repo_tags: vec![reference.to_string()],
            architecture: state.architecture.clone(),
        };
        // The pulled image answers to the full reference, the bare name,
        // and its id.
        state.images.insert(reference.to_string(), inspect.clone());
        if let Some((bare, _)) = reference.rsplit_once(':') {
            state.images.insert(bare.to_string(), inspect.clone());
        }
        state.images.insert(id, inspect);
        Ok(())
    }

    async fn image_import(&self, _data: &[u8], reference: &str, tag: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let full = format!("{reference}:{tag}");
        state.imports.push(full.clone());
        let id = format!("sha256:{:x}", md5::compute(full.as_bytes()));
        let inspect = ImageInspect {
            id: id.clone(),
            repo_tags: vec![full.clone()],
            architecture: state.architecture.clone(),
        };
        state.images.insert(full, inspect.clone());
        state.images.insert(id, inspect);
        Ok(())
    }

    async fn container_create(
        &self,
        name: &str,
        config: ContainerConfig,
        host_config: HostConfig,
    ) -> Result<ContainerCreateResponse> {
        let mut state = self.state.lock().unwrap();
        if !name.is_empty() && state.names.contains_key(name) {
            return Err(Error::Daemon {
                op: "container create".to_string(),
                reason: format!("name {name} is already in use"),
            });
        }
        state.next_id += 1;
        let id = format!("ctr-{:04}", state.next_id);
        let name = if name.is_empty() {
            id.clone()
        } else {
            name.to_string()
        };
        state.containers.insert(
            id.clone(),
            MockContainer {
                id: id.clone(),
                name: name.clone(),
                config,
                host_config,
                running: false,
                exit_code: 0,
                started: false,
            },
        );
        state.names.insert(name.clone(), id.clone());
        state.created_names.push(name);
        Ok(ContainerCreateResponse {
            id,
            warnings: Vec::new(),
        })
    }

    async fn container_start(&self, id: &str) -> Result<()> {
        let id = self.resolve(id).ok_or_else(|| Error::NotFound {
            what: format!("container {id}"),
        })?;
        let mut state = self.state.lock().unwrap();
        let unhealthy = state.unhealthy_services.clone();
        let state_dying = state.dying_services.clone();
        let container = state.containers.get_mut(&id).ok_or_else(|| Error::NotFound {
            what: format!("container {id}"),
        })?;
        container.started = true;

        match Self::container_type(&container.config).as_str() {
            // Cache containers initialize their volume and exit cleanly.
            "cache" => {
                container.running = false;
                container.exit_code = 0;
            }
            // Services keep running until killed or removed, unless they
            // are marked as dying right after start.
            "service" => {
                if state_dying.contains(&container.name) {
                    container.running = false;
                    container.exit_code = 1;
                } else {
                    container.running = true;
                }
            }
            // Probes exit clean unless their service is marked unhealthy.
            "wait" => {
                let probed = container
                    .host_config
                    .links
                    .first()
                    .and_then(|link| link.split(':').next())
                    .unwrap_or_default()
                    .to_string();
                if unhealthy.contains(&probed) {
                    container.running = true;
                } else {
                    container.running = false;
                    container.exit_code = 0;
                }
            }
            // Build containers finish when their attach exchange does.
            _ => container.running = true,
        }
        Ok(())
    }

    async fn container_inspect(&self, id: &str) -> Result<ContainerDetails> {
        let id = self.resolve(id).ok_or_else(|| Error::NotFound {
            what: format!("container {id}"),
        })?;
        let state = self.state.lock().unwrap();
        let container = state.containers.get(&id).ok_or_else(|| Error::NotFound {
            what: format!("container {id}"),
        })?;
        Ok(ContainerDetails {
            id: container.id.clone(),
            name: container.name.clone(),
            state: ContainerState {
                running: container.running,
                exit_code: container.exit_code,
            },
            config: container.config.clone(),
        })
    }

    async fn container_attach(&self, id: &str) -> Result<AttachedStream> {
        let id = self.resolve(id).ok_or_else(|| Error::NotFound {
            what: format!("container {id}"),
        })?;
        let (output, hangs, exit_code) = {
            let state = self.state.lock().unwrap();
            let container = state.containers.get(&id).ok_or_else(|| Error::NotFound {
                what: format!("container {id}"),
            })?;
            (
                state.build_output.clone(),
                state.hanging_builds.contains(&container.name),
                state
                    .build_exit_codes
                    .get(&container.name)
                    .copied()
                    .unwrap_or(0),
            )
        };

        let (stdout_theirs, stdout_ours) = tokio::io::duplex(64 * 1024);
        let (stdin_ours, stdin_theirs) = tokio::io::duplex(64 * 1024);

        let mock = self.clone();
        tokio::spawn(async move {
            // The container consumes the script first.
            let mut stdin_end = stdin_theirs;
            let mut script = Vec::new();
            let _ = stdin_end.read_to_end(&mut script).await;
            mock.state
                .lock()
                .unwrap()
                .stdin
                .insert(id.clone(), script);

            if hangs {
                // Keep the stream open; only a kill ends this container.
                std::mem::forget(stdout_ours);
                return;
            }

            use tokio::io::AsyncWriteExt;
            let mut stdout_end = stdout_ours;
            let _ = stdout_end
                .write_all(&mux_frame(StreamKind::Stdout, &output))
                .await;
            let _ = stdout_end.shutdown().await;

            let mut state = mock.state.lock().unwrap();
            if let Some(container) = state.containers.get_mut(&id) {
                container.running = false;
                container.exit_code = exit_code;
            }
        });

        Ok(AttachedStream {
            reader: Box::new(stdout_theirs),
            writer: Box::new(stdin_ours),
        })
    }

    async fn container_logs(
        &self,
        id: &str,
        _options: LogsOptions,
    ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
        let id = self.resolve(id).ok_or_else(|| Error::NotFound {
            what: format!("container {id}"),
        })?;
        let state = self.state.lock().unwrap();
        let name = state
            .containers
            .get(&id)
            .map(|c| c.name.clone())
            .unwrap_or_default();
        let raw = state.logs.get(&name).cloned().unwrap_or_default();
        Ok(Box::new(std::io::Cursor::new(raw)))
    }

    async fn container_kill(&self, id: &str, signal: &str) -> Result<()> {
        let id = self.resolve(id).ok_or_else(|| Error::NotFound {
            what: format!("container {id}"),
        })?;
        let mut state = self.state.lock().unwrap();
        state.kills.push((id.clone(), signal.to_string()));
        if let Some(container) = state.containers.get_mut(&id) {
            if container.running {
                container.running = false;
                container.exit_code = 137;
            }
        }
        Ok(())
    }

    async fn container_remove(&self, id: &str, _options: ContainerRemoveOptions) -> Result<()> {
        let resolved = self.resolve(id);
        let mut state = self.state.lock().unwrap();
        match resolved {
            Some(id) => {
                if let Some(container) = state.containers.remove(&id) {
                    state.names.remove(&container.name);
                }
                state.removed.push(id);
                Ok(())
            }
            None => Err(Error::NotFound {
                what: format!("container {id}"),
            }),
        }
    }

    async fn network_list(&self) -> Result<Vec<NetworkResource>> {
        Ok(self.state.lock().unwrap().networks.clone())
    }

    async fn network_disconnect(
        &self,
        network_id: &str,
        container: &str,
        _force: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .disconnects
            .push((network_id.to_string(), container.to_string()));
        for network in &mut state.networks {
            if network.id == network_id {
                network
                    .containers
                    .retain(|id, endpoint| id != container && endpoint.name != container);
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }
}

// =============================================================================
// Buffer Trace
// =============================================================================

#[derive(Default)]
struct TraceState {
    output: Vec<u8>,
    lines: Vec<String>,
    warnings: Vec<String>,
}

#[derive(Clone, Default)]
pub struct BufferTrace {
    state: Arc<Mutex<TraceState>>,
}

impl BufferTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().unwrap().output).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.state.lock().unwrap().lines.clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.state.lock().unwrap().warnings.clone()
    }
}

impl TraceSink for BufferTrace {
    fn write_output(&self, bytes: &[u8]) {
        self.state.lock().unwrap().output.extend_from_slice(bytes);
    }

    fn println(&self, line: &str) {
        self.state.lock().unwrap().lines.push(line.to_string());
    }

    fn warning(&self, line: &str) {
        self.state.lock().unwrap().warnings.push(line.to_string());
    }
}

// =============================================================================
// Test Shell
// =============================================================================

/// Stdin-injected shell that echoes the stage name.
pub struct TestShell {
    pub pass_file: bool,
}

impl TestShell {
    pub fn new() -> Self {
        Self { pass_file: false }
    }
}

impl Shell for TestShell {
    fn name(&self) -> &str {
        "test-bash"
    }

    fn configuration(&self, _job: &BuildJob) -> Result<ShellConfiguration> {
        Ok(ShellConfiguration {
            command: "bash".to_string(),
            arguments: vec!["--login".to_string()],
            environment: vec!["SHELL_INJECTED=1".to_string()],
            user: String::new(),
            pass_file: self.pass_file,
            extension: String::new(),
        })
    }

    fn generate_script(&self, stage: BuildStage, _job: &BuildJob) -> Result<Option<String>> {
        Ok(Some(format!("echo running {stage}\n")))
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn test_job() -> BuildJob {
    BuildJob {
        id: 42,
        project_id: 17,
        sha: "deadbeef".to_string(),
        before_sha: "cafebabe".to_string(),
        ref_name: "main".to_string(),
        runner_token: "runner-token".to_string(),
        runner_id: 3,
        concurrent_id: 0,
        full_project_dir: "/builds/group/app".to_string(),
        root_dir: "/builds".to_string(),
        git_strategy: GitStrategy::Fetch,
        variables: VariableSet::default(),
        credentials: Vec::new(),
        auth_config_json: String::new(),
        options: serde_json::json!({ "image": "alpine", "services": [] }),
        debug_trace: false,
    }
}

pub fn docker_settings() -> DockerSettings {
    DockerSettings {
        image: "alpine".to_string(),
        ..DockerSettings::default()
    }
}

pub fn runner_config(settings: DockerSettings) -> RunnerConfig {
    RunnerConfig {
        docker: Some(settings),
    }
}

/// Seeds the images every happy-path job needs.
pub fn seed_alpine(daemon: &MockDaemon) {
    daemon.add_local_image("sha256:alpine", &["alpine", "alpine:latest"]);
    daemon.add_registry_image("alpine:latest");
}

pub fn executor(
    daemon: &MockDaemon,
    trace: &BufferTrace,
    settings: DockerSettings,
    job: BuildJob,
) -> buildrun::Executor {
    buildrun::Executor::new(
        Arc::new(daemon.clone()),
        Arc::new(TestShell::new()),
        Arc::new(trace.clone()),
        runner_config(settings),
        job,
    )
}
