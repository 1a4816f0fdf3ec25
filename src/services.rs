//! Service container management.
//!
//! Stands up the auxiliary containers a job declared (databases, brokers),
//! aggregates their DNS aliases into the sandbox link set, and waits for
//! readiness with transient probe containers. Readiness trouble is a
//! warning, never a build failure: the script may not need the service at
//! all, and if it does, it fails with a far better message of its own.

use crate::client::{ContainerClient, ContainerConfig, HostConfig, LogConfig, LogsOptions,
    RestartPolicy};
use crate::constants::{DEFAULT_WAIT_FOR_SERVICES_TIMEOUT, SERVICE_PROBE_COMMAND,
    WAIT_CONTAINER_SUFFIX};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::network;
use crate::reference;
use crate::sandbox::wait_for_container;
use crate::streams::demux_output;
use crate::trace::TraceSink;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::debug;

/// A created service container, by daemon id and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContainer {
    pub id: String,
    pub name: String,
}

/// Everything a readiness probe needs, owned so the probes can run as
/// independent tasks.
struct HealthCheckContext {
    client: Arc<dyn ContainerClient>,
    trace: Arc<dyn TraceSink>,
    service: ServiceContainer,
    prebuilt_image: String,
    network_mode: String,
    labels: HashMap<String, String>,
    timeout: Duration,
}

impl Executor {
    /// Creates every configured and declared service, waits for readiness,
    /// and builds the sandbox link list.
    pub(crate) async fn create_services(&mut self) -> Result<()> {
        let service_names = self.service_names()?;

        let mut links_map: BTreeMap<String, ServiceContainer> = BTreeMap::new();
        for description in &service_names {
            self.create_from_service_description(description, &mut links_map)
                .await?;
        }

        self.wait_for_services().await;

        self.links = self.build_service_links(&links_map).await;
        Ok(())
    }

    /// Runner-configured services plus job-declared ones, the latter
    /// expanded and checked against the allow-list.
    fn service_names(&self) -> Result<Vec<String>> {
        let mut services = self.docker.services.clone();

        for service in &self.options.services {
            let service = self.job.variables.expand(service);
            self.verify_allowed_image(
                &service,
                "services",
                &self.docker.allowed_services,
                &self.docker.services,
            )?;
            services.push(service);
        }

        Ok(services)
    }

    /// Creates the container for one service description and maps every
    /// alias it produces. Aliases already mapped by an earlier service are
    /// warned about and skipped.
    async fn create_from_service_description(
        &mut self,
        description: &str,
        links_map: &mut BTreeMap<String, ServiceContainer>,
    ) -> Result<()> {
        let parsed = reference::split_service_and_version(description)?;

        let mut created: Option<ServiceContainer> = None;
        for link_name in &parsed.link_names {
            if links_map.contains_key(link_name) {
                self.trace
                    .warning(&format!("Service {description} is already created. Ignoring."));
                continue;
            }

            let container = match &created {
                Some(container) => container.clone(),
                None => {
                    let container = self
                        .create_service(&parsed.service, &parsed.version, &parsed.image_name)
                        .await?;
                    debug!(service = description, id = %container.id, "created service");
                    self.services.push(container.clone());
                    created = Some(container.clone());
                    container
                }
            };
            links_map.insert(link_name.clone(), container);
        }
        Ok(())
    }

    /// Creates and starts one service container.
    async fn create_service(
        &mut self,
        service: &str,
        version: &str,
        image: &str,
    ) -> Result<ServiceContainer> {
        if service.is_empty() {
            return Err(Error::InvalidServiceName);
        }

        self.trace
            .println(&format!("Starting service {service}:{version} ..."));
        let service_image = self.ensure_image(image).await?;

        let container_name = format!(
            "{}-{}",
            self.job.project_unique_name(),
            service.replace('/', "__")
        );

        // A name collision from an earlier run would fail the create.
        let _ = network::remove_container(
            self.client.as_ref(),
            self.trace.as_ref(),
            &container_name,
        )
        .await;

        let config = ContainerConfig {
            image: service_image.id,
            labels: self.labels(
                "service",
                &[("service", service), ("service.version", version)],
            ),
            env: self.service_variables(),
            ..Default::default()
        };

        let host_config = HostConfig {
            restart_policy: RestartPolicy::never(),
            privileged: self.docker.privileged,
            network_mode: self.docker.network_mode.clone(),
            binds: self.binds.clone(),
            volumes_from: self.volumes_from.clone(),
            log_config: LogConfig::json_file(),
            ..Default::default()
        };

        debug!(name = %container_name, "creating service container");
        let response = match self
            .client
            .container_create(&container_name, config, host_config)
            .await
        {
            Ok(response) => response,
            Err(err) => return Err(self.register_create_failure(err)),
        };

        debug!(id = %response.id, "starting service container");
        if let Err(err) = self.client.container_start(&response.id).await {
            self.failures.push(response.id);
            return Err(err);
        }

        Ok(ServiceContainer {
            id: response.id,
            name: container_name,
        })
    }

    /// Waits for every created service, one probe task per service, all
    /// bounded by the configured timeout. Zero selects the default;
    /// negative skips the wait entirely.
    async fn wait_for_services(&mut self) {
        let timeout = match self.docker.wait_for_services_timeout {
            0 => DEFAULT_WAIT_FOR_SERVICES_TIMEOUT,
            negative if negative < 0 => return,
            seconds => Duration::from_secs(seconds as u64),
        };

        if self.services.is_empty() {
            return;
        }

        self.trace
            .println("Waiting for services to be up and running...");

        let prebuilt = match self.ensure_prebuilt_image().await {
            Ok(image) => image,
            Err(err) => {
                // Without the probe image readiness cannot be checked at
                // all; warn per service and move on.
                for service in &self.services {
                    self.trace.warning(&service_warning(&service.name, &err, ""));
                }
                return;
            }
        };

        let mut probes = JoinSet::new();
        for service in self.services.clone() {
            let labels = self.labels("wait", &[("wait", &service.id)]);
            probes.spawn(wait_for_service_container(HealthCheckContext {
                client: Arc::clone(&self.client),
                trace: Arc::clone(&self.trace),
                service,
                prebuilt_image: prebuilt.id.clone(),
                network_mode: self.docker.network_mode.clone(),
                labels,
                timeout,
            }));
        }
        while probes.join_next().await.is_some() {}
    }

    /// Re-inspects every aliased service and emits an `id:alias` link for
    /// each one still running. Services that died stay out of the link
    /// set; the readiness warning already told the user.
    async fn build_service_links(
        &self,
        links_map: &BTreeMap<String, ServiceContainer>,
    ) -> Vec<String> {
        let mut links = Vec::new();
        for (alias, service) in links_map {
            let details = match self.client.container_inspect(&service.id).await {
                Ok(details) => details,
                Err(_) => continue,
            };
            if details.state.running {
                links.push(format!("{}:{alias}", service.id));
            }
        }
        links
    }
}

/// Probes one service and turns any trouble into a trace warning carrying
/// the tail of the service's own log.
async fn wait_for_service_container(ctx: HealthCheckContext) {
    let err = match run_service_health_check(&ctx).await {
        Ok(()) => return,
        Err(err) => err,
    };

    let mut log_tail = String::new();
    match ctx
        .client
        .container_logs(
            &ctx.service.id,
            LogsOptions {
                stdout: true,
                stderr: true,
                timestamps: true,
            },
        )
        .await
    {
        Ok(reader) => {
            let mut raw = Vec::new();
            let _ = demux_output(reader, |_, chunk| raw.extend_from_slice(chunk)).await;
            log_tail = String::from_utf8_lossy(&raw).trim().to_string();
        }
        Err(logs_err) => log_tail.push_str(&logs_err.to_string()),
    }

    ctx.trace
        .warning(&service_warning(&ctx.service.name, &err, &log_tail));
}

/// Formats the non-fatal service warning block written to the trace.
fn service_warning(service_name: &str, err: &Error, log_tail: &str) -> String {
    let mut message = format!(
        "\n*** WARNING: Service {service_name} probably didn't start properly.\n\n{err}\n"
    );
    if !log_tail.is_empty() {
        message.push('\n');
        message.push_str(log_tail);
        message.push('\n');
    }
    message.push_str("\n*********\n");
    message
}

/// Runs one transient probe container linked to the service and waits for
/// a clean exit within the timeout. The probe is removed on every path.
async fn run_service_health_check(ctx: &HealthCheckContext) -> Result<()> {
    let container_name = format!("{}{WAIT_CONTAINER_SUFFIX}", ctx.service.name);

    let config = ContainerConfig {
        image: ctx.prebuilt_image.clone(),
        cmd: vec![SERVICE_PROBE_COMMAND.to_string()],
        labels: ctx.labels.clone(),
        ..Default::default()
    };
    let host_config = HostConfig {
        restart_policy: RestartPolicy::never(),
        links: vec![format!("{0}:{0}", ctx.service.name)],
        network_mode: ctx.network_mode.clone(),
        log_config: LogConfig::json_file(),
        ..Default::default()
    };

    debug!(name = %container_name, "waiting for service container to be up and running");
    let response = ctx
        .client
        .container_create(&container_name, config, host_config)
        .await?;

    let result = async {
        ctx.client.container_start(&response.id).await?;
        match tokio::time::timeout(
            ctx.timeout,
            wait_for_container(ctx.client.as_ref(), &response.id),
        )
        .await
        {
            Ok(wait_result) => wait_result,
            Err(_) => Err(Error::ServiceTimeout {
                service: container_name.clone(),
            }),
        }
    }
    .await;

    let _ = network::remove_container(ctx.client.as_ref(), ctx.trace.as_ref(), &response.id).await;
    result
}
