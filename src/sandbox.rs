//! Sandbox container lifecycle.
//!
//! Creates the build container with the full host configuration the
//! planner and service manager accumulated, then drives the run:
//!
//! ```text
//! Attached ──► Started ──► (Running ⇄ Streaming) ──► Terminal
//!                                                    ├─ Exit(code)
//!                                                    ├─ attach error ──► kill
//!                                                    ├─ wait error
//!                                                    └─ Aborted ───────► kill
//! ```
//!
//! Three tasks run concurrently once the container starts: an output
//! demultiplexer feeding the trace, a stdin writer that half-closes after
//! the script, and a waiter polling for the exit. The first terminal event
//! wins; the kill path tears the others down.

use crate::client::{ContainerClient, ContainerConfig, ContainerDetails, HostConfig, LogConfig,
    RestartPolicy};
use crate::constants::{KILL_RETRY_INTERVAL, KILL_SIGNAL, WAIT_POLL_INTERVAL, WAIT_RETRY_LIMIT};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::network;
use crate::streams::demux_output;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

impl Executor {
    /// Creates a container of the given kind (a stage slug) from `image`,
    /// wired with everything prepare accumulated: devices, binds, links,
    /// volumes-from, and the host policy. Pre-removes any name collision.
    pub(crate) async fn create_container(
        &mut self,
        kind: &str,
        image_name: &str,
        cmd: Vec<String>,
    ) -> Result<ContainerDetails> {
        let image = self.ensure_image(image_name).await?;

        let hostname = if self.docker.hostname.is_empty() {
            self.job.project_unique_name()
        } else {
            self.docker.hostname.clone()
        };

        let mut env = self.job.variables.string_list();
        env.extend(self.shell_config.environment.iter().cloned());

        let config = ContainerConfig {
            image: image.id,
            hostname,
            cmd,
            env,
            labels: self.labels("build", &[]),
            tty: false,
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            open_stdin: true,
            // The script arrives once; the container must see EOF after it.
            stdin_once: true,
            ..Default::default()
        };

        let mut links = self.docker.links.clone();
        links.extend(self.links.iter().cloned());
        let mut volumes_from = self.docker.volumes_from.clone();
        volumes_from.extend(self.volumes_from.iter().cloned());

        let host_config = HostConfig {
            cpuset_cpus: self.docker.cpuset_cpus.clone(),
            devices: self.devices.clone(),
            dns: self.docker.dns.clone(),
            dns_search: self.docker.dns_search.clone(),
            privileged: self.docker.privileged,
            cap_add: self.docker.cap_add.clone(),
            cap_drop: self.docker.cap_drop.clone(),
            security_opt: self.docker.security_opt.clone(),
            restart_policy: RestartPolicy::never(),
            extra_hosts: self.docker.extra_hosts.clone(),
            network_mode: self.docker.network_mode.clone(),
            links,
            binds: self.binds.clone(),
            volume_driver: self.docker.volume_driver.clone(),
            volumes_from,
            log_config: LogConfig::json_file(),
        };

        let container_name = format!("{}-{kind}", self.job.project_unique_name());

        // A leftover container by this name would fail the create.
        let _ = network::remove_container(
            self.client.as_ref(),
            self.trace.as_ref(),
            &container_name,
        )
        .await;

        debug!(name = %container_name, "creating container");
        let response = match self
            .client
            .container_create(&container_name, config, host_config)
            .await
        {
            Ok(response) => response,
            Err(err) => return Err(self.register_create_failure(err)),
        };

        match self.client.container_inspect(&response.id).await {
            Ok(details) => Ok(details),
            Err(err) => {
                self.failures.push(response.id);
                Err(err)
            }
        }
    }

    /// Attaches to a created container, starts it, streams `input` into
    /// its stdin and its output into the trace, and waits for the outcome.
    ///
    /// Cancellation and attach-stream errors both kill the container; the
    /// waiter's verdict is surfaced otherwise.
    pub(crate) async fn watch_container(
        &self,
        id: &str,
        input: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        debug!(id, "attaching to container");
        let stream = self.client.container_attach(id).await?;
        let (reader, mut writer) = (stream.reader, stream.writer);

        debug!(id, "starting container");
        self.client.container_start(id).await?;

        debug!(id, "waiting for attach to finish");
        let (attach_tx, mut attach_rx) = mpsc::channel::<Error>(2);

        // Copy any output to the build trace.
        let trace = Arc::clone(&self.trace);
        let errors = attach_tx.clone();
        let output_pump = tokio::spawn(async move {
            let result = demux_output(reader, |_, chunk| trace.write_output(chunk)).await;
            if let Err(err) = result {
                let _ = errors.send(err).await;
            }
        });

        // Write the input to the container and half-close its stdin so the
        // shell sees end-of-script.
        let errors = attach_tx;
        let input_pump = tokio::spawn(async move {
            let result = async {
                writer.write_all(&input).await?;
                writer.shutdown().await
            }
            .await;
            if let Err(err) = result {
                let _ = errors.send(err.into()).await;
            }
        });

        let (wait_tx, mut wait_rx) = mpsc::channel::<Result<()>>(1);
        let client = Arc::clone(&self.client);
        let wait_id = id.to_string();
        tokio::spawn(async move {
            let _ = wait_tx
                .send(wait_for_container(client.as_ref(), &wait_id).await)
                .await;
        });

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                self.kill_container(id, &mut wait_rx).await;
                Err(Error::Aborted)
            }
            Some(err) = attach_rx.recv() => {
                self.kill_container(id, &mut wait_rx).await;
                debug!(id, error = %err, "container finished");
                Err(err)
            }
            Some(result) = wait_rx.recv() => {
                if let Err(err) = &result {
                    debug!(id, error = %err, "container finished");
                }
                result
            }
        };

        output_pump.abort();
        input_pump.abort();
        result
    }

    /// Kills a container and blocks until the waiter confirms it stopped.
    ///
    /// Loops deliberately without an upper bound: the daemon can be slow
    /// to act on a signal, and the caller owns the overall deadline. Each
    /// round scrubs network attachments first so a zombie attachment
    /// cannot pin the container.
    pub(crate) async fn kill_container(
        &self,
        id: &str,
        wait_rx: &mut mpsc::Receiver<Result<()>>,
    ) {
        loop {
            network::disconnect_all_networks(self.client.as_ref(), self.trace.as_ref(), id).await;
            debug!(id, "killing container");
            let _ = self.client.container_kill(id, KILL_SIGNAL).await;

            // Wait for the waiter to observe the death, or retry.
            tokio::select! {
                _ = wait_rx.recv() => return,
                _ = sleep(KILL_RETRY_INTERVAL) => {}
            }
        }
    }
}

/// Polls a container until it stops running.
///
/// Transient inspect failures are tolerated up to a limit; a not-found
/// answer is fatal immediately. A stopped container with a non-zero exit
/// code surfaces as a script failure.
pub(crate) async fn wait_for_container(client: &dyn ContainerClient, id: &str) -> Result<()> {
    debug!(id, "waiting for container");

    let mut retries: u32 = 0;

    loop {
        let details = match client.container_inspect(id).await {
            Ok(details) => details,
            Err(err) if err.is_not_found() => return Err(err),
            Err(err) => {
                if retries >= WAIT_RETRY_LIMIT {
                    return Err(err);
                }
                retries += 1;
                sleep(WAIT_POLL_INTERVAL).await;
                continue;
            }
        };

        retries = 0;

        if details.state.running {
            sleep(WAIT_POLL_INTERVAL).await;
            continue;
        }

        if details.state.exit_code != 0 {
            return Err(Error::ScriptExit {
                code: details.state.exit_code,
            });
        }

        return Ok(());
    }
}
