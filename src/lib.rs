//! # buildrun
//!
//! **Container-Backed Build Executor**
//!
//! Given a build job — a project checkout, a declared image, service
//! dependencies, and a shell script — this crate provisions an isolated
//! container sandbox, stands up service containers networked to it,
//! streams the script in and the output back out, enforces cancellation,
//! and tears everything down with no leaks, including on failure.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                            Executor                               │
//! │             prepare() ──► run(stage)* ──► cleanup()               │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  reference   auth      image        volumes          services     │
//! │  parsing  ─► resolve ─► acquisition  binds + caches   create +    │
//! │                         (pull policy,  (md5-named      link +     │
//! │                          prebuilt)     containers)     readiness  │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  sandbox: attach ─► start ─► stream/wait ─► exit | kill | abort   │
//! │  network: force-disconnect zombie attachments before kill/remove  │
//! ├───────────────────────────────────────────────────────────────────┤
//! │            ContainerClient (injected daemon capability)           │
//! │   info · image inspect/pull/import · container create/start/      │
//! │   inspect/attach/logs/kill/remove · network list/disconnect       │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! One [`Executor`] serves one job. `prepare` validates configuration and
//! creates dependencies in strict order (devices, project volume,
//! services, user volumes); `run` executes one pipeline stage per sandbox
//! container; `cleanup` concurrently removes every daemon-side resource
//! ever registered, and is safe to call no matter how far the job got.
//!
//! Cache containers are the one deliberate exception to per-run scope:
//! their names are a pure function of the project and path, so later runs
//! of the same project find and reuse them.
//!
//! # Capabilities
//!
//! The executor consumes three injected capabilities and owns none of
//! their implementations:
//!
//! - [`ContainerClient`](client::ContainerClient) — the daemon transport.
//! - [`Shell`](shell::Shell) — the script generator.
//! - [`TraceSink`](trace::TraceSink) — the user-visible output channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use buildrun::{BuildStage, Executor};
//! use tokio_util::sync::CancellationToken;
//!
//! let mut executor = Executor::new(client, shell, trace, config, job);
//! let cancel = CancellationToken::new();
//!
//! let result = async {
//!     executor.prepare(&cancel).await?;
//!     executor.run(BuildStage::Prepare, &cancel).await?;
//!     executor.run(BuildStage::GetSources, &cancel).await?;
//!     executor.run(BuildStage::Build, &cancel).await?;
//!     executor.run(BuildStage::AfterScript, &cancel).await
//! }
//! .await;
//!
//! // Always, regardless of the outcome:
//! executor.cleanup().await;
//! ```

// =============================================================================
// Internal Modules
// =============================================================================

mod image;
mod network;
mod sandbox;
mod volumes;

// =============================================================================
// Public Modules
// =============================================================================

/// Registry credential resolution (per-build map, home dir, job
/// credentials).
pub mod auth;

/// Daemon capability trait and wire types.
pub mod client;

/// Runner configuration: the host policy a job runs under.
pub mod config;

/// Timeouts, retry counts, naming conventions.
pub mod constants;

/// Error enum and failure classification.
pub mod error;

/// Lifecycle coordination: `Executor` with prepare/run/cleanup.
pub mod executor;

/// Build-job input model.
pub mod job;

/// Image reference parsing and alias derivation.
pub mod reference;

/// Service container management.
pub mod services;

/// Shell capability and build stages.
pub mod shell;

/// Attach/log stream demultiplexing.
pub mod streams;

/// Build trace capability.
pub mod trace;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::ContainerClient;
pub use config::{DockerSettings, PullPolicy, RunnerConfig};
pub use error::{Error, FailureKind, Result};
pub use executor::Executor;
pub use job::{BuildJob, GitStrategy, JobCredential, JobOptions, JobVariable, VariableSet};
pub use shell::{BuildStage, Shell, ShellConfiguration};
pub use trace::{NullTrace, TraceSink};
