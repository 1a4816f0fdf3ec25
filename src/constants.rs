//! Constants for the build executor.
//!
//! All timeouts, retry counts, and naming conventions are defined here to
//! ensure consistency and prevent magic numbers throughout the codebase.

use std::time::Duration;

// =============================================================================
// Container Labels
// =============================================================================

/// Prefix applied to every label set on executor-managed containers.
pub const CONTAINER_LABEL_PREFIX: &str = "io.buildrun";

// =============================================================================
// Helper Image
// =============================================================================

/// Repository name for the embedded helper image.
pub const PREBUILT_IMAGE_NAME: &str = "buildrun/prebuilt";

/// Revision component of the helper image tag.
pub const PREBUILT_IMAGE_REVISION: &str = env!("CARGO_PKG_VERSION");

/// Entrypoint inside the helper image that initializes a cache volume.
pub const CACHE_INIT_COMMAND: &str = "gitlab-runner-cache";

/// Entrypoint inside the helper image that probes a service for readiness.
pub const SERVICE_PROBE_COMMAND: &str = "gitlab-runner-service";

// =============================================================================
// Timeouts and Retries
// =============================================================================

/// Default bound on waiting for declared services to become ready.
pub const DEFAULT_WAIT_FOR_SERVICES_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between SIGKILL retries while tearing down a container.
pub const KILL_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Polling cadence while waiting for a container to stop running.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive transient inspect failures tolerated while waiting.
pub const WAIT_RETRY_LIMIT: u32 = 3;

// =============================================================================
// Container Policy
// =============================================================================

/// Restart policy applied to every container the executor creates.
pub const RESTART_POLICY_NEVER: &str = "no";

/// Log driver applied to every container the executor creates.
pub const LOG_DRIVER_JSON_FILE: &str = "json-file";

/// Signal delivered when a container must stop immediately.
pub const KILL_SIGNAL: &str = "SIGKILL";

// =============================================================================
// Naming
// =============================================================================

/// Suffix of the transient containers that probe service readiness.
pub const WAIT_CONTAINER_SUFFIX: &str = "-wait-for-service";

/// Infix of deterministic cache-container names.
pub const CACHE_CONTAINER_INFIX: &str = "-cache-";
