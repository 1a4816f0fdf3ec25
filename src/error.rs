//! Error types for the build executor.

use std::path::PathBuf;

/// Result type alias for executor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure classification consumed by the outer retry layer.
///
/// - `BuildFailure`: user-caused, not retryable at this layer. Surfaces to
///   the build trace and marks the job failed.
/// - `SystemFailure`: infrastructure trouble, eligible for retry.
/// - `Configuration`: rejected before any work started; fix the runner
///   config or the job definition.
/// - `Cancelled`: the job was aborted from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    BuildFailure,
    SystemFailure,
    Configuration,
    Cancelled,
}

/// Errors that can occur while preparing, running, or cleaning up a job.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Build Failures (user-caused)
    // =========================================================================
    /// The build script exited with a non-zero code.
    #[error("exit code {code}")]
    ScriptExit { code: i64 },

    /// The registry does not know the requested image.
    #[error("image not found: {reference}")]
    ImageNotFound { reference: String },

    /// The declared image is not on the runner's allow-list.
    #[error("invalid image")]
    ImageNotAllowed { image: String },

    /// A reference did not match the image reference grammar.
    #[error("invalid reference format: {reference}")]
    InvalidReference { reference: String },

    /// A service description parsed to an empty service name.
    #[error("invalid service name")]
    InvalidServiceName,

    // =========================================================================
    // Configuration Errors (rejected at prepare)
    // =========================================================================
    /// The runner configuration has no docker section.
    #[error("missing docker configuration")]
    MissingDockerSettings,

    /// The selected shell writes its script to a file, which is incompatible
    /// with stdin injection.
    #[error("shell {shell} requires a script file and cannot be used here")]
    ScriptFileShell { shell: String },

    /// The parent of the project directory must be absolute and not `/`.
    #[error("build directory needs to be an absolute and non-root path: {path}")]
    InvalidBuildsDir { path: PathBuf },

    /// Neither the job nor the runner configuration named an image.
    #[error("no image specified to run the build in")]
    NoImageSpecified,

    /// No embedded helper image exists for this architecture.
    #[error("unsupported architecture: {architecture}")]
    UnsupportedArchitecture { architecture: String },

    /// A device mapping string could not be parsed.
    #[error("failed to parse device {device}: {reason}")]
    InvalidDevice { device: String, reason: String },

    /// The per-job options payload did not decode.
    #[error("failed to decode job options: {0}")]
    OptionsDecode(#[source] serde_json::Error),

    // =========================================================================
    // System Failures (daemon-side)
    // =========================================================================
    /// The daemon reported that an entity does not exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// A daemon operation failed.
    #[error("{op} failed: {reason}")]
    Daemon { op: String, reason: String },

    /// Container creation failed; the daemon may still have allocated an
    /// id, which the caller must register for cleanup.
    #[error("failed to create container: {reason}")]
    CreateFailed { id: Option<String>, reason: String },

    /// A service did not become ready within the configured bound.
    #[error("service {service} did timeout")]
    ServiceTimeout { service: String },

    /// I/O error on the attach stream or a local file.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Cancellation
    // =========================================================================
    /// The job was aborted from outside.
    #[error("aborted")]
    Aborted,
}

impl Error {
    /// Classifies this error for the outer retry layer.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::ScriptExit { .. }
            | Error::ImageNotFound { .. }
            | Error::ImageNotAllowed { .. }
            | Error::InvalidReference { .. }
            | Error::InvalidServiceName => FailureKind::BuildFailure,

            Error::MissingDockerSettings
            | Error::ScriptFileShell { .. }
            | Error::InvalidBuildsDir { .. }
            | Error::NoImageSpecified
            | Error::UnsupportedArchitecture { .. }
            | Error::InvalidDevice { .. }
            | Error::OptionsDecode(_) => FailureKind::Configuration,

            Error::NotFound { .. }
            | Error::Daemon { .. }
            | Error::CreateFailed { .. }
            | Error::ServiceTimeout { .. }
            | Error::Io(_) => FailureKind::SystemFailure,

            Error::Aborted => FailureKind::Cancelled,
        }
    }

    /// Returns true if the daemon reported the entity as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
