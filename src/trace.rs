//! Build trace capability.
//!
//! The trace is the user-visible output channel of a job: everything the
//! sandbox writes on stdout/stderr, plus executor status lines and warnings.
//! Transport (ANSI coloring, chunked upload, masking) is the embedder's
//! concern; the executor only needs a sink.

/// Sink for user-visible build output.
///
/// Implementations must tolerate concurrent calls; the sandbox stream
/// pumps and the service wait tasks write from separate tasks.
pub trait TraceSink: Send + Sync {
    /// Writes raw sandbox output (already demultiplexed).
    fn write_output(&self, bytes: &[u8]);

    /// Writes an executor status line.
    fn println(&self, line: &str);

    /// Writes a non-fatal warning. Warnings never fail the build.
    fn warning(&self, line: &str);
}

/// Trace sink that discards everything. Useful as a default and in tests
/// that only assert on daemon state.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTrace;

impl TraceSink for NullTrace {
    fn write_output(&self, _bytes: &[u8]) {}
    fn println(&self, _line: &str) {}
    fn warning(&self, _line: &str) {}
}
