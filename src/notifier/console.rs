// =============================================================================
// Console sink — the always-available local terminal for run output
// =============================================================================

use std::io::Write;

use super::LocalSink;

/// Writes each line to stdout. Diagnostics from `tracing` go to stderr, so
/// stdout carries only the run report.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl LocalSink for ConsoleSink {
    fn emit(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        // A closed stdout must not abort the run.
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}
