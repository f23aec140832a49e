//! Progress reporting for enrichment runs.

/// Progress callbacks for a run. The CLI renders these with a spinner.
pub trait EnrichmentProgress: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Task-level progress within the current phase.
    fn task_progress(&self, current: usize, total: usize, detail: &str);
}

/// No-op enrichment progress.
pub struct SilentEnrichmentProgress;

impl EnrichmentProgress for SilentEnrichmentProgress {
    fn phase(&self, _name: &str) {}
    fn task_progress(&self, _current: usize, _total: usize, _detail: &str) {}
}
