//! Stage progress callbacks.
//!
//! The engine reports where it is through [`Progress`] so that the CLI can
//! drive spinners without the library depending on a terminal.

/// Receives stage transitions from the engine.
pub trait Progress: Send + Sync {
    /// A stage started
    fn on_stage_start(&self, message: &str);

    /// The current stage finished
    fn on_stage_complete(&self, message: &str);

    /// Extra detail about the current stage
    fn on_note(&self, _message: &str) {}
}

/// Progress callback that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn on_stage_start(&self, _message: &str) {}
    fn on_stage_complete(&self, _message: &str) {}
}
