use thiserror::Error;

/// Failures that end the campaign. Anything recoverable (a skipped seed, a
/// crashing mutant, a mutation that does not fit) never surfaces here; those
/// travel through [`crate::stages::Flow`] or plain counters.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The seed's backing file could not be opened or mapped.
    #[error("unable to map seed input")]
    SeedIo(#[source] std::io::Error),

    /// The harness could not execute the target at all.
    #[error("target execution failed")]
    Harness(#[source] anyhow::Error),

    /// Calibration, trimming or corpus access died in the queue manager.
    #[error("queue manager operation failed")]
    Queue(#[source] anyhow::Error),
}
