//! Execution-side collaborators.

use crate::seed::Seed;

/// What the harness wants the engine to do after one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep mutating the current seed.
    Continue,
    /// Walk away from the current seed. The harness raises this for
    /// repeated timeouts and for queue back-pressure; the reasons stay on
    /// its side of the boundary.
    Abandon,
}

/// Drives one instrumented execution per mutant and owns all coverage
/// state. Enqueueing interesting mutants and crash accounting happen behind
/// [`Harness::run`]; the engine only ever sees the verdict.
pub trait Harness {
    /// Submits one mutant for execution. `Err` means the target could not
    /// be executed at all and aborts the campaign.
    fn run(&mut self, buf: &[u8]) -> anyhow::Result<Verdict>;

    /// Stable 32-bit fingerprint of the coverage trace left by the most
    /// recent [`Harness::run`].
    fn coverage_hash(&self) -> u32;

    /// Cooperative cancellation; polled between stages and between havoc
    /// rounds.
    fn stop_requested(&self) -> bool;

    /// Called once per admitted seed, before any mutant runs. Lets the
    /// harness reset per-seed state such as its consecutive-timeout count.
    fn seed_started(&mut self) {}

    /// Hook for the structure-aware mutation layer. An implementation that
    /// recognizes structural metadata for `seed` runs its own stages over
    /// `input` and returns their verdict; `None` hands the seed to the
    /// byte-level pipeline.
    fn run_structural(&mut self, seed: &Seed, input: &[u8]) -> anyhow::Result<Option<Verdict>> {
        let _ = (seed, input);
        Ok(None)
    }
}
