//! Queue-manager-side collaborators.

use crate::{
    dict::Dictionary,
    seed::{ExecOutcome, Seed},
};

/// The engine's window into the seed queue and campaign bookkeeping.
///
/// Everything here is owned by the external queue manager; the engine reads
/// counters, borrows dictionaries, and reports per-seed lifecycle events.
pub trait QueueView {
    /// Seeds discovered so far. Also the exclusive upper bound for
    /// [`QueueView::load_seed`] indices.
    fn queued_paths(&self) -> usize;

    fn unique_crashes(&self) -> u64;

    /// Favored seeds that still await their first pass.
    fn pending_favored(&self) -> usize;

    /// Completed walks over the whole queue, starting at 1.
    fn queue_cycle(&self) -> u64;

    /// Whether the campaign has gone a full cycle without findings and
    /// wants cross-seed splicing.
    fn use_splicing(&self) -> bool;

    /// Length of seed `idx`, or `None` for an unknown index.
    fn seed_len(&self, idx: usize) -> Option<usize>;

    /// Loads the bytes of seed `idx` for splicing.
    fn load_seed(&self, idx: usize) -> anyhow::Result<Vec<u8>>;

    /// Re-runs calibration for a seed whose earlier calibration failed.
    /// Implementations update `seed.cal_failed` and `seed.exec_cksum`.
    fn calibrate(&mut self, seed: &mut Seed) -> anyhow::Result<ExecOutcome>;

    /// Shrinks `input` while preserving its coverage, updating `seed`'s
    /// recorded length to match.
    fn trim(&mut self, seed: &mut Seed, input: &mut Vec<u8>) -> anyhow::Result<()>;

    /// Scales the havoc budget for this seed; roughly 10..=1000.
    fn performance_score(&self, seed: &Seed) -> u32;

    /// Offers a token induced during the bit-flip walk to the auto
    /// dictionary. The queue manager dedups and bounds the collection.
    fn add_auto_token(&mut self, token: &[u8]);

    /// Persists the fact that a seed finished its deterministic stages.
    fn mark_det_done(&mut self, seed: &Seed);

    /// User-supplied tokens, ordered by ascending length.
    fn user_extras(&self) -> &Dictionary;

    /// Auto-collected tokens, ordered by ascending length.
    fn auto_extras(&self) -> &Dictionary;

    /// Called from teardown the first time a seed survives a full pass, so
    /// pending counters can be decremented.
    fn note_fuzzed(&mut self, favored: bool);
}
