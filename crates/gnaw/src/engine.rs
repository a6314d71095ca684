//! Seed admission, stage sequencing and teardown for one mutation pass.

use derive_new::new as New;
use libafl_bolts::rands::Rand;
use tracing::{debug, info};

use crate::{
    config::FuzzConfig,
    consts::{CAL_CHANCES, SKIP_NFAV_NEW_PROB, SKIP_NFAV_OLD_PROB, SKIP_TO_NEW_PROB, SPLICE_CYCLES},
    error::EngineError,
    harness::{Harness, Verdict},
    queue::QueueView,
    seed::{ExecOutcome, Seed, SeedFlags},
    stages::{self, Flow, PassState, StageStats},
};

/// Whether [`fuzz_one`] actually fuzzed the seed or walked away from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Fuzzed,
    Skipped,
}

/// Everything one mutation pass needs from the outside world. Keeping the
/// collaborators in one handle (instead of ambient state) is what makes the
/// engine runnable against a scripted harness in tests.
#[derive(Debug, New)]
pub struct FuzzContext<'a, H, Q, R> {
    pub harness: &'a mut H,
    pub queue: &'a mut Q,
    pub rng: &'a mut R,
    pub config: &'a FuzzConfig,
    pub stats: &'a mut StageStats,
}

impl<H: Harness, Q: QueueView, R: Rand> FuzzContext<'_, H, Q, R> {
    /// Hands one mutant to the harness and translates its verdict.
    pub(crate) fn submit(&mut self, buf: &[u8]) -> Result<Flow, EngineError> {
        match self.harness.run(buf).map_err(EngineError::Harness)? {
            Verdict::Continue => Ok(Flow::Continue),
            Verdict::Abandon => Ok(Flow::Abandon),
        }
    }

    /// Paths plus crashes; stages diff this around themselves to attribute
    /// finds.
    pub(crate) fn hit_count(&self) -> u64 {
        self.queue.queued_paths() as u64 + self.queue.unique_crashes()
    }
}

type StageFn<H, Q, R> = for<'a, 'b> fn(
    &'a mut FuzzContext<'b, H, Q, R>,
    &'a mut PassState,
    &'a Seed,
) -> Result<Flow, EngineError>;

/// Takes queue entry `seed_idx`, fuzzes it for a while.
pub fn fuzz_one<H, Q, R>(
    ctx: &mut FuzzContext<'_, H, Q, R>,
    seed: &mut Seed,
    seed_idx: usize,
) -> Result<PassOutcome, EngineError>
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    if !admit(ctx, seed) {
        return Ok(PassOutcome::Skipped);
    }
    if seed.is_empty() {
        debug!(entry = seed_idx, "seed is empty, nothing to mutate");
        return Ok(PassOutcome::Skipped);
    }

    info!(
        entry = seed_idx,
        queued = ctx.queue.queued_paths(),
        crashes = ctx.queue.unique_crashes(),
        "fuzzing test case"
    );

    let input = seed.bytes().map_err(EngineError::SeedIo)?.to_vec();
    ctx.harness.seed_started();

    let outcome = run_pass(ctx, seed, seed_idx, input)?;

    // Shared teardown: the buffers drop with `run_pass`, the lifecycle
    // bookkeeping happens here, on every exit path alike.
    if !ctx.harness.stop_requested()
        && seed.cal_failed == 0
        && !seed.flags.contains(SeedFlags::WAS_FUZZED)
    {
        seed.flags.insert(SeedFlags::WAS_FUZZED);
        ctx.queue.note_fuzzed(seed.flags.contains(SeedFlags::FAVORED));
    }

    Ok(outcome)
}

/// The probabilistic seed gate.
fn admit<H, Q, R>(ctx: &mut FuzzContext<'_, H, Q, R>, seed: &Seed) -> bool
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    if ctx.config.ignore_finds {
        // Only the initial corpus is in scope.
        return seed.depth <= 1;
    }

    let was_fuzzed = seed.flags.contains(SeedFlags::WAS_FUZZED);
    let favored = seed.flags.contains(SeedFlags::FAVORED);

    if ctx.queue.pending_favored() > 0 {
        // Favored newcomers are waiting; almost always skip to them past
        // anything already fuzzed or unremarkable.
        if (was_fuzzed || !favored) && ctx.rng.below_or_zero(100) < SKIP_TO_NEW_PROB {
            return false;
        }
    } else if !ctx.config.dumb_mode && !favored && ctx.queue.queued_paths() > 10 {
        // Still lean towards the interesting part of the queue, with better
        // odds for entries that never got a turn.
        let prob = if ctx.queue.queue_cycle() > 1 && !was_fuzzed {
            SKIP_NFAV_NEW_PROB
        } else {
            SKIP_NFAV_OLD_PROB
        };
        if ctx.rng.below_or_zero(100) < prob {
            return false;
        }
    }

    true
}

fn run_pass<H, Q, R>(
    ctx: &mut FuzzContext<'_, H, Q, R>,
    seed: &mut Seed,
    seed_idx: usize,
    mut input: Vec<u8>,
) -> Result<PassOutcome, EngineError>
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    // Entries whose earlier calibration failed get another chance before
    // any mutation work is sunk into them.
    if seed.cal_failed > 0 {
        let mut outcome = ExecOutcome::Timeout;
        if seed.cal_failed < CAL_CHANCES {
            // Invalidate the stale fingerprint so calibration re-executes
            // instead of trusting a trace that may never have been valid.
            seed.exec_cksum = 0;
            outcome = ctx.queue.calibrate(seed).map_err(EngineError::Queue)?;
        }
        if ctx.harness.stop_requested() || outcome != ctx.config.crash_mode {
            ctx.stats.cur_skipped_paths += 1;
            return Ok(PassOutcome::Skipped);
        }
    }

    // A seed with structural metadata belongs to the structure-aware
    // stages; byte-level mutation would only fight the format parsers.
    if let Some(verdict) = ctx
        .harness
        .run_structural(seed, &input)
        .map_err(EngineError::Harness)?
    {
        debug!(entry = seed_idx, ?verdict, "handled by structural stages");
        return Ok(PassOutcome::Skipped);
    }

    if !ctx.config.dumb_mode && !seed.flags.contains(SeedFlags::TRIM_DONE) {
        ctx.queue.trim(seed, &mut input).map_err(EngineError::Queue)?;
        // One attempt only, successful or not.
        seed.flags.insert(SeedFlags::TRIM_DONE);
        // The trim contract does not promise a positive length; a seed cut
        // down to nothing has no mutation domain left.
        if input.is_empty() {
            debug!(entry = seed_idx, "seed trimmed to nothing, skipping");
            ctx.stats.cur_skipped_paths += 1;
            return Ok(PassOutcome::Skipped);
        }
        if ctx.harness.stop_requested() {
            ctx.stats.cur_skipped_paths += 1;
            return Ok(PassOutcome::Skipped);
        }
    }

    let mut pass = PassState::new(input);
    let orig_perf = ctx.queue.performance_score(seed);
    let mut perf_score = orig_perf;

    let skip_det = ctx.config.skip_deterministic
        || seed.flags.contains(SeedFlags::WAS_FUZZED)
        || seed.flags.contains(SeedFlags::PASSED_DET)
        || !ctx.config.owns_deterministic(seed.exec_cksum);
    let doing_det = !skip_det;

    if doing_det {
        match deterministic_stages(ctx, &mut pass, seed)? {
            Flow::Continue => {
                if !seed.flags.contains(SeedFlags::PASSED_DET) {
                    seed.flags.insert(SeedFlags::PASSED_DET);
                    ctx.queue.mark_det_done(seed);
                }
            }
            Flow::Abandon | Flow::Stop => return Ok(PassOutcome::Skipped),
        }
    }

    // Havoc, with splicing feeding hybrids back in while the campaign is
    // starved for findings.
    let mut splice_cycle = 0u32;
    loop {
        match stages::havoc::havoc_stage(ctx, &mut pass, seed, doing_det, splice_cycle, &mut perf_score)?
        {
            Flow::Continue => {}
            Flow::Abandon | Flow::Stop => return Ok(PassOutcome::Skipped),
        }

        loop {
            if !(ctx.queue.use_splicing()
                && splice_cycle < SPLICE_CYCLES
                && ctx.queue.queued_paths() > 1
                && pass.base.len() > 1)
            {
                return Ok(PassOutcome::Fuzzed);
            }
            splice_cycle += 1;

            match stages::splice::splice_attempt(ctx, seed_idx, &pass.base)? {
                Some(hybrid) => {
                    pass.adopt(hybrid);
                    perf_score = orig_perf;
                    break;
                }
                None => continue,
            }
        }
    }
}

/// The deterministic pipeline, in its fixed order. Each stage gates itself
/// on width, flags and dictionaries; the driver only sequences and
/// short-circuits.
pub(crate) fn deterministic_stages<H, Q, R>(
    ctx: &mut FuzzContext<'_, H, Q, R>,
    pass: &mut PassState,
    seed: &Seed,
) -> Result<Flow, EngineError>
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    let pipeline: [StageFn<H, Q, R>; 15] = [
        |ctx, pass, seed| stages::bitflip::flip1::<H, Q, R>(ctx, pass, seed),
        |ctx, pass, seed| stages::bitflip::flip2::<H, Q, R>(ctx, pass, seed),
        |ctx, pass, seed| stages::bitflip::flip4::<H, Q, R>(ctx, pass, seed),
        |ctx, pass, seed| stages::bitflip::flip8::<H, Q, R>(ctx, pass, seed),
        |ctx, pass, seed| stages::bitflip::flip16::<H, Q, R>(ctx, pass, seed),
        |ctx, pass, seed| stages::bitflip::flip32::<H, Q, R>(ctx, pass, seed),
        |ctx, pass, seed| stages::arith::arith8::<H, Q, R>(ctx, pass, seed),
        |ctx, pass, seed| stages::arith::arith16::<H, Q, R>(ctx, pass, seed),
        |ctx, pass, seed| stages::arith::arith32::<H, Q, R>(ctx, pass, seed),
        |ctx, pass, seed| stages::interest::interest8::<H, Q, R>(ctx, pass, seed),
        |ctx, pass, seed| stages::interest::interest16::<H, Q, R>(ctx, pass, seed),
        |ctx, pass, seed| stages::interest::interest32::<H, Q, R>(ctx, pass, seed),
        |ctx, pass, seed| stages::extras::user_overwrite::<H, Q, R>(ctx, pass, seed),
        |ctx, pass, seed| stages::extras::user_insert::<H, Q, R>(ctx, pass, seed),
        |ctx, pass, seed| stages::extras::auto_overwrite::<H, Q, R>(ctx, pass, seed),
    ];

    for stage in pipeline {
        if ctx.harness.stop_requested() {
            return Ok(Flow::Stop);
        }
        match stage(ctx, pass, seed)? {
            Flow::Continue => {}
            other => return Ok(other),
        }
    }
    Ok(Flow::Continue)
}

#[cfg(test)]
mod tests {
    use libafl_bolts::rands::StdRand;

    use super::*;
    use crate::{
        config::MasterSlot,
        consts::MAX_FILE,
        stages::StageId,
        testing::{campaign, digest32, ScriptedHarness, ScriptedQueue},
    };

    const ACCEPT: u32 = 0xacce_97ed;
    const REJECT: u32 = 0x0bad_0bad;

    fn favored_seed(bytes: impl Into<Vec<u8>>) -> Seed {
        let mut seed = Seed::from_bytes(bytes);
        seed.flags.insert(SeedFlags::FAVORED);
        seed
    }

    #[test]
    fn bitflip_walk_recovers_atomic_magic() {
        const MAGIC: &[u8] = b"PNG\x89";
        let mut bytes = MAGIC.to_vec();
        bytes.extend((0..1020).map(|i: u32| (i * 7 + 3) as u8));

        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |buf: &[u8]| {
            if buf.len() >= 4 && &buf[..4] == MAGIC {
                ACCEPT
            } else {
                REJECT
            }
        });
        let mut queue = ScriptedQueue::new(shared);
        let mut rng = StdRand::with_seed(1);
        let config = FuzzConfig::default();
        let mut stats = StageStats::default();
        let mut seed = favored_seed(bytes);
        seed.exec_cksum = ACCEPT;

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        let outcome = fuzz_one(&mut ctx, &mut seed, 0).unwrap();

        assert_eq!(outcome, PassOutcome::Fuzzed);
        assert!(queue.captured_tokens.iter().any(|t| t == MAGIC));
        assert!(seed.flags.contains(SeedFlags::PASSED_DET));
        assert!(seed.flags.contains(SeedFlags::WAS_FUZZED));
        assert_eq!(queue.det_done, 1);
        assert_eq!(queue.fuzzed_notes, 1);
    }

    #[test]
    fn effector_map_prunes_ignored_tail() {
        // The model only looks at the first half of the input.
        let bytes: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        let baseline = digest32(&bytes[..512]);

        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |buf: &[u8]| {
            digest32(&buf[..buf.len().min(512)])
        });
        let mut queue = ScriptedQueue::new(shared);
        let mut rng = StdRand::with_seed(2);
        let config = FuzzConfig {
            no_arith: true,
            ..FuzzConfig::default()
        };
        let mut stats = StageStats::default();
        let mut seed = favored_seed(bytes);
        seed.exec_cksum = baseline;

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        let outcome = fuzz_one(&mut ctx, &mut seed, 0).unwrap();
        assert_eq!(outcome, PassOutcome::Fuzzed);

        // 128 slots; the live first half plus the two forced endpoints.
        assert_eq!(stats.blocks_eff_total, 128);
        assert_eq!(stats.blocks_eff_select, 65);
        // Word flips run at offsets 0..=511 (live slots) and 1015..=1022
        // (the forced last slot); everything in between is pruned and the
        // recorded budget reflects it.
        assert_eq!(stats.cycles(StageId::Flip16), 520);
        assert_eq!(stats.cycles(StageId::Flip32), 520);
    }

    #[test]
    fn havoc_budget_doubles_until_score_cap() {
        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 1);
        harness.enqueue_on_every_exec = true;
        let mut queue = ScriptedQueue::new(shared);
        let mut rng = StdRand::with_seed(4);
        let config = FuzzConfig::default();
        let mut stats = StageStats::default();
        let mut seed = favored_seed(vec![0x41]);
        seed.exec_cksum = 1;

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        let outcome = fuzz_one(&mut ctx, &mut seed, 0).unwrap();
        assert_eq!(outcome, PassOutcome::Fuzzed);

        // First pass budget 1024, doubled on every productive round while
        // the score may still double: 100 -> 200 -> 400 -> 800 -> 1600 ->
        // 3200, then capped. 1024 << 5 rounds in total.
        assert_eq!(stats.cycles(StageId::Havoc), 32_768);
    }

    #[test]
    fn splice_reenters_havoc_when_campaign_is_dry() {
        let base = b"AAAABBBBCCCC".to_vec();
        let shared = campaign(2);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 0);
        let mut queue = ScriptedQueue::new(shared);
        queue.corpus = vec![base.clone(), b"AAAAXXXXCCCC".to_vec()];
        queue.splicing = true;
        let mut rng = StdRand::with_seed(5);
        let config = FuzzConfig {
            skip_deterministic: true,
            ..FuzzConfig::default()
        };
        let mut stats = StageStats::default();
        let mut seed = favored_seed(base);

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        let outcome = fuzz_one(&mut ctx, &mut seed, 0).unwrap();
        assert_eq!(outcome, PassOutcome::Fuzzed);

        // Plain havoc at the revisit budget, then fifteen splice cycles of
        // thirty-two rounds each.
        assert_eq!(stats.cycles(StageId::Havoc), 256);
        assert_eq!(stats.cycles(StageId::Splice), 480);
    }

    #[test]
    fn no_arith_flag_skips_arithmetic_and_wide_interest() {
        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 7);
        let mut queue = ScriptedQueue::new(shared);
        let mut rng = StdRand::with_seed(6);
        let config = FuzzConfig {
            no_arith: true,
            ..FuzzConfig::default()
        };
        let mut stats = StageStats::default();
        let mut seed = favored_seed(vec![0x55; 8]);
        seed.exec_cksum = 7;

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        fuzz_one(&mut ctx, &mut seed, 0).unwrap();

        assert_eq!(stats.cycles(StageId::Flip1), 64);
        assert_eq!(stats.cycles(StageId::Arith8), 0);
        assert_eq!(stats.cycles(StageId::Arith16), 0);
        assert_eq!(stats.cycles(StageId::Arith32), 0);
        assert_eq!(stats.cycles(StageId::Interest16), 0);
        assert_eq!(stats.cycles(StageId::Interest32), 0);
        assert!(stats.cycles(StageId::Interest8) > 0);
    }

    #[test]
    fn deterministic_stages_leave_buffer_restored() {
        let bytes: Vec<u8> = (0..64u32).map(|i| (i * 37 + 11) as u8).collect();

        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |buf: &[u8]| digest32(buf));
        let mut queue = ScriptedQueue::new(shared);
        queue.user_dict.insert(b"HDR");
        queue.user_dict.insert(b"LONGERTOKEN");
        queue.auto_dict.insert(b"magic");
        let mut rng = StdRand::with_seed(8);
        let config = FuzzConfig::default();
        let mut stats = StageStats::default();
        let mut seed = favored_seed(bytes.clone());
        seed.exec_cksum = digest32(&bytes);

        let mut pass = PassState::new(bytes.clone());
        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        let flow = deterministic_stages(&mut ctx, &mut pass, &seed).unwrap();

        assert_eq!(flow, Flow::Continue);
        assert_eq!(pass.out, bytes);
        assert_eq!(pass.input, bytes);
    }

    #[test]
    fn favored_pending_skips_unremarkable_seeds() {
        let shared = campaign(20);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 0);
        let mut queue = ScriptedQueue::new(shared);
        queue.pending_favored = 3;
        let mut rng = StdRand::with_seed(9);
        let config = FuzzConfig {
            skip_deterministic: true,
            ..FuzzConfig::default()
        };
        let mut stats = StageStats::default();
        let mut seed = Seed::from_bytes(vec![1, 2, 3, 4]);

        let mut skipped = 0;
        for _ in 0..100 {
            let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
            if fuzz_one(&mut ctx, &mut seed, 0).unwrap() == PassOutcome::Skipped {
                skipped += 1;
            }
        }
        assert!(skipped >= 90, "only {skipped} of 100 passes were skipped");
    }

    #[test]
    fn ignore_finds_rejects_descendants() {
        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 0);
        let mut queue = ScriptedQueue::new(shared);
        let mut rng = StdRand::with_seed(10);
        let config = FuzzConfig {
            ignore_finds: true,
            skip_deterministic: true,
            ..FuzzConfig::default()
        };
        let mut stats = StageStats::default();

        let mut descendant = Seed::from_bytes(vec![1, 2, 3, 4]);
        descendant.depth = 2;
        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        assert_eq!(
            fuzz_one(&mut ctx, &mut descendant, 0).unwrap(),
            PassOutcome::Skipped
        );
        assert_eq!(harness.execs, 0);

        let mut original = Seed::from_bytes(vec![1, 2, 3, 4]);
        original.depth = 1;
        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        assert_eq!(
            fuzz_one(&mut ctx, &mut original, 0).unwrap(),
            PassOutcome::Fuzzed
        );
        assert!(harness.execs > 0);
    }

    #[test]
    fn failed_recalibration_abandons_seed() {
        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 0);
        let mut queue = ScriptedQueue::new(shared);
        queue.calibration = ExecOutcome::Timeout;
        let mut rng = StdRand::with_seed(11);
        let config = FuzzConfig::default();
        let mut stats = StageStats::default();
        let mut seed = favored_seed(vec![1, 2, 3, 4]);
        seed.cal_failed = 1;

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        assert_eq!(fuzz_one(&mut ctx, &mut seed, 0).unwrap(), PassOutcome::Skipped);
        assert_eq!(stats.cur_skipped_paths, 1);
        assert_eq!(queue.calibrations, 1);
        assert_eq!(seed.cal_failed, 2);
        assert!(!seed.flags.contains(SeedFlags::WAS_FUZZED));
    }

    #[test]
    fn exhausted_calibration_is_not_retried() {
        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 0);
        let mut queue = ScriptedQueue::new(shared);
        let mut rng = StdRand::with_seed(12);
        let config = FuzzConfig::default();
        let mut stats = StageStats::default();
        let mut seed = favored_seed(vec![1, 2, 3, 4]);
        seed.cal_failed = CAL_CHANCES;

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        assert_eq!(fuzz_one(&mut ctx, &mut seed, 0).unwrap(), PassOutcome::Skipped);
        assert_eq!(queue.calibrations, 0);
        assert_eq!(harness.execs, 0);
    }

    #[test]
    fn successful_recalibration_lets_the_pass_run() {
        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 0);
        let mut queue = ScriptedQueue::new(shared);
        let mut rng = StdRand::with_seed(13);
        let config = FuzzConfig {
            skip_deterministic: true,
            ..FuzzConfig::default()
        };
        let mut stats = StageStats::default();
        let mut seed = favored_seed(vec![1, 2, 3, 4]);
        seed.cal_failed = 1;

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        assert_eq!(fuzz_one(&mut ctx, &mut seed, 0).unwrap(), PassOutcome::Fuzzed);
        assert_eq!(seed.cal_failed, 0);
        assert!(seed.flags.contains(SeedFlags::WAS_FUZZED));
    }

    #[test]
    fn structural_seeds_bypass_byte_stages() {
        struct StructuralHarness(ScriptedHarness);

        impl Harness for StructuralHarness {
            fn run(&mut self, buf: &[u8]) -> anyhow::Result<Verdict> {
                self.0.run(buf)
            }
            fn coverage_hash(&self) -> u32 {
                self.0.coverage_hash()
            }
            fn stop_requested(&self) -> bool {
                self.0.stop_requested()
            }
            fn run_structural(
                &mut self,
                _seed: &Seed,
                _input: &[u8],
            ) -> anyhow::Result<Option<Verdict>> {
                Ok(Some(Verdict::Continue))
            }
        }

        let shared = campaign(1);
        let mut harness = StructuralHarness(ScriptedHarness::new(shared.clone(), |_| 0));
        let mut queue = ScriptedQueue::new(shared);
        let mut rng = StdRand::with_seed(14);
        let config = FuzzConfig::default();
        let mut stats = StageStats::default();
        let mut seed = favored_seed(vec![1, 2, 3, 4]);

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        assert_eq!(fuzz_one(&mut ctx, &mut seed, 0).unwrap(), PassOutcome::Skipped);
        assert_eq!(harness.0.execs, 0);
        assert_eq!(stats.cycles(StageId::Flip1), 0);
        // The lifecycle bookkeeping still runs for structurally handled
        // seeds.
        assert!(seed.flags.contains(SeedFlags::WAS_FUZZED));
    }

    #[test]
    fn harness_abandon_unwinds_cleanly() {
        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 0);
        harness.abandon_after = Some(10);
        let mut queue = ScriptedQueue::new(shared);
        let mut rng = StdRand::with_seed(15);
        let config = FuzzConfig::default();
        let mut stats = StageStats::default();
        let mut seed = favored_seed(vec![0xaa; 16]);

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        assert_eq!(fuzz_one(&mut ctx, &mut seed, 0).unwrap(), PassOutcome::Skipped);
        assert_eq!(harness.execs, 11);
        assert!(!seed.flags.contains(SeedFlags::PASSED_DET));
    }

    #[test]
    fn stop_request_preserves_pending_state() {
        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 0);
        harness.stop = true;
        let mut queue = ScriptedQueue::new(shared);
        let mut rng = StdRand::with_seed(16);
        let config = FuzzConfig::default();
        let mut stats = StageStats::default();
        let mut seed = favored_seed(vec![1, 2, 3, 4]);

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        assert_eq!(fuzz_one(&mut ctx, &mut seed, 0).unwrap(), PassOutcome::Skipped);
        // A stopped run must not consume the seed's first-pass state.
        assert!(!seed.flags.contains(SeedFlags::WAS_FUZZED));
        assert_eq!(queue.fuzzed_notes, 0);
    }

    #[test]
    fn revisits_skip_deterministic_work() {
        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 0);
        let mut queue = ScriptedQueue::new(shared);
        let mut rng = StdRand::with_seed(17);
        let config = FuzzConfig::default();
        let mut stats = StageStats::default();
        let mut seed = favored_seed(vec![1, 2, 3, 4]);
        seed.flags.insert(SeedFlags::PASSED_DET);

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        assert_eq!(fuzz_one(&mut ctx, &mut seed, 0).unwrap(), PassOutcome::Fuzzed);
        assert_eq!(stats.cycles(StageId::Flip1), 0);
        // Revisit budget, not the post-deterministic one.
        assert_eq!(stats.cycles(StageId::Havoc), 256);
        assert_eq!(queue.det_done, 0);
    }

    #[test]
    fn master_partition_excludes_foreign_seeds() {
        let config = FuzzConfig {
            master: Some(MasterSlot { id: 1, total: 2 }),
            ..FuzzConfig::default()
        };

        for (cksum, det_expected) in [(2u32, true), (1u32, false)] {
            let shared = campaign(1);
            let mut harness = ScriptedHarness::new(shared.clone(), |_| 0);
            let mut queue = ScriptedQueue::new(shared);
            let mut rng = StdRand::with_seed(18);
            let mut stats = StageStats::default();
            let mut seed = favored_seed(vec![1, 2, 3, 4]);
            seed.exec_cksum = cksum;

            let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
            fuzz_one(&mut ctx, &mut seed, 0).unwrap();
            assert_eq!(stats.cycles(StageId::Flip1) > 0, det_expected);
            assert_eq!(seed.flags.contains(SeedFlags::PASSED_DET), det_expected);
        }
    }

    #[test]
    fn trimming_shrinks_the_working_set() {
        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 0);
        let mut queue = ScriptedQueue::new(shared);
        queue.trim_to = Some(4);
        let mut rng = StdRand::with_seed(19);
        let config = FuzzConfig::default();
        let mut stats = StageStats::default();
        let mut seed = favored_seed(vec![9; 8]);

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        fuzz_one(&mut ctx, &mut seed, 0).unwrap();
        assert!(seed.flags.contains(SeedFlags::TRIM_DONE));
        assert_eq!(seed.len(), 4);
        // All deterministic domains derive from the trimmed length.
        assert_eq!(stats.cycles(StageId::Flip1), 32);
    }

    #[test]
    fn trim_to_nothing_abandons_seed() {
        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 0);
        let mut queue = ScriptedQueue::new(shared);
        queue.trim_to = Some(0);
        let mut rng = StdRand::with_seed(23);
        let config = FuzzConfig::default();
        let mut stats = StageStats::default();
        let mut seed = favored_seed(vec![9; 8]);

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        assert_eq!(fuzz_one(&mut ctx, &mut seed, 0).unwrap(), PassOutcome::Skipped);
        assert_eq!(harness.execs, 0);
        assert_eq!(stats.cur_skipped_paths, 1);
        assert_eq!(stats.cycles(StageId::Flip1), 0);
        assert!(seed.flags.contains(SeedFlags::TRIM_DONE));
    }

    #[test]
    fn dumb_mode_skips_feedback_machinery() {
        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| REJECT);
        let mut queue = ScriptedQueue::new(shared);
        let mut rng = StdRand::with_seed(20);
        let config = FuzzConfig {
            dumb_mode: true,
            ..FuzzConfig::default()
        };
        let mut stats = StageStats::default();
        let mut seed = favored_seed(vec![0x11; 8]);

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        fuzz_one(&mut ctx, &mut seed, 0).unwrap();
        // No trimming, no token induction; the walk itself still runs.
        assert!(!seed.flags.contains(SeedFlags::TRIM_DONE));
        assert!(queue.captured_tokens.is_empty());
        assert_eq!(stats.cycles(StageId::Flip1), 64);
    }

    #[test]
    fn empty_seeds_are_skipped_outright() {
        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 0);
        let mut queue = ScriptedQueue::new(shared);
        let mut rng = StdRand::with_seed(21);
        let config = FuzzConfig::default();
        let mut stats = StageStats::default();
        let mut seed = favored_seed(Vec::new());

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        assert_eq!(fuzz_one(&mut ctx, &mut seed, 0).unwrap(), PassOutcome::Skipped);
        assert_eq!(harness.execs, 0);
    }

    #[test]
    fn havoc_mutants_respect_the_size_cap() {
        let shared = campaign(1);
        let mut harness = ScriptedHarness::new(shared.clone(), |buf: &[u8]| {
            assert!(buf.len() <= MAX_FILE);
            0
        });
        let mut queue = ScriptedQueue::new(shared);
        queue.user_dict.insert(b"token");
        let mut rng = StdRand::with_seed(22);
        let config = FuzzConfig {
            skip_deterministic: true,
            ..FuzzConfig::default()
        };
        let mut stats = StageStats::default();
        let mut seed = favored_seed(vec![0x77; 128]);

        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);
        assert_eq!(fuzz_one(&mut ctx, &mut seed, 0).unwrap(), PassOutcome::Fuzzed);
    }
}
