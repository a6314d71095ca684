//! Cross-seed splicing: last resort once a whole cycle went dry. The hybrid
//! keeps the current seed up to a point where the two parents already
//! disagree and takes the partner from there, then havoc works the result.

use libafl_bolts::rands::Rand;
use tracing::trace;

use crate::{
    bits::locate_diffs,
    engine::FuzzContext,
    error::EngineError,
    harness::Harness,
    queue::QueueView,
};

/// One attempt at building a hybrid. `None` means no suitable partner this
/// time (too short, too similar, or nothing left past the drawn index);
/// the caller decides whether to roll again.
pub(crate) fn splice_attempt<H, Q, R>(
    ctx: &mut FuzzContext<'_, H, Q, R>,
    cur_idx: usize,
    base: &[u8],
) -> Result<Option<Vec<u8>>, EngineError>
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    let queued = ctx.queue.queued_paths();
    debug_assert!(queued > 1);

    let mut tid = ctx.rng.below_or_zero(queued);
    while tid == cur_idx {
        tid = ctx.rng.below_or_zero(queued);
    }
    let Some(target) = (tid..queued)
        .find(|&idx| idx != cur_idx && ctx.queue.seed_len(idx).is_some_and(|l| l >= 2))
    else {
        return Ok(None);
    };

    let target_buf = ctx.queue.load_seed(target).map_err(EngineError::Queue)?;

    // Split somewhere the parents actually differ; a one-byte difference
    // gives havoc nothing to work with.
    let Some((f_diff, l_diff)) = locate_diffs(base, &target_buf) else {
        return Ok(None);
    };
    if l_diff < 2 || f_diff == l_diff {
        return Ok(None);
    }
    let split_at = f_diff + ctx.rng.below_or_zero(l_diff - f_diff);
    trace!(partner = target, split_at, "splicing");

    let mut hybrid = target_buf;
    hybrid[..split_at].copy_from_slice(&base[..split_at]);
    Ok(Some(hybrid))
}

#[cfg(test)]
mod tests {
    use libafl_bolts::rands::StdRand;

    use super::*;
    use crate::{
        config::FuzzConfig,
        engine::FuzzContext,
        stages::StageStats,
        testing::{campaign, ScriptedHarness, ScriptedQueue},
    };

    #[test]
    fn splits_between_first_and_last_difference() {
        let base = b"AAAABBBBCCCC".to_vec();
        let target = b"AAAAXXXXCCCC".to_vec();

        let shared = campaign(2);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 0);
        let mut queue = ScriptedQueue::new(shared);
        queue.corpus = vec![base.clone(), target.clone()];
        let mut rng = StdRand::with_seed(0xdec0de);
        let config = FuzzConfig::default();
        let mut stats = StageStats::default();
        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);

        for _ in 0..32 {
            let hybrid = splice_attempt(&mut ctx, 0, &base)
                .unwrap()
                .expect("partner is suitable");
            assert_eq!(hybrid.len(), target.len());
            let split = (4..7)
                .find(|&s| hybrid[..s] == base[..s] && hybrid[s..] == target[s..])
                .expect("split point lies in the differing window");
            assert!((4..7).contains(&split));
        }
    }

    #[test]
    fn too_similar_partners_are_rejected() {
        let base = b"AAAABBBBCCCC".to_vec();
        // Exactly one differing byte.
        let target = b"AAAABBBBCCCX".to_vec();

        let shared = campaign(2);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 0);
        let mut queue = ScriptedQueue::new(shared);
        queue.corpus = vec![base.clone(), target];
        let mut rng = StdRand::with_seed(3);
        let config = FuzzConfig::default();
        let mut stats = StageStats::default();
        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);

        assert!(splice_attempt(&mut ctx, 0, &base).unwrap().is_none());
    }

    #[test]
    fn short_partners_are_skipped_over() {
        let base = b"AAAABBBBCCCC".to_vec();
        let shared = campaign(3);
        let mut harness = ScriptedHarness::new(shared.clone(), |_| 0);
        let mut queue = ScriptedQueue::new(shared);
        // Seed 1 is too short to splice with; seed 2 works.
        queue.corpus = vec![base.clone(), b"Z".to_vec(), b"AAAAXXXXCCCC".to_vec()];
        let mut rng = StdRand::with_seed(17);
        let config = FuzzConfig::default();
        let mut stats = StageStats::default();
        let mut ctx = FuzzContext::new(&mut harness, &mut queue, &mut rng, &config, &mut stats);

        for _ in 0..16 {
            if let Some(hybrid) = splice_attempt(&mut ctx, 0, &base).unwrap() {
                assert_eq!(&hybrid[8..], b"CCCC");
            }
        }
    }
}
