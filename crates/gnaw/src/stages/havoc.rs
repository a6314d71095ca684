//! Stacked random havoc.
//!
//! Each round draws a power-of-two number of primitive mutations, applies
//! them in place, submits the result, and puts the buffer back. A round
//! that grows the queue doubles the remaining budget (and the score it was
//! derived from) until the score cap is hit, so seeds that keep producing
//! get to keep running.

use libafl_bolts::rands::Rand;

use crate::{
    bits::{flip_bit, read_u16_le, read_u32_le, write_u16_le, write_u32_le},
    consts::{
        ARITH_MAX, HAVOC_BLK_LARGE, HAVOC_BLK_MEDIUM, HAVOC_BLK_SMALL, HAVOC_BLK_XL,
        HAVOC_CYCLES, HAVOC_CYCLES_INIT, HAVOC_MAX_MULT, HAVOC_MIN, HAVOC_STACK_POW2,
        INTERESTING_8, INTERESTING_16, INTERESTING_32, SPLICE_HAVOC,
    },
    dict::DictToken,
    engine::FuzzContext,
    error::EngineError,
    harness::Harness,
    queue::QueueView,
    seed::Seed,
    stages::{Flow, PassState, StageId, StageValue},
};

pub(crate) struct HavocEnv<'a> {
    pub user: &'a [DictToken],
    pub auto: &'a [DictToken],
    pub max_file: usize,
    pub queue_cycle: u64,
}

pub(crate) fn havoc_stage<H, Q, R>(
    ctx: &mut FuzzContext<'_, H, Q, R>,
    pass: &mut PassState,
    _seed: &Seed,
    doing_det: bool,
    splice_cycle: u32,
    perf_score: &mut u32,
) -> Result<Flow, EngineError>
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    let stage = if splice_cycle == 0 {
        StageId::Havoc
    } else {
        StageId::Splice
    };
    let baseline = if splice_cycle > 0 {
        SPLICE_HAVOC
    } else if doing_det {
        HAVOC_CYCLES_INIT
    } else {
        HAVOC_CYCLES
    };
    let mut stage_max = (baseline * u64::from(*perf_score) / u64::from(ctx.config.havoc_div) / 100)
        .max(HAVOC_MIN);
    ctx.stats.begin_stage(stage, stage_max);

    let user = ctx.queue.user_extras().tokens().to_vec();
    let auto = ctx.queue.auto_extras().tokens().to_vec();
    let env = HavocEnv {
        user: &user,
        auto: &auto,
        max_file: ctx.config.max_file,
        queue_cycle: ctx.queue.queue_cycle(),
    };

    let orig_hits = ctx.hit_count();
    let mut havoc_queued = ctx.queue.queued_paths();

    let mut cur = 0;
    while cur < stage_max {
        if ctx.harness.stop_requested() {
            return Ok(Flow::Stop);
        }

        let stacking = 1u32 << (1 + ctx.rng.below_or_zero(HAVOC_STACK_POW2));
        ctx.stats.progress.cur = cur;
        ctx.stats.progress.cur_val = StageValue::Stacking(stacking);

        for _ in 0..stacking {
            apply_op(ctx.rng, &mut pass.out, &env);
        }

        match ctx.submit(&pass.out)? {
            Flow::Continue => {}
            other => return Ok(other),
        }

        pass.restore();

        let queued_now = ctx.queue.queued_paths();
        if queued_now != havoc_queued {
            if *perf_score <= HAVOC_MAX_MULT * 100 {
                stage_max *= 2;
                *perf_score *= 2;
            }
            havoc_queued = queued_now;
        }
        cur += 1;
    }

    ctx.stats
        .finish_stage(stage, ctx.hit_count() - orig_hits, stage_max);
    Ok(Flow::Continue)
}

/// Block length for the chunk operations: mostly small, occasionally
/// medium, rarely large. The wider buckets unlock after the first full
/// queue cycle.
pub(crate) fn choose_block_len<R: Rand>(rng: &mut R, limit: usize, queue_cycle: u64) -> usize {
    let rlim = queue_cycle.clamp(1, 3) as usize;
    let (mut min_len, max_len) = match rng.below_or_zero(rlim) {
        0 => (1, HAVOC_BLK_SMALL),
        1 => (HAVOC_BLK_SMALL, HAVOC_BLK_MEDIUM),
        _ => {
            if rng.below_or_zero(10) != 0 {
                (HAVOC_BLK_MEDIUM, HAVOC_BLK_LARGE)
            } else {
                (HAVOC_BLK_LARGE, HAVOC_BLK_XL)
            }
        }
    };
    if min_len >= limit {
        min_len = 1;
    }
    min_len + rng.below_or_zero(max_len.min(limit) - min_len + 1)
}

fn pick_token<'t, R: Rand>(rng: &mut R, env: &HavocEnv<'t>) -> &'t DictToken {
    if env.user.is_empty() || (!env.auto.is_empty() && rng.coinflip(0.5)) {
        &env.auto[rng.below_or_zero(env.auto.len())]
    } else {
        &env.user[rng.below_or_zero(env.user.len())]
    }
}

fn random_fill_byte<R: Rand>(rng: &mut R, buf: &[u8]) -> u8 {
    if rng.coinflip(0.5) {
        rng.below_or_zero(256) as u8
    } else {
        buf[rng.below_or_zero(buf.len())]
    }
}

/// One primitive havoc mutation, drawn uniformly. Operations that do not
/// fit the current buffer fall through as no-ops.
fn apply_op<R: Rand>(rng: &mut R, buf: &mut Vec<u8>, env: &HavocEnv<'_>) {
    let dict_ops = if env.user.is_empty() && env.auto.is_empty() {
        0
    } else {
        2
    };
    let len = buf.len();

    match rng.below_or_zero(15 + dict_ops) {
        0 => {
            let bit = rng.below_or_zero(len << 3);
            flip_bit(buf, bit);
        }
        1 => {
            let at = rng.below_or_zero(len);
            buf[at] = INTERESTING_8[rng.below_or_zero(INTERESTING_8.len())] as u8;
        }
        2 => {
            if len < 2 {
                return;
            }
            let at = rng.below_or_zero(len - 1);
            let val = INTERESTING_16[rng.below_or_zero(INTERESTING_16.len())] as u16;
            let val = if rng.coinflip(0.5) { val } else { val.swap_bytes() };
            write_u16_le(buf, at, val);
        }
        3 => {
            if len < 4 {
                return;
            }
            let at = rng.below_or_zero(len - 3);
            let val = INTERESTING_32[rng.below_or_zero(INTERESTING_32.len())] as u32;
            let val = if rng.coinflip(0.5) { val } else { val.swap_bytes() };
            write_u32_le(buf, at, val);
        }
        4 => {
            let at = rng.below_or_zero(len);
            let delta = 1 + rng.below_or_zero(ARITH_MAX as usize) as u8;
            buf[at] = buf[at].wrapping_sub(delta);
        }
        5 => {
            let at = rng.below_or_zero(len);
            let delta = 1 + rng.below_or_zero(ARITH_MAX as usize) as u8;
            buf[at] = buf[at].wrapping_add(delta);
        }
        6 => {
            if len < 2 {
                return;
            }
            let at = rng.below_or_zero(len - 1);
            let delta = 1 + rng.below_or_zero(ARITH_MAX as usize) as u16;
            let orig = read_u16_le(buf, at);
            let val = if rng.coinflip(0.5) {
                orig.wrapping_sub(delta)
            } else {
                orig.swap_bytes().wrapping_sub(delta).swap_bytes()
            };
            write_u16_le(buf, at, val);
        }
        7 => {
            if len < 2 {
                return;
            }
            let at = rng.below_or_zero(len - 1);
            let delta = 1 + rng.below_or_zero(ARITH_MAX as usize) as u16;
            let orig = read_u16_le(buf, at);
            let val = if rng.coinflip(0.5) {
                orig.wrapping_add(delta)
            } else {
                orig.swap_bytes().wrapping_add(delta).swap_bytes()
            };
            write_u16_le(buf, at, val);
        }
        8 => {
            if len < 4 {
                return;
            }
            let at = rng.below_or_zero(len - 3);
            let delta = 1 + rng.below_or_zero(ARITH_MAX as usize) as u32;
            let orig = read_u32_le(buf, at);
            let val = if rng.coinflip(0.5) {
                orig.wrapping_sub(delta)
            } else {
                orig.swap_bytes().wrapping_sub(delta).swap_bytes()
            };
            write_u32_le(buf, at, val);
        }
        9 => {
            if len < 4 {
                return;
            }
            let at = rng.below_or_zero(len - 3);
            let delta = 1 + rng.below_or_zero(ARITH_MAX as usize) as u32;
            let orig = read_u32_le(buf, at);
            let val = if rng.coinflip(0.5) {
                orig.wrapping_add(delta)
            } else {
                orig.swap_bytes().wrapping_add(delta).swap_bytes()
            };
            write_u32_le(buf, at, val);
        }
        10 => {
            // XOR with 1..=255 cannot be a no-op.
            let at = rng.below_or_zero(len);
            buf[at] ^= 1 + rng.below_or_zero(255) as u8;
        }
        11 | 12 => {
            // Two slots for deletion against one for insertion keeps the
            // corpus from bloating.
            if len < 2 {
                return;
            }
            let del_len = choose_block_len(rng, len - 1, env.queue_cycle);
            let del_from = rng.below_or_zero(len - del_len + 1);
            buf.drain(del_from..del_from + del_len);
        }
        13 => {
            if len + HAVOC_BLK_XL >= env.max_file {
                return;
            }
            let clone_bytes = rng.below_or_zero(4) != 0;
            let (clone_len, clone_from) = if clone_bytes {
                let clone_len = choose_block_len(rng, len, env.queue_cycle);
                (clone_len, rng.below_or_zero(len - clone_len + 1))
            } else {
                (choose_block_len(rng, HAVOC_BLK_XL, env.queue_cycle), 0)
            };
            let clone_to = rng.below_or_zero(len);

            let mut grown = Vec::with_capacity(len + clone_len);
            grown.extend_from_slice(&buf[..clone_to]);
            if clone_bytes {
                grown.extend_from_slice(&buf[clone_from..clone_from + clone_len]);
            } else {
                let fill = random_fill_byte(rng, buf);
                grown.resize(clone_to + clone_len, fill);
            }
            grown.extend_from_slice(&buf[clone_to..]);
            *buf = grown;
        }
        14 => {
            if len < 2 {
                return;
            }
            let copy_len = choose_block_len(rng, len - 1, env.queue_cycle);
            let copy_from = rng.below_or_zero(len - copy_len + 1);
            let copy_to = rng.below_or_zero(len - copy_len + 1);
            if rng.below_or_zero(4) != 0 {
                if copy_from != copy_to {
                    buf.copy_within(copy_from..copy_from + copy_len, copy_to);
                }
            } else {
                let fill = random_fill_byte(rng, buf);
                buf[copy_to..copy_to + copy_len].fill(fill);
            }
        }
        15 => {
            let token = pick_token(rng, env);
            if token.len() > len {
                return;
            }
            let at = rng.below_or_zero(len - token.len() + 1);
            buf[at..at + token.len()].copy_from_slice(token.as_slice());
        }
        16 => {
            let at = rng.below_or_zero(len + 1);
            let token = pick_token(rng, env);
            if len + token.len() >= env.max_file {
                return;
            }
            buf.splice(at..at, token.as_slice().iter().copied());
        }
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use libafl_bolts::rands::StdRand;

    use super::*;
    use crate::consts::MAX_FILE;

    #[test]
    fn block_len_respects_limit() {
        let mut rng = StdRand::with_seed(7);
        for cycle in [1, 2, 5] {
            for limit in [1, 2, 7, 31, 900, 40_000] {
                for _ in 0..500 {
                    let len = choose_block_len(&mut rng, limit, cycle);
                    assert!(len >= 1);
                    assert!(len <= limit.max(1));
                }
            }
        }
    }

    #[test]
    fn first_cycle_sticks_to_small_blocks() {
        let mut rng = StdRand::with_seed(11);
        for _ in 0..500 {
            assert!(choose_block_len(&mut rng, 40_000, 1) <= HAVOC_BLK_SMALL);
        }
    }

    #[test]
    fn ops_keep_length_within_bounds() {
        let mut rng = StdRand::with_seed(0xfeed);
        let user: Vec<DictToken> = [b"GET ".as_slice(), b"Content-Length:".as_slice()]
            .iter()
            .map(|t| DictToken::new(*t))
            .collect();
        let auto: Vec<DictToken> = vec![DictToken::new(b"PNG\x89".as_slice())];
        let env = HavocEnv {
            user: &user,
            auto: &auto,
            max_file: 1 << 16,
            queue_cycle: 3,
        };

        let mut buf: Vec<u8> = (0..256).map(|i| i as u8).collect();
        for _ in 0..5_000 {
            apply_op(&mut rng, &mut buf, &env);
            assert!(!buf.is_empty());
            assert!(buf.len() < env.max_file + HAVOC_BLK_XL);
            assert!(buf.len() <= MAX_FILE);
        }
    }

    #[test]
    fn ops_on_single_byte_never_panic() {
        let mut rng = StdRand::with_seed(42);
        let env = HavocEnv {
            user: &[],
            auto: &[],
            max_file: MAX_FILE,
            queue_cycle: 1,
        };
        let mut buf = vec![0xa5u8];
        for _ in 0..2_000 {
            apply_op(&mut rng, &mut buf, &env);
            assert!(!buf.is_empty());
        }
    }
}
