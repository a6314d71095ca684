//! Walking bit and byte flips. FLIP1 doubles as the auto-dictionary
//! listener, FLIP8 as the effector map builder; neither costs an extra
//! execution.

use libafl_bolts::rands::Rand;
use tracing::debug;

use crate::{
    autodict::AutoCollect,
    bits::{flip_bit, read_u16_le, read_u32_le, write_u16_le, write_u32_le},
    consts::EFF_MIN_LEN,
    engine::FuzzContext,
    error::EngineError,
    harness::Harness,
    queue::QueueView,
    seed::Seed,
    stages::{Flow, PassState, StageId},
};

pub(crate) fn flip1<H, Q, R>(
    ctx: &mut FuzzContext<'_, H, Q, R>,
    pass: &mut PassState,
    seed: &Seed,
) -> Result<Flow, EngineError>
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    let bits = pass.len() << 3;
    ctx.stats.begin_stage(StageId::Flip1, bits as u64);
    let orig_hits = ctx.hit_count();

    let mut auto = (!ctx.config.dumb_mode).then(|| AutoCollect::new(seed.exec_cksum));

    for cur in 0..bits {
        ctx.stats.progress.cur = cur as u64;
        ctx.stats.progress.cur_byte = Some(cur >> 3);

        flip_bit(&mut pass.out, cur);
        match ctx.submit(&pass.out)? {
            Flow::Continue => {}
            other => return Ok(other),
        }
        flip_bit(&mut pass.out, cur);

        // Token induction piggybacks on the least significant bit of each
        // byte: the gentlest flip keeps path divergence attributable to
        // the byte itself rather than to collateral damage.
        if let Some(auto) = auto.as_mut()
            && (cur & 7) == 7
        {
            let cksum = ctx.harness.coverage_hash();
            let at_eof = cur == bits - 1;
            let byte = pass.out[cur >> 3];
            auto.observe(byte, cksum, at_eof, &mut |token| {
                ctx.queue.add_auto_token(token);
            });
        }
    }

    ctx.stats
        .finish_stage(StageId::Flip1, ctx.hit_count() - orig_hits, bits as u64);
    Ok(Flow::Continue)
}

pub(crate) fn flip2<H, Q, R>(
    ctx: &mut FuzzContext<'_, H, Q, R>,
    pass: &mut PassState,
    _seed: &Seed,
) -> Result<Flow, EngineError>
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    let stage_max = ((pass.len() << 3) - 1) as u64;
    ctx.stats.begin_stage(StageId::Flip2, stage_max);
    let orig_hits = ctx.hit_count();

    for cur in 0..stage_max as usize {
        ctx.stats.progress.cur = cur as u64;
        ctx.stats.progress.cur_byte = Some(cur >> 3);

        flip_bit(&mut pass.out, cur);
        flip_bit(&mut pass.out, cur + 1);
        match ctx.submit(&pass.out)? {
            Flow::Continue => {}
            other => return Ok(other),
        }
        flip_bit(&mut pass.out, cur);
        flip_bit(&mut pass.out, cur + 1);
    }

    ctx.stats
        .finish_stage(StageId::Flip2, ctx.hit_count() - orig_hits, stage_max);
    Ok(Flow::Continue)
}

pub(crate) fn flip4<H, Q, R>(
    ctx: &mut FuzzContext<'_, H, Q, R>,
    pass: &mut PassState,
    _seed: &Seed,
) -> Result<Flow, EngineError>
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    let stage_max = ((pass.len() << 3) - 3) as u64;
    ctx.stats.begin_stage(StageId::Flip4, stage_max);
    let orig_hits = ctx.hit_count();

    for cur in 0..stage_max as usize {
        ctx.stats.progress.cur = cur as u64;
        ctx.stats.progress.cur_byte = Some(cur >> 3);

        for bit in cur..cur + 4 {
            flip_bit(&mut pass.out, bit);
        }
        match ctx.submit(&pass.out)? {
            Flow::Continue => {}
            other => return Ok(other),
        }
        for bit in cur..cur + 4 {
            flip_bit(&mut pass.out, bit);
        }
    }

    ctx.stats
        .finish_stage(StageId::Flip4, ctx.hit_count() - orig_hits, stage_max);
    Ok(Flow::Continue)
}

/// Full byte flips. On the side, any byte whose flip leaves the coverage
/// fingerprint untouched gets its effector slot left cold, sparing it from
/// the expensive stages that follow.
pub(crate) fn flip8<H, Q, R>(
    ctx: &mut FuzzContext<'_, H, Q, R>,
    pass: &mut PassState,
    seed: &Seed,
) -> Result<Flow, EngineError>
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    let len = pass.len();
    ctx.stats.begin_stage(StageId::Flip8, len as u64);
    let orig_hits = ctx.hit_count();

    for cur in 0..len {
        ctx.stats.progress.cur = cur as u64;
        ctx.stats.progress.cur_byte = Some(cur);

        pass.out[cur] ^= 0xff;
        match ctx.submit(&pass.out)? {
            Flow::Continue => {}
            other => return Ok(other),
        }

        if !pass.eff.is_marked(cur) {
            // Very short inputs get no pruning: checksum time would exceed
            // the savings, and the same goes for runs without feedback.
            let effective = if ctx.config.dumb_mode || len < EFF_MIN_LEN {
                true
            } else {
                ctx.harness.coverage_hash() != seed.exec_cksum
            };
            if effective {
                pass.eff.mark(cur);
            }
        }

        pass.out[cur] ^= 0xff;
    }

    if pass.eff.saturate_if_dense() {
        debug!(slots = pass.eff.slots(), "effector map saturated");
    }
    ctx.stats.blocks_eff_select += pass.eff.marked() as u64;
    ctx.stats.blocks_eff_total += pass.eff.slots() as u64;

    ctx.stats
        .finish_stage(StageId::Flip8, ctx.hit_count() - orig_hits, len as u64);
    Ok(Flow::Continue)
}

pub(crate) fn flip16<H, Q, R>(
    ctx: &mut FuzzContext<'_, H, Q, R>,
    pass: &mut PassState,
    _seed: &Seed,
) -> Result<Flow, EngineError>
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    let len = pass.len();
    if len < 2 {
        return Ok(Flow::Continue);
    }
    let mut stage_max = (len - 1) as u64;
    ctx.stats.begin_stage(StageId::Flip16, stage_max);
    let orig_hits = ctx.hit_count();

    for cur in 0..len - 1 {
        if !pass.eff.consult(cur, 2) {
            stage_max -= 1;
            continue;
        }
        ctx.stats.progress.cur_byte = Some(cur);

        let orig = read_u16_le(&pass.out, cur);
        write_u16_le(&mut pass.out, cur, orig ^ 0xffff);
        match ctx.submit(&pass.out)? {
            Flow::Continue => {}
            other => return Ok(other),
        }
        write_u16_le(&mut pass.out, cur, orig);
    }

    ctx.stats
        .finish_stage(StageId::Flip16, ctx.hit_count() - orig_hits, stage_max);
    Ok(Flow::Continue)
}

pub(crate) fn flip32<H, Q, R>(
    ctx: &mut FuzzContext<'_, H, Q, R>,
    pass: &mut PassState,
    _seed: &Seed,
) -> Result<Flow, EngineError>
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    let len = pass.len();
    if len < 4 {
        return Ok(Flow::Continue);
    }
    let mut stage_max = (len - 3) as u64;
    ctx.stats.begin_stage(StageId::Flip32, stage_max);
    let orig_hits = ctx.hit_count();

    for cur in 0..len - 3 {
        if !pass.eff.consult(cur, 4) {
            stage_max -= 1;
            continue;
        }
        ctx.stats.progress.cur_byte = Some(cur);

        let orig = read_u32_le(&pass.out, cur);
        write_u32_le(&mut pass.out, cur, orig ^ 0xffff_ffff);
        match ctx.submit(&pass.out)? {
            Flow::Continue => {}
            other => return Ok(other),
        }
        write_u32_le(&mut pass.out, cur, orig);
    }

    ctx.stats
        .finish_stage(StageId::Flip32, ctx.hit_count() - orig_hits, stage_max);
    Ok(Flow::Continue)
}
