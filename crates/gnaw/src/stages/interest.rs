//! Interesting-value substitution: boundary constants overwritten at every
//! effective offset. The oracle weeds out anything the flip or arithmetic
//! stages already tried, including narrower table values that alias the
//! current window.

use libafl_bolts::rands::Rand;

use crate::{
    bits::{read_u16_le, read_u32_le, write_u16_le, write_u32_le},
    consts::{INTERESTING_8, INTERESTING_16, INTERESTING_32},
    engine::FuzzContext,
    error::EngineError,
    harness::Harness,
    oracle::{could_be_arith, could_be_bitflip, could_be_interest},
    queue::QueueView,
    seed::Seed,
    stages::{Flow, PassState, StageId, StageValue},
};

pub(crate) fn interest8<H, Q, R>(
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
    let mut stage_max = (len * INTERESTING_8.len()) as u64;
    ctx.stats.begin_stage(StageId::Interest8, stage_max);
    let orig_hits = ctx.hit_count();

    for cur in 0..len {
        if !pass.eff.consult(cur, 1) {
            stage_max -= INTERESTING_8.len() as u64;
            continue;
        }
        ctx.stats.progress.cur_byte = Some(cur);
        let orig = pass.out[cur];

        for &val in &INTERESTING_8 {
            let byte = val as u8;
            if could_be_bitflip(u32::from(orig ^ byte))
                || could_be_arith(u32::from(orig), u32::from(byte), 1)
            {
                stage_max -= 1;
                continue;
            }

            ctx.stats.progress.cur_val = StageValue::Le(i64::from(val));
            pass.out[cur] = byte;
            match ctx.submit(&pass.out)? {
                Flow::Continue => {}
                other => return Ok(other),
            }
            pass.out[cur] = orig;
        }
    }

    ctx.stats
        .finish_stage(StageId::Interest8, ctx.hit_count() - orig_hits, stage_max);
    Ok(Flow::Continue)
}

pub(crate) fn interest16<H, Q, R>(
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
    if ctx.config.no_arith || len < 2 {
        return Ok(Flow::Continue);
    }
    let mut stage_max = 2 * ((len - 1) * INTERESTING_16.len()) as u64;
    ctx.stats.begin_stage(StageId::Interest16, stage_max);
    let orig_hits = ctx.hit_count();

    for cur in 0..len - 1 {
        if !pass.eff.consult(cur, 2) {
            stage_max -= 2 * INTERESTING_16.len() as u64;
            continue;
        }
        ctx.stats.progress.cur_byte = Some(cur);
        let orig = read_u16_le(&pass.out, cur);

        for &val in &INTERESTING_16 {
            let le = val as u16;
            if !could_be_bitflip(u32::from(orig ^ le))
                && !could_be_arith(u32::from(orig), u32::from(le), 2)
                && !could_be_interest(u32::from(orig), u32::from(le), 2, false)
            {
                ctx.stats.progress.cur_val = StageValue::Le(i64::from(val));
                write_u16_le(&mut pass.out, cur, le);
                match ctx.submit(&pass.out)? {
                    Flow::Continue => {}
                    other => return Ok(other),
                }
            } else {
                stage_max -= 1;
            }

            let be = le.swap_bytes();
            if be != le
                && !could_be_bitflip(u32::from(orig ^ be))
                && !could_be_arith(u32::from(orig), u32::from(be), 2)
                && !could_be_interest(u32::from(orig), u32::from(be), 2, true)
            {
                ctx.stats.progress.cur_val = StageValue::Be(i64::from(val));
                write_u16_le(&mut pass.out, cur, be);
                match ctx.submit(&pass.out)? {
                    Flow::Continue => {}
                    other => return Ok(other),
                }
            } else {
                stage_max -= 1;
            }
        }

        write_u16_le(&mut pass.out, cur, orig);
    }

    ctx.stats
        .finish_stage(StageId::Interest16, ctx.hit_count() - orig_hits, stage_max);
    Ok(Flow::Continue)
}

pub(crate) fn interest32<H, Q, R>(
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
    if ctx.config.no_arith || len < 4 {
        return Ok(Flow::Continue);
    }
    let mut stage_max = 2 * ((len - 3) * INTERESTING_32.len()) as u64;
    ctx.stats.begin_stage(StageId::Interest32, stage_max);
    let orig_hits = ctx.hit_count();

    for cur in 0..len - 3 {
        if !pass.eff.consult(cur, 4) {
            stage_max -= 2 * INTERESTING_32.len() as u64;
            continue;
        }
        ctx.stats.progress.cur_byte = Some(cur);
        let orig = read_u32_le(&pass.out, cur);

        for &val in &INTERESTING_32 {
            let le = val as u32;
            if !could_be_bitflip(orig ^ le)
                && !could_be_arith(orig, le, 4)
                && !could_be_interest(orig, le, 4, false)
            {
                ctx.stats.progress.cur_val = StageValue::Le(i64::from(val));
                write_u32_le(&mut pass.out, cur, le);
                match ctx.submit(&pass.out)? {
                    Flow::Continue => {}
                    other => return Ok(other),
                }
            } else {
                stage_max -= 1;
            }

            let be = le.swap_bytes();
            if be != le
                && !could_be_bitflip(orig ^ be)
                && !could_be_arith(orig, be, 4)
                && !could_be_interest(orig, be, 4, true)
            {
                ctx.stats.progress.cur_val = StageValue::Be(i64::from(val));
                write_u32_le(&mut pass.out, cur, be);
                match ctx.submit(&pass.out)? {
                    Flow::Continue => {}
                    other => return Ok(other),
                }
            } else {
                stage_max -= 1;
            }
        }

        write_u32_le(&mut pass.out, cur, orig);
    }

    ctx.stats
        .finish_stage(StageId::Interest32, ctx.hit_count() - orig_hits, stage_max);
    Ok(Flow::Continue)
}
