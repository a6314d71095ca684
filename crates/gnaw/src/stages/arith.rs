//! Walking arithmetic: every offset, every delta up to `ARITH_MAX`, both
//! signs; 16- and 32-bit windows in both endiannesses. Candidates already
//! reachable by a bitflip are dropped before they cost an execution, and
//! the wide variants only run when the delta actually carries into the
//! high lanes (otherwise they would replay the 8-bit stage).

use libafl_bolts::rands::Rand;

use crate::{
    bits::{read_u16_le, read_u32_le, write_u16_le, write_u32_le},
    consts::ARITH_MAX,
    engine::FuzzContext,
    error::EngineError,
    harness::Harness,
    oracle::could_be_bitflip,
    queue::QueueView,
    seed::Seed,
    stages::{Flow, PassState, StageId, StageValue},
};

pub(crate) fn arith8<H, Q, R>(
    ctx: &mut FuzzContext<'_, H, Q, R>,
    pass: &mut PassState,
    _seed: &Seed,
) -> Result<Flow, EngineError>
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    if ctx.config.no_arith {
        return Ok(Flow::Continue);
    }
    let len = pass.len();
    let mut stage_max = 2 * len as u64 * u64::from(ARITH_MAX);
    ctx.stats.begin_stage(StageId::Arith8, stage_max);
    let orig_hits = ctx.hit_count();

    for cur in 0..len {
        if !pass.eff.consult(cur, 1) {
            stage_max -= 2 * u64::from(ARITH_MAX);
            continue;
        }
        ctx.stats.progress.cur_byte = Some(cur);
        let orig = pass.out[cur];

        for delta in 1..=ARITH_MAX as u8 {
            let plus = orig.wrapping_add(delta);
            if could_be_bitflip(u32::from(orig ^ plus)) {
                stage_max -= 1;
            } else {
                ctx.stats.progress.cur_val = StageValue::Le(i64::from(delta));
                pass.out[cur] = plus;
                match ctx.submit(&pass.out)? {
                    Flow::Continue => {}
                    other => return Ok(other),
                }
            }

            let minus = orig.wrapping_sub(delta);
            if could_be_bitflip(u32::from(orig ^ minus)) {
                stage_max -= 1;
            } else {
                ctx.stats.progress.cur_val = StageValue::Le(-i64::from(delta));
                pass.out[cur] = minus;
                match ctx.submit(&pass.out)? {
                    Flow::Continue => {}
                    other => return Ok(other),
                }
            }

            pass.out[cur] = orig;
        }
    }

    ctx.stats
        .finish_stage(StageId::Arith8, ctx.hit_count() - orig_hits, stage_max);
    Ok(Flow::Continue)
}

pub(crate) fn arith16<H, Q, R>(
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
    let mut stage_max = 4 * (len - 1) as u64 * u64::from(ARITH_MAX);
    ctx.stats.begin_stage(StageId::Arith16, stage_max);
    let orig_hits = ctx.hit_count();

    for cur in 0..len - 1 {
        if !pass.eff.consult(cur, 2) {
            stage_max -= 4 * u64::from(ARITH_MAX);
            continue;
        }
        ctx.stats.progress.cur_byte = Some(cur);
        let orig = read_u16_le(&pass.out, cur);

        for delta in 1..=ARITH_MAX as u16 {
            // Little endian first; worthwhile only when the delta carries
            // past the low byte.
            let le_plus = orig.wrapping_add(delta);
            if (orig & 0xff) + delta > 0xff && !could_be_bitflip(u32::from(orig ^ le_plus)) {
                ctx.stats.progress.cur_val = StageValue::Le(i64::from(delta));
                write_u16_le(&mut pass.out, cur, le_plus);
                match ctx.submit(&pass.out)? {
                    Flow::Continue => {}
                    other => return Ok(other),
                }
            } else {
                stage_max -= 1;
            }

            let le_minus = orig.wrapping_sub(delta);
            if (orig & 0xff) < delta && !could_be_bitflip(u32::from(orig ^ le_minus)) {
                ctx.stats.progress.cur_val = StageValue::Le(-i64::from(delta));
                write_u16_le(&mut pass.out, cur, le_minus);
                match ctx.submit(&pass.out)? {
                    Flow::Continue => {}
                    other => return Ok(other),
                }
            } else {
                stage_max -= 1;
            }

            // Big endian, same carry rule on the swapped view.
            let be_plus = orig.swap_bytes().wrapping_add(delta).swap_bytes();
            if (orig >> 8) + delta > 0xff && !could_be_bitflip(u32::from(orig ^ be_plus)) {
                ctx.stats.progress.cur_val = StageValue::Be(i64::from(delta));
                write_u16_le(&mut pass.out, cur, be_plus);
                match ctx.submit(&pass.out)? {
                    Flow::Continue => {}
                    other => return Ok(other),
                }
            } else {
                stage_max -= 1;
            }

            let be_minus = orig.swap_bytes().wrapping_sub(delta).swap_bytes();
            if (orig >> 8) < delta && !could_be_bitflip(u32::from(orig ^ be_minus)) {
                ctx.stats.progress.cur_val = StageValue::Be(-i64::from(delta));
                write_u16_le(&mut pass.out, cur, be_minus);
                match ctx.submit(&pass.out)? {
                    Flow::Continue => {}
                    other => return Ok(other),
                }
            } else {
                stage_max -= 1;
            }

            write_u16_le(&mut pass.out, cur, orig);
        }
    }

    ctx.stats
        .finish_stage(StageId::Arith16, ctx.hit_count() - orig_hits, stage_max);
    Ok(Flow::Continue)
}

pub(crate) fn arith32<H, Q, R>(
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
    let mut stage_max = 4 * (len - 3) as u64 * u64::from(ARITH_MAX);
    ctx.stats.begin_stage(StageId::Arith32, stage_max);
    let orig_hits = ctx.hit_count();

    for cur in 0..len - 3 {
        if !pass.eff.consult(cur, 4) {
            stage_max -= 4 * u64::from(ARITH_MAX);
            continue;
        }
        ctx.stats.progress.cur_byte = Some(cur);
        let orig = read_u32_le(&pass.out, cur);

        for delta in 1..=ARITH_MAX {
            // Affecting more than two bytes is the bar here.
            let le_plus = orig.wrapping_add(delta);
            if (orig & 0xffff) + delta > 0xffff && !could_be_bitflip(orig ^ le_plus) {
                ctx.stats.progress.cur_val = StageValue::Le(i64::from(delta));
                write_u32_le(&mut pass.out, cur, le_plus);
                match ctx.submit(&pass.out)? {
                    Flow::Continue => {}
                    other => return Ok(other),
                }
            } else {
                stage_max -= 1;
            }

            let le_minus = orig.wrapping_sub(delta);
            if (orig & 0xffff) < delta && !could_be_bitflip(orig ^ le_minus) {
                ctx.stats.progress.cur_val = StageValue::Le(-i64::from(delta));
                write_u32_le(&mut pass.out, cur, le_minus);
                match ctx.submit(&pass.out)? {
                    Flow::Continue => {}
                    other => return Ok(other),
                }
            } else {
                stage_max -= 1;
            }

            let be_plus = orig.swap_bytes().wrapping_add(delta).swap_bytes();
            if (orig.swap_bytes() & 0xffff) + delta > 0xffff && !could_be_bitflip(orig ^ be_plus) {
                ctx.stats.progress.cur_val = StageValue::Be(i64::from(delta));
                write_u32_le(&mut pass.out, cur, be_plus);
                match ctx.submit(&pass.out)? {
                    Flow::Continue => {}
                    other => return Ok(other),
                }
            } else {
                stage_max -= 1;
            }

            let be_minus = orig.swap_bytes().wrapping_sub(delta).swap_bytes();
            if (orig.swap_bytes() & 0xffff) < delta && !could_be_bitflip(orig ^ be_minus) {
                ctx.stats.progress.cur_val = StageValue::Be(-i64::from(delta));
                write_u32_le(&mut pass.out, cur, be_minus);
                match ctx.submit(&pass.out)? {
                    Flow::Continue => {}
                    other => return Ok(other),
                }
            } else {
                stage_max -= 1;
            }

            write_u32_le(&mut pass.out, cur, orig);
        }
    }

    ctx.stats
        .finish_stage(StageId::Arith32, ctx.hit_count() - orig_hits, stage_max);
    Ok(Flow::Continue)
}
