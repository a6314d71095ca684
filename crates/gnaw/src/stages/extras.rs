//! Dictionary stages: walking overwrite and insertion of user tokens, then
//! overwrite of the freshest auto-collected tokens.

use libafl_bolts::rands::Rand;

use crate::{
    consts::{MAX_DET_EXTRAS, USE_AUTO_EXTRAS},
    dict::DictToken,
    engine::FuzzContext,
    error::EngineError,
    harness::Harness,
    queue::QueueView,
    seed::Seed,
    stages::{Flow, PassState, StageId},
};

pub(crate) fn user_overwrite<H, Q, R>(
    ctx: &mut FuzzContext<'_, H, Q, R>,
    pass: &mut PassState,
    _seed: &Seed,
) -> Result<Flow, EngineError>
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    let tokens = ctx.queue.user_extras().tokens().to_vec();
    overwrite_walk(ctx, pass, StageId::ExtrasUserOver, &tokens, true)
}

pub(crate) fn auto_overwrite<H, Q, R>(
    ctx: &mut FuzzContext<'_, H, Q, R>,
    pass: &mut PassState,
    _seed: &Seed,
) -> Result<Flow, EngineError>
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    let all = ctx.queue.auto_extras().tokens();
    let tokens = all[..all.len().min(USE_AUTO_EXTRAS)].to_vec();
    overwrite_walk(ctx, pass, StageId::ExtrasAutoOver, &tokens, false)
}

/// Shared overwrite walk. Tokens come in ascending length order, so the one
/// restore per offset (sized by the last surviving write) undoes every
/// earlier, shorter write at that offset.
fn overwrite_walk<H, Q, R>(
    ctx: &mut FuzzContext<'_, H, Q, R>,
    pass: &mut PassState,
    stage: StageId,
    tokens: &[DictToken],
    subsample: bool,
) -> Result<Flow, EngineError>
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    if tokens.is_empty() {
        return Ok(Flow::Continue);
    }
    let len = pass.len();
    let count = tokens.len();
    let mut stage_max = (count * len) as u64;
    ctx.stats.begin_stage(stage, stage_max);
    let orig_hits = ctx.hit_count();

    for cur in 0..len {
        ctx.stats.progress.cur_byte = Some(cur);
        let mut last_len = 0;

        for token in tokens {
            let skip_roll = subsample
                && count > MAX_DET_EXTRAS
                && ctx.rng.below_or_zero(count) >= MAX_DET_EXTRAS;
            if skip_roll
                || token.len() > len - cur
                || token.as_slice() == &pass.out[cur..cur + token.len()]
                || !pass.eff.consult(cur, token.len())
            {
                stage_max -= 1;
                continue;
            }

            last_len = token.len();
            pass.out[cur..cur + last_len].copy_from_slice(token.as_slice());
            match ctx.submit(&pass.out)? {
                Flow::Continue => {}
                other => return Ok(other),
            }
        }

        pass.out[cur..cur + last_len].copy_from_slice(&pass.input[cur..cur + last_len]);
    }

    ctx.stats
        .finish_stage(stage, ctx.hit_count() - orig_hits, stage_max);
    Ok(Flow::Continue)
}

pub(crate) fn user_insert<H, Q, R>(
    ctx: &mut FuzzContext<'_, H, Q, R>,
    pass: &mut PassState,
    _seed: &Seed,
) -> Result<Flow, EngineError>
where
    H: Harness,
    Q: QueueView,
    R: Rand,
{
    let tokens = ctx.queue.user_extras().tokens().to_vec();
    if tokens.is_empty() {
        return Ok(Flow::Continue);
    }
    let len = pass.len();
    let mut stage_max = (tokens.len() * (len + 1)) as u64;
    ctx.stats.begin_stage(StageId::ExtrasUserInsert, stage_max);
    let orig_hits = ctx.hit_count();

    let longest = tokens.last().map_or(0, |t| t.len());
    let mut scratch = Vec::with_capacity(len + longest);

    for cur in 0..=len {
        ctx.stats.progress.cur_byte = Some(cur);

        for token in &tokens {
            if len + token.len() > ctx.config.max_file {
                stage_max -= 1;
                continue;
            }

            scratch.clear();
            scratch.extend_from_slice(&pass.out[..cur]);
            scratch.extend_from_slice(token.as_slice());
            scratch.extend_from_slice(&pass.out[cur..]);

            match ctx.submit(&scratch)? {
                Flow::Continue => {}
                other => return Ok(other),
            }
        }
    }

    ctx.stats
        .finish_stage(StageId::ExtrasUserInsert, ctx.hit_count() - orig_hits, stage_max);
    Ok(Flow::Continue)
}
