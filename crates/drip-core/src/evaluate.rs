use crate::error::CoreResult;
use crate::store::{MatchSet, SubjectStore};
use crate::walk::{ShiftedRule, Walker};

/// Run one shifted rule against `store` as a single bulk query.
pub async fn evaluate(store: &dyn SubjectStore, shifted: &ShiftedRule) -> CoreResult<MatchSet> {
    let query = shifted.query()?;
    let matched = store.find(&query).await?;
    log::trace!(
        "drip {:?} offset {} bucket {}: {} matches",
        shifted.name(),
        shifted.offset(),
        shifted.bucket(),
        matched.len()
    );
    Ok(matched)
}

/// Evaluate every offset of `walker` in order. The first store error aborts
/// the walk; nothing partial is returned.
pub async fn evaluate_walk(
    store: &dyn SubjectStore,
    walker: Walker,
) -> CoreResult<Vec<(ShiftedRule, MatchSet)>> {
    let mut out = Vec::with_capacity(walker.len());
    for shifted in walker {
        let matched = evaluate(store, &shifted).await?;
        out.push((shifted, matched));
    }
    Ok(out)
}
