//! Task catalogs, one module per provider
//!
//! Every task is a [`taskgraph::Resource`]: the same struct serves as the
//! expected value built by a model builder and the actual value returned by
//! `find`. List fields are kept sorted on both sides so they compare stably.

pub mod aws;
pub mod gce;

use taskgraph::{ExecContext, Result, TaskKey};

/// Treat a not-found error as an absent object
pub fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Deleting something that is already gone succeeds
pub fn ignore_not_found(result: Result<()>) -> Result<()> {
    optional(result).map(|_| ())
}

/// Map cloud identifiers back to task keys, preferring the expected keys
pub fn references_for(
    ctx: &ExecContext,
    expected: &[TaskKey],
    kind: &'static str,
    ids: &[String],
) -> Vec<TaskKey> {
    let mut keys: Vec<TaskKey> = ids
        .iter()
        .filter_map(|id| {
            let matched = expected
                .iter()
                .find(|k| ctx.id_of(k).as_deref() == Some(id.as_str()));
            ctx.reference_for(matched, kind, Some(id))
        })
        .collect();
    keys.sort();
    keys
}

/// Cloud identifiers of referenced tasks; all must be resolved already
pub fn require_ids(ctx: &ExecContext, keys: &[TaskKey]) -> Result<Vec<String>> {
    keys.iter().map(|k| ctx.require_id(k)).collect()
}
