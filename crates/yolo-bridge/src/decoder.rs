//! Result decoder
//!
//! Projects native result collections into `Detection` values and destroys
//! every collection it is handed. Records and inner collections are read in
//! parallel; output order follows native index order.
//!
//! For batched results the outer collection outlives every inner one: all
//! inner collections are fetched, decoded and destroyed before the outer
//! collection is released.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{InteropError, Result};
use crate::release::Released;
use crate::runtime::{NativeRuntime, RawResultSets, RawResults};
use crate::types::Detection;

/// Read every record of one result collection, then destroy it.
pub fn decode_one<R: NativeRuntime>(runtime: &R, results: RawResults) -> Vec<Detection> {
    let guard = Released::new(runtime, results, R::result_destroy);
    let raw: &RawResults = &guard;
    let count = runtime.result_count(raw);

    (0..count)
        .into_par_iter()
        .map(|i| Detection::from(runtime.result_at(raw, i)))
        .collect()
}

/// Decode a batched result collection; entry `i` of the output is inner
/// collection `i`.
///
/// A null inner collection fails the batch with `MissingResultSet`, reported
/// only after every other collection has been decoded and destroyed.
pub fn decode_batch<R: NativeRuntime>(
    runtime: &R,
    sets: RawResultSets,
) -> Result<Vec<Vec<Detection>>> {
    let outer = Released::new(runtime, sets, R::result_sets_destroy);
    let count = runtime.result_sets_count(&outer);

    let decoded: Vec<Option<Vec<Detection>>> = {
        let raw: &RawResultSets = &outer;
        (0..count)
            .into_par_iter()
            .map(|i| {
                runtime
                    .result_sets_at(raw, i)
                    .map(|inner| decode_one(runtime, inner))
            })
            .collect()
    };
    drop(outer);
    debug!("decoded {} batched result sets", count);

    decoded
        .into_iter()
        .enumerate()
        .map(|(index, set)| {
            set.ok_or_else(|| {
                warn!("batched result set {} is null", index);
                InteropError::MissingResultSet { index }
            })
        })
        .collect()
}
