use std::collections::BTreeMap;

use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};

use crate::classify::ChoiceStat;

/// Classified events per histogram chunk. Chunking exists to show drift in
/// decision behavior over the course of the event stream.
pub const CHUNK_SIZE: usize = 20;

/// Decision proportions observed at one integer position within one chunk.
/// Holds raw counts during binning; normalized before the histogram is
/// returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceBin {
    pub hint: f64,
    pub cont: f64,
    pub stop: f64,
}

/// One chunk of the histogram: a bin for every integer position between the
/// observed bounds, including positions with no observations.
pub type BinChunk = BTreeMap<i64, ChoiceBin>;

/// Bins the classified sequence into consecutive chunks of [`CHUNK_SIZE`]
/// entries, the trailing partial chunk included only when non-empty.
///
/// Every chunk covers the full observed position range, so chunks are
/// directly comparable; bins that saw no observations keep their zero
/// default. Bins with observations are normalized so hint + cont + stop
/// sums to 1.
pub fn build_histogram(events: &[ChoiceStat]) -> Vec<BinChunk> {
    // An empty input leaves the bounds inverted, which makes the per-chunk
    // range empty; no chunks are produced in that case anyway.
    let (min_y, max_y) = match events.iter().map(|e| e.y).minmax() {
        MinMaxResult::NoElements => (100, 0),
        MinMaxResult::OneElement(y) => (y, y),
        MinMaxResult::MinMax(lo, hi) => (lo, hi),
    };

    let mut chunks: Vec<BinChunk> = Vec::with_capacity(events.len().div_ceil(CHUNK_SIZE));
    for group in events.chunks(CHUNK_SIZE) {
        let mut chunk: BinChunk = (min_y..=max_y).map(|y| (y, ChoiceBin::default())).collect();

        for event in group {
            let bin = chunk.entry(event.y).or_default();
            if event.choices.hint {
                bin.hint += 1.0;
            }
            if event.choices.cont {
                bin.cont += 1.0;
            }
            if event.choices.stop {
                bin.stop += 1.0;
            }
        }

        normalize(&mut chunk);
        chunks.push(chunk);
    }

    chunks
}

fn normalize(chunk: &mut BinChunk) {
    for bin in chunk.values_mut() {
        let sum = bin.hint + bin.cont + bin.stop;
        if sum == 0.0 {
            continue;
        }
        bin.hint /= sum;
        bin.cont /= sum;
        bin.stop /= sum;
    }
}
