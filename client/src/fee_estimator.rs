//! Fee-rate math: histogram percentiles, unit conversion, ETA buckets.

use ember_types::FeeTiers;

/// Value at percentile `p` (0.0..=1.0) of a sorted slice, using linear
/// interpolation between closest ranks.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if p <= 0.0 {
        return sorted[0];
    }
    if p >= 1.0 {
        return sorted[sorted.len() - 1];
    }

    let index = (sorted.len() - 1) as f64 * p;
    let lower = index.floor() as usize;
    let upper = lower + 1;
    let weight = index.fract();

    if upper >= sorted.len() {
        return sorted[lower];
    }
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Resolution used to flatten the histogram; keeps the working array small.
const FLATTEN_CHUNK_VBYTES: u64 = 25_000;

/// Virtual bytes that fit in one block.
const BLOCK_VSIZE: u64 = 1_000_000;

/// Median fee rate (sat/vB) of the first `number_of_blocks` blocks' worth
/// of mempool transactions.
///
/// The histogram is `[(fee_rate, vsize), ...]` ordered by decreasing fee
/// rate, where each `vsize` is the cumulative virtual size of mempool
/// transactions in that rate interval.
pub fn estimate_from_histogram(number_of_blocks: u64, histogram: &[(f64, u64)]) -> u64 {
    let budget = BLOCK_VSIZE * number_of_blocks;

    // Truncate the histogram to exactly the requested depth.
    let mut total_vsize = 0u64;
    let mut truncated: Vec<(f64, u64)> = Vec::new();
    for &(fee, vsize) in histogram {
        let mut vsize = vsize;
        let mut stop = false;
        if total_vsize + vsize >= budget {
            vsize = budget - total_vsize;
            stop = true;
        }
        truncated.push((fee, vsize));
        total_vsize += vsize;
        if stop {
            break;
        }
    }

    // Spread into a flat array so a rank percentile is straightforward.
    let mut flat: Vec<f64> = Vec::new();
    for (fee, vsize) in truncated {
        let repeats = (vsize as f64 / FLATTEN_CHUNK_VBYTES as f64).round() as usize;
        flat.extend(std::iter::repeat(fee).take(repeats));
    }
    flat.sort_by(|a, b| a.partial_cmp(b).expect("fee rates are finite"));

    let median = percentile(&flat, 0.5).round() as u64;
    median.max(1)
}

/// Convert an `estimatefee` reply (BTC per kilobyte) to sat/vB.
///
/// Servers answer `-1` when they have no estimate; that maps to the
/// 1 sat/vB floor. The divisor is 1024, matching the behavior this
/// client is replacing, not the SI kilobyte.
pub fn btc_per_kb_to_sat_per_vb(btc_per_kb: f64) -> u64 {
    if btc_per_kb < 0.0 {
        return 1;
    }
    let sat_per_vb = btc_per_kb / 1024.0 * 100_000_000.0;
    (sat_per_vb.round() as u64).max(1)
}

/// Bucket a pending transaction's fee rate into a confirmation ETA label.
pub fn eta_label(sat_per_vbyte: u64, tiers: &FeeTiers) -> &'static str {
    if sat_per_vbyte >= tiers.fast {
        "10m"
    } else if sat_per_vbyte >= tiers.medium {
        "3h"
    } else {
        "1d+"
    }
}
