use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::constants::{BIN_QUANTUM, MAX_HISTO, MAX_REBIN_LENGTH, MAX_TOTAL_BINS};
use super::error::CodecError;
use super::histogram::HistogramStore;

/// How histograms that exceed the PSI-BIN bin budget are made to fit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebinPolicy {
    /// Sum groups of bins and zero pad to a multiple of 256
    #[default]
    RebinAndPad,
    /// Keep only the leading bins
    Truncate,
}

/// Longest histogram that fits the bin budget for `number_histo` histograms
pub fn max_histo_length(number_histo: usize) -> usize {
    if number_histo == 0 {
        return 0;
    }
    let per_histo = MAX_TOTAL_BINS / number_histo;
    (per_histo - per_histo % BIN_QUANTUM).min(MAX_REBIN_LENGTH)
}

fn validate(histos: &[Vec<i32>]) -> Result<usize, CodecError> {
    if histos.is_empty() || histos.len() > MAX_HISTO {
        return Err(CodecError::ConsistencyViolation(format!(
            "cannot store {} histograms, limit is {MAX_HISTO}",
            histos.len()
        )));
    }
    let length = histos[0].len();
    if length == 0 {
        return Err(CodecError::ConsistencyViolation(String::from(
            "histograms are empty",
        )));
    }
    if let Some(bad) = histos.iter().position(|h| h.len() != length) {
        return Err(CodecError::ConsistencyViolation(format!(
            "histogram {bad} has {} bins, expected {length}",
            histos[bad].len()
        )));
    }
    Ok(length)
}

/// Sum groups of `factor` bins. The last group may be partial.
fn rebin_row(row: &[i32], factor: usize, padded_length: usize) -> Vec<i32> {
    let mut out: Vec<i32> = row
        .chunks(factor)
        .map(|group| group.iter().fold(0i32, |acc, v| acc.saturating_add(*v)))
        .collect();
    out.resize(padded_length, 0);
    out
}

/// Replace the histograms of `store` by `histos`, reshaped to fit the PSI-BIN limits.
///
/// Existing metadata is kept and rescaled; missing slots get defaults. On error the
/// store is left untouched. Event counts are recomputed.
pub fn put_histograms(
    store: &mut HistogramStore,
    histos: &[Vec<i32>],
    policy: RebinPolicy,
) -> Result<(), CodecError> {
    let length = validate(histos)?;
    let number = histos.len();
    let max_length = max_histo_length(number);

    match policy {
        RebinPolicy::RebinAndPad => {
            let factor = length.div_ceil(max_length).max(1);
            let binned_length = length.div_ceil(factor);
            let padded_length = binned_length.div_ceil(BIN_QUANTUM) * BIN_QUANTUM;
            let flat: Vec<i32> = histos
                .iter()
                .flat_map(|row| rebin_row(row, factor, padded_length))
                .collect();
            let grid = Array2::from_shape_vec((number, padded_length), flat)
                .map_err(|e| CodecError::AllocationFailed(e.to_string()))?;

            let old_width = store.bin_width_us();
            store.set_grid(grid);
            let f = factor as i32;
            for histo in 0..number {
                if let Some(meta) = store.meta_mut(histo) {
                    if let Some(t0) = meta.t0 {
                        meta.real_t0 = Some(old_width * f64::from(t0));
                        meta.t0 = Some(t0 / f);
                    }
                    meta.first_good /= f;
                    meta.last_good /= f;
                }
            }
            store.set_bin_width_us(old_width * factor as f64);
            if factor > 1 {
                spdlog::info!(
                    "Rebinned {number} histograms of {length} bins by {factor} to {padded_length} bins"
                );
            }
        }
        RebinPolicy::Truncate => {
            let new_length = length.min(max_length);
            let flat: Vec<i32> = histos
                .iter()
                .flat_map(|row| row[..new_length].iter().copied())
                .collect();
            let grid = Array2::from_shape_vec((number, new_length), flat)
                .map_err(|e| CodecError::AllocationFailed(e.to_string()))?;

            store.set_grid(grid);
            let limit = new_length as i32;
            for histo in 0..number {
                if let Some(meta) = store.meta_mut(histo) {
                    if meta.t0.is_some_and(|t0| t0 >= limit) {
                        meta.t0 = Some(0);
                    }
                    if meta.first_good >= limit {
                        meta.first_good = 0;
                    }
                    if meta.last_good >= limit {
                        meta.last_good = limit - 1;
                    }
                }
            }
            if new_length < length {
                spdlog::warn!(
                    "Truncated {number} histograms from {length} to {new_length} bins"
                );
            }
        }
    }
    store.recompute_events();
    Ok(())
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_histo_length() {
        assert_eq!(max_histo_length(1), 32512);
        assert_eq!(max_histo_length(2), 32512);
        assert_eq!(max_histo_length(3), 21760);
        assert_eq!(max_histo_length(16), 4096);
        assert_eq!(max_histo_length(32), 2048);
    }

    #[test]
    fn test_rebin_pads_short_histograms() {
        let rows: Vec<Vec<i32>> = (0..3).map(|h| vec![h + 1; 1000]).collect();
        let mut store = HistogramStore::new();
        store.set_bin_width_us(0.001);
        store.set_grid(Array2::zeros((3, 10)));
        store.set_t0(1, 123).unwrap();
        put_histograms(&mut store, &rows, RebinPolicy::RebinAndPad).unwrap();

        assert_eq!(store.length_histo(), 1024);
        assert_eq!(store.length_histo() % 256, 0);
        assert_eq!(store.t0(1), Some(123));
        assert_eq!(store.histo_int(2, 999), Some(3));
        assert_eq!(store.histo_int(2, 1000), Some(0));
        assert_eq!(store.events_vector(), vec![1000, 2000, 3000]);
        assert_eq!(store.total_events(), 6000);
    }

    #[test]
    fn test_rebin_preserves_totals() {
        let rows: Vec<Vec<i32>> = (0..16)
            .map(|h| (0..10001).map(|j| (j + h) % 7).collect())
            .collect();
        let sums: Vec<i64> = rows
            .iter()
            .map(|r| r.iter().map(|v| i64::from(*v)).sum())
            .collect();
        let mut store = HistogramStore::new();
        store.set_bin_width_us(0.0001);
        store.set_grid(Array2::zeros((16, 1)));
        for h in 0..16 {
            store.set_t0(h, 1001).unwrap();
            store.set_first_good(h, 1100).unwrap();
            store.set_last_good(h, 9999).unwrap();
        }
        put_histograms(&mut store, &rows, RebinPolicy::RebinAndPad).unwrap();

        // 10001 bins against a budget of 4096 per histogram
        assert_eq!(store.length_histo(), 3584);
        assert_eq!(store.events_vector(), sums);
        assert_eq!(store.t0(0), Some(333));
        assert_eq!(store.first_good(0), Some(366));
        assert_eq!(store.last_good(0), Some(3333));
        assert!((store.t0_double(0).unwrap() - 0.1001).abs() < 1e-12);
        assert!((store.bin_width_us() - 0.0003).abs() < 1e-15);
        assert!(crate::consistency::check_consistency(&store, true).is_ok());
    }

    #[test]
    fn test_truncate_clamps_markers() {
        let rows: Vec<Vec<i32>> = vec![vec![1; 5000]; 16];
        let mut store = HistogramStore::new();
        store.set_grid(Array2::zeros((16, 1)));
        store.set_t0(0, 4500).unwrap();
        store.set_first_good(0, 4600).unwrap();
        store.set_last_good(0, 4999).unwrap();
        store.set_t0(1, 50).unwrap();
        put_histograms(&mut store, &rows, RebinPolicy::Truncate).unwrap();

        assert_eq!(store.length_histo(), 4096);
        assert_eq!(store.t0(0), Some(0));
        assert_eq!(store.first_good(0), Some(0));
        assert_eq!(store.last_good(0), Some(4095));
        assert_eq!(store.t0(1), Some(50));
        assert_eq!(store.events_histo(0), Some(4096));
    }

    #[test]
    fn test_invalid_input_leaves_store_untouched() {
        let mut store = HistogramStore::from_rows(&[vec![1, 2, 3]]).unwrap();
        let before = store.clone();
        for rows in [
            Vec::new(),
            vec![vec![1; 4]; 33],
            vec![vec![1; 4], vec![1; 5]],
            vec![Vec::new(), Vec::new()],
        ] {
            for policy in [RebinPolicy::RebinAndPad, RebinPolicy::Truncate] {
                assert!(matches!(
                    put_histograms(&mut store, &rows, policy),
                    Err(CodecError::ConsistencyViolation(_))
                ));
            }
        }
        assert_eq!(store, before);
    }
}
