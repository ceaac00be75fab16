//! Derived views of the stored histograms: rebinned, aligned to t0, restricted to the good
//! range, background corrected, and the asymmetry of two histograms with its error.
//!
//! Every view is a pure projection. An invalid histogram index, a zero binning, an invalid
//! background range or a missing t0 yields an empty vector.
use super::constants::{ASYMMETRY_PLACEHOLDER_ERROR, NEAR_ZERO_COUNTS, NEAR_ZERO_REPLACEMENT};
use super::histogram::HistogramStore;

/// Inclusive range of raw bins used to estimate a flat background
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundRange {
    pub lower: usize,
    pub upper: usize,
}

impl BackgroundRange {
    pub fn new(lower: usize, upper: usize) -> Self {
        Self { lower, upper }
    }
}

/// The pair of histograms entering an asymmetry, with their background ranges
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AsymmetryPair {
    pub plus: usize,
    pub minus: usize,
    pub alpha: f64,
    pub background_plus: BackgroundRange,
    pub background_minus: BackgroundRange,
}

fn asymmetry(a: f64, b: f64, alpha: f64) -> f64 {
    (a - alpha * b) / (a + alpha * b)
}

fn asymmetry_error(a: f64, b: f64, alpha: f64) -> f64 {
    if a < NEAR_ZERO_COUNTS || b < NEAR_ZERO_COUNTS {
        return ASYMMETRY_PLACEHOLDER_ERROR;
    }
    2.0 * alpha * (a * b * (a + b)).sqrt() / (a + alpha * b).powi(2)
}

/// A binning usable in signed bin arithmetic
fn step(binning: usize) -> Option<i64> {
    i64::try_from(binning).ok().filter(|b| *b > 0)
}

impl HistogramStore {
    /// Mean of the raw bins in `range`, None when the range is invalid for `histo`
    pub fn background(&self, histo: usize, range: BackgroundRange) -> Option<f64> {
        if range.lower > range.upper || range.upper >= self.length_histo() {
            return None;
        }
        let row = self.row(histo)?;
        let sum: f64 = (range.lower..=range.upper).map(|j| f64::from(row[j])).sum();
        Some(sum / (range.upper - range.lower + 1) as f64)
    }

    /// `count` output bins of `binning` raw bins each, starting at raw bin `start`, with
    /// `background` removed from every raw bin. The count is clipped to the data available.
    fn binned(&self, histo: usize, start: i64, count: i64, binning: usize, background: f64) -> Vec<f64> {
        let Some(row) = self.row(histo) else {
            return Vec::new();
        };
        if binning == 0 || start < 0 || count <= 0 {
            return Vec::new();
        }
        let start = start as usize;
        let available = row.len().saturating_sub(start) / binning;
        let count = (count as usize).min(available);
        (0..count)
            .map(|i| {
                let first = start + i * binning;
                (first..first + binning)
                    .map(|j| f64::from(row[j]) - background)
                    .sum::<f64>()
            })
            .collect()
    }

    fn start_from_t0(&self, histo: usize, offset: i32) -> Option<(i64, i64)> {
        let t0 = i64::from(self.t0(histo)?);
        let start = t0 + i64::from(offset);
        Some((start, self.length_histo() as i64 - start))
    }

    fn good_range(&self, histo: usize) -> Option<(i64, i64)> {
        let meta = self.meta(histo)?;
        let first = i64::from(meta.first_good);
        Some((first, i64::from(meta.last_good) - first))
    }

    /// Sums of `binning` consecutive bins over the whole histogram
    pub fn histo_vector(&self, histo: usize, binning: usize) -> Vec<f64> {
        if binning == 0 {
            return Vec::new();
        }
        let count = (self.length_histo() / binning) as i64;
        self.binned(histo, 0, count, binning, 0.0)
    }

    /// [`Self::histo_vector`] with near-empty bins replaced by a small positive count
    pub fn histo_vector_no0(&self, histo: usize, binning: usize) -> Vec<f64> {
        self.histo_vector(histo, binning)
            .into_iter()
            .map(|v| if v < NEAR_ZERO_COUNTS { NEAR_ZERO_REPLACEMENT } else { v })
            .collect()
    }

    /// Binned histogram starting `offset` bins after t0
    pub fn histo_fromt0_vector(&self, histo: usize, binning: usize, offset: i32) -> Vec<f64> {
        match (self.start_from_t0(histo, offset), step(binning)) {
            (Some((start, span)), Some(b)) => self.binned(histo, start, span / b, binning, 0.0),
            _ => Vec::new(),
        }
    }

    /// Binned histogram between first good and last good
    pub fn histo_good_bins_vector(&self, histo: usize, binning: usize) -> Vec<f64> {
        match (self.good_range(histo), step(binning)) {
            (Some((start, span)), Some(b)) => self.binned(histo, start, span / b, binning, 0.0),
            _ => Vec::new(),
        }
    }

    pub fn histo_fromt0_minus_bckgrd_vector(
        &self,
        histo: usize,
        background: BackgroundRange,
        binning: usize,
        offset: i32,
    ) -> Vec<f64> {
        let Some(bkg) = self.background(histo, background) else {
            return Vec::new();
        };
        match (self.start_from_t0(histo, offset), step(binning)) {
            (Some((start, span)), Some(b)) => self.binned(histo, start, span / b, binning, bkg),
            _ => Vec::new(),
        }
    }

    pub fn histo_good_bins_minus_bckgrd_vector(
        &self,
        histo: usize,
        background: BackgroundRange,
        binning: usize,
    ) -> Vec<f64> {
        let Some(bkg) = self.background(histo, background) else {
            return Vec::new();
        };
        match (self.good_range(histo), step(binning)) {
            (Some((start, span)), Some(b)) => self.binned(histo, start, span / b, binning, bkg),
            _ => Vec::new(),
        }
    }

    /// Background corrected from-t0 views of both histograms of the pair
    fn pair_views(&self, pair: &AsymmetryPair, binning: usize, offset: i32) -> Option<(Vec<f64>, Vec<f64>)> {
        let plus = self.histo_fromt0_minus_bckgrd_vector(pair.plus, pair.background_plus, binning, offset);
        let minus =
            self.histo_fromt0_minus_bckgrd_vector(pair.minus, pair.background_minus, binning, offset);
        if plus.is_empty() || minus.is_empty() {
            return None;
        }
        Some((plus, minus))
    }

    /// Number of points shared by both from-t0 views
    fn pair_length(&self, pair: &AsymmetryPair, binning: usize, offset: i32) -> Option<usize> {
        let b = step(binning)?;
        let max_t0 = i64::from(self.max_2_t0(pair.plus, pair.minus)?);
        let span = self.length_histo() as i64 - max_t0 - i64::from(offset);
        (span > 0).then(|| (span / b) as usize)
    }

    /// Start (in output bins) and length of the common good range of the pair
    fn pair_good_window(&self, pair: &AsymmetryPair, binning: usize) -> Option<(usize, usize)> {
        let b = step(binning)?;
        let (plus, minus) = (self.meta(pair.plus)?, self.meta(pair.minus)?);
        let lead = |first_good: i32, t0: i32| i64::from(first_good) - i64::from(t0);
        let width = |first_good: i32, last_good: i32| i64::from(last_good) - i64::from(first_good);
        let start = lead(plus.first_good, plus.t0?)
            .max(lead(minus.first_good, minus.t0?))
            .max(0);
        let span = width(plus.first_good, plus.last_good).min(width(minus.first_good, minus.last_good)) + 1;
        if span <= 0 {
            return None;
        }
        Some(((start / b) as usize, (span / b) as usize))
    }

    fn pair_map<F>(&self, pair: &AsymmetryPair, binning: usize, offset: i32, f: F) -> Vec<f64>
    where
        F: Fn(f64, f64) -> f64,
    {
        if binning == 0 {
            return Vec::new();
        }
        let (Some((plus, minus)), Some(length)) = (
            self.pair_views(pair, binning, offset),
            self.pair_length(pair, binning, offset),
        ) else {
            return Vec::new();
        };
        plus.iter()
            .zip(minus.iter())
            .take(length)
            .map(|(a, b)| f(*a, *b))
            .collect()
    }

    fn pair_good_map<F>(&self, pair: &AsymmetryPair, binning: usize, f: F) -> Vec<f64>
    where
        F: Fn(f64, f64) -> f64,
    {
        if binning == 0 {
            return Vec::new();
        }
        let (Some((plus, minus)), Some((start, length))) = (
            self.pair_views(pair, binning, 0),
            self.pair_good_window(pair, binning),
        ) else {
            return Vec::new();
        };
        plus.iter()
            .zip(minus.iter())
            .skip(start)
            .take(length)
            .map(|(a, b)| f(*a, *b))
            .collect()
    }

    /// `(A - alpha B) / (A + alpha B) + y_offset` from t0 on
    pub fn asymmetry_vector(&self, pair: &AsymmetryPair, binning: usize, offset: i32, y_offset: f64) -> Vec<f64> {
        self.pair_map(pair, binning, offset, |a, b| asymmetry(a, b, pair.alpha) + y_offset)
    }

    /// Statistical error of [`Self::asymmetry_vector`]; 1.0 where either count is near zero
    pub fn error_asymmetry_vector(&self, pair: &AsymmetryPair, binning: usize, offset: i32) -> Vec<f64> {
        self.pair_map(pair, binning, offset, |a, b| asymmetry_error(a, b, pair.alpha))
    }

    pub fn asymmetry_good_bins_vector(&self, pair: &AsymmetryPair, binning: usize) -> Vec<f64> {
        self.pair_good_map(pair, binning, |a, b| asymmetry(a, b, pair.alpha))
    }

    pub fn error_asymmetry_good_bins_vector(&self, pair: &AsymmetryPair, binning: usize) -> Vec<f64> {
        self.pair_good_map(pair, binning, |a, b| asymmetry_error(a, b, pair.alpha))
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    fn make_store(rows: &[Vec<i32>], t0: i32, first_good: i32, last_good: i32) -> HistogramStore {
        let mut store = HistogramStore::from_rows(rows).unwrap();
        for h in 0..rows.len() {
            store.set_t0(h, t0).unwrap();
            store.set_first_good(h, first_good).unwrap();
            store.set_last_good(h, last_good).unwrap();
        }
        store
    }

    fn pair(alpha: f64, background: BackgroundRange) -> AsymmetryPair {
        AsymmetryPair {
            plus: 0,
            minus: 1,
            alpha,
            background_plus: background,
            background_minus: background,
        }
    }

    #[test]
    fn test_binning_preserves_sum() {
        let row: Vec<i32> = (0..120).map(|j| (j * 7) % 11).collect();
        let total: i32 = row.iter().sum();
        let store = make_store(&[row], 0, 0, 119);
        for binning in [1, 2, 3, 4, 5, 6, 8, 10, 12] {
            let binned = store.histo_vector(0, binning);
            assert_eq!(binned.len(), 120 / binning);
            assert_eq!(binned.iter().sum::<f64>(), f64::from(total));
        }
        // 120 = 7 * 17 + 1, the trailing bin is dropped
        assert_eq!(store.histo_vector(0, 7).len(), 17);
    }

    #[test]
    fn test_invalid_requests_are_empty() {
        let store = make_store(&[vec![1; 10]], 2, 3, 8);
        assert!(store.histo_vector(1, 1).is_empty());
        assert!(store.histo_vector(0, 0).is_empty());
        assert!(store
            .histo_fromt0_minus_bckgrd_vector(0, BackgroundRange::new(5, 2), 1, 0)
            .is_empty());
        assert!(store
            .histo_fromt0_minus_bckgrd_vector(0, BackgroundRange::new(0, 10), 1, 0)
            .is_empty());

        let mut no_t0 = HistogramStore::from_rows(&[vec![1; 10], vec![1; 10]]).unwrap();
        assert!(no_t0.histo_fromt0_vector(0, 1, 0).is_empty());
        no_t0.set_t0(0, 1).unwrap();
        let p = pair(1.0, BackgroundRange::new(0, 0));
        assert!(no_t0.asymmetry_vector(&p, 1, 0, 0.0).is_empty());
    }

    #[test]
    fn test_no0_replaces_empty_bins() {
        let store = make_store(&[vec![0, 0, 3, 0]], 0, 0, 3);
        assert_eq!(store.histo_vector_no0(0, 1), vec![0.1, 0.1, 3.0, 0.1]);
        assert_eq!(store.histo_vector_no0(0, 2), vec![0.1, 3.0]);
    }

    #[test]
    fn test_fromt0_and_good_bins() {
        let row: Vec<i32> = (0..20).collect();
        let store = make_store(&[row], 4, 6, 15);
        assert_eq!(store.histo_fromt0_vector(0, 1, 0)[0], 4.0);
        assert_eq!(store.histo_fromt0_vector(0, 1, 0).len(), 16);
        assert_eq!(store.histo_fromt0_vector(0, 3, 2), vec![21.0, 30.0, 39.0, 48.0]);
        assert_eq!(store.histo_fromt0_vector(0, 1, -5), Vec::<f64>::new());
        // floor((15 - 6) / 2) points starting at bin 6
        assert_eq!(store.histo_good_bins_vector(0, 2), vec![13.0, 17.0, 21.0, 25.0]);
    }

    #[test]
    fn test_flat_background_subtracts_to_zero() {
        let store = make_store(&[vec![7; 64]], 10, 12, 60);
        let range = BackgroundRange::new(0, 9);
        assert_eq!(store.background(0, range), Some(7.0));
        for binning in [1, 4] {
            let view = store.histo_fromt0_minus_bckgrd_vector(0, range, binning, 0);
            assert_eq!(view.len(), 54 / binning);
            assert!(view.iter().all(|v| *v == 0.0));
            let good = store.histo_good_bins_minus_bckgrd_vector(0, range, binning);
            assert!(!good.is_empty());
            assert!(good.iter().all(|v| *v == 0.0));
        }
    }

    #[test]
    fn test_background_is_removed_per_raw_bin() {
        let mut row = vec![2; 10];
        row.extend(vec![12; 10]);
        let store = make_store(&[row], 10, 10, 19);
        let view = store.histo_fromt0_minus_bckgrd_vector(0, BackgroundRange::new(0, 9), 5, 0);
        assert_eq!(view, vec![50.0, 50.0]);
    }

    #[test]
    fn test_identical_histograms_have_zero_asymmetry() {
        let row: Vec<i32> = (0..200).map(|j| 1000 - 4 * j).collect();
        let store = make_store(&[row.clone(), row], 20, 25, 180);
        let p = pair(1.0, BackgroundRange::new(0, 9));
        let asym = store.asymmetry_vector(&p, 4, 0, 0.0);
        assert_eq!(asym.len(), 45);
        assert!(asym.iter().all(|a| a.abs() < 1e-12));
        let shifted = store.asymmetry_vector(&p, 4, 0, 0.25);
        assert!(shifted.iter().all(|a| (a - 0.25).abs() < 1e-12));

        let good = store.asymmetry_good_bins_vector(&p, 4);
        assert!(!good.is_empty());
        assert!(good.iter().all(|a| a.abs() < 1e-12));
    }

    #[test]
    fn test_asymmetry_error() {
        let store = make_store(&[vec![100; 8], vec![100; 8]], 0, 0, 7);
        let p = pair(1.0, BackgroundRange::new(0, 0));
        // background equals the signal, so every point falls back to the placeholder
        assert!(store
            .error_asymmetry_vector(&p, 1, 0)
            .iter()
            .all(|e| *e == 1.0));

        let mut plus = vec![0; 2];
        plus.extend(vec![100; 8]);
        let mut minus = vec![0; 2];
        minus.extend(vec![50; 8]);
        let store = make_store(&[plus, minus], 2, 2, 9);
        let p = pair(2.0, BackgroundRange::new(0, 1));
        let asym = store.asymmetry_vector(&p, 1, 0, 0.0);
        assert_eq!(asym.len(), 8);
        assert!(asym.iter().all(|a| a.abs() < 1e-12));
        let expected = 2.0 * 2.0 * (100.0f64 * 50.0 * 150.0).sqrt() / 200.0f64.powi(2);
        let errors = store.error_asymmetry_vector(&p, 1, 0);
        assert!(errors.iter().all(|e| (e - expected).abs() < 1e-12));
        let good_errors = store.error_asymmetry_good_bins_vector(&p, 2);
        assert_eq!(good_errors.len(), 4);
        assert!(good_errors
            .iter()
            .all(|e| (e - 2.0 * 2.0 * (200.0f64 * 100.0 * 300.0).sqrt() / 400.0f64.powi(2)).abs() < 1e-12));
    }

    #[test]
    fn test_extreme_binning_and_good_ranges_are_empty() {
        let mut store = make_store(&[vec![3; 64], vec![1; 64]], 4, 8, 60);
        let huge = usize::MAX;
        assert!(store.histo_fromt0_vector(0, huge, 0).is_empty());
        assert!(store.histo_good_bins_vector(0, huge).is_empty());
        let p = pair(1.0, BackgroundRange::new(0, 1));
        assert!(store.asymmetry_vector(&p, huge, 0, 0.0).is_empty());
        assert!(store.asymmetry_good_bins_vector(&p, huge).is_empty());

        store.set_t0(1, i32::MIN).unwrap();
        store.set_first_good(1, i32::MAX).unwrap();
        store.set_last_good(1, i32::MIN).unwrap();
        assert!(store.asymmetry_good_bins_vector(&p, 2).is_empty());
    }
}
