use ndarray::{Array2, ArrayView1, ArrayViewMut1};
use serde::Serialize;

use super::constants::{MAX_LABEL_LENGTH, MAX_SCALER, NS_PER_US, PS_PER_US};
use super::error::CodecError;
use super::run_info::{clip, Scaler, TemperatureReading};

/// Per-histogram header information
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistogramMeta {
    pub label: String,
    /// Time-zero bin. None when the file carried no t0 information.
    pub t0: Option<i32>,
    /// Time-zero in physical form as stored in the header
    pub real_t0: Option<f64>,
    pub first_good: i32,
    pub last_good: i32,
    pub events: i64,
}

impl HistogramMeta {
    pub fn with_label(label: &str) -> Self {
        Self {
            label: clip(label, MAX_LABEL_LENGTH),
            ..Default::default()
        }
    }
}

/// Index of the maximum bin, the usual first guess for t0 when a file has none
pub fn estimate_t0(counts: &[i32]) -> usize {
    let mut max_bin = 0;
    let mut max_val = 0;
    for (idx, val) in counts.iter().enumerate() {
        if *val > max_val {
            max_val = *val;
            max_bin = idx;
        }
    }
    max_bin
}

fn index_error(index: usize, number: usize) -> CodecError {
    CodecError::HistogramCountInvalid(format!(
        "histogram index {index} out of range for {number} histograms"
    ))
}

/// HistogramStore owns the decoded integer histograms and everything measured alongside.
///
/// The grid is a single `number_histo x length_histo` matrix, so every histogram has the
/// same length by construction. There is exactly one [`HistogramMeta`] per row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistogramStore {
    grid: Array2<i32>,
    meta: Vec<HistogramMeta>,
    bin_width_us: f64,
    total_events: i64,
    default_binning: usize,
    scalers: Vec<Scaler>,
    temperatures: Vec<TemperatureReading>,
}

impl HistogramStore {
    pub fn new() -> Self {
        Self {
            default_binning: 1,
            ..Default::default()
        }
    }

    /// Build a store from equal-length rows
    pub fn from_rows(rows: &[Vec<i32>]) -> Result<Self, CodecError> {
        let mut store = Self::new();
        store.set_grid(Self::rows_to_grid(rows)?);
        Ok(store)
    }

    pub(crate) fn rows_to_grid(rows: &[Vec<i32>]) -> Result<Array2<i32>, CodecError> {
        let length = rows.first().map(|r| r.len()).unwrap_or(0);
        if let Some(bad) = rows.iter().position(|r| r.len() != length) {
            return Err(CodecError::ConsistencyViolation(format!(
                "histogram {bad} has {} bins, expected {length}",
                rows[bad].len()
            )));
        }
        let flat: Vec<i32> = rows.iter().flatten().copied().collect();
        Array2::from_shape_vec((rows.len(), length), flat)
            .map_err(|e| CodecError::AllocationFailed(e.to_string()))
    }

    /// Replace the grid. Metadata is kept for surviving rows and defaulted for new ones.
    pub fn set_grid(&mut self, grid: Array2<i32>) {
        self.meta.resize_with(grid.nrows(), HistogramMeta::default);
        self.grid = grid;
    }

    pub fn grid(&self) -> &Array2<i32> {
        &self.grid
    }

    pub fn number_histo(&self) -> usize {
        self.grid.nrows()
    }

    pub fn length_histo(&self) -> usize {
        self.grid.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    pub fn row(&self, histo: usize) -> Option<ArrayView1<'_, i32>> {
        (histo < self.number_histo()).then(|| self.grid.row(histo))
    }

    pub fn row_mut(&mut self, histo: usize) -> Option<ArrayViewMut1<'_, i32>> {
        (histo < self.number_histo()).then(|| self.grid.row_mut(histo))
    }

    pub fn histo_int(&self, histo: usize, bin: usize) -> Option<i32> {
        self.grid.get((histo, bin)).copied()
    }

    pub fn histo(&self, histo: usize, bin: usize) -> Option<f64> {
        self.histo_int(histo, bin).map(f64::from)
    }

    pub fn histo_array_int(&self, histo: usize) -> Option<Vec<i32>> {
        self.row(histo).map(|r| r.to_vec())
    }

    /// All histograms as floating point rows
    pub fn histos_vector(&self) -> Vec<Vec<f64>> {
        self.grid
            .rows()
            .into_iter()
            .map(|r| r.iter().map(|v| f64::from(*v)).collect())
            .collect()
    }

    pub fn meta(&self, histo: usize) -> Option<&HistogramMeta> {
        self.meta.get(histo)
    }

    pub fn meta_mut(&mut self, histo: usize) -> Option<&mut HistogramMeta> {
        self.meta.get_mut(histo)
    }

    pub fn metas(&self) -> &[HistogramMeta] {
        &self.meta
    }

    fn meta_checked(&mut self, histo: usize) -> Result<&mut HistogramMeta, CodecError> {
        let number = self.meta.len();
        self.meta.get_mut(histo).ok_or(index_error(histo, number))
    }

    // Labels

    pub fn name_histo(&self, histo: usize) -> Option<&str> {
        self.meta(histo).map(|m| m.label.as_str())
    }

    pub fn set_name_histo(&mut self, histo: usize, name: &str) -> Result<(), CodecError> {
        self.meta_checked(histo)?.label = clip(name, MAX_LABEL_LENGTH);
        Ok(())
    }

    pub fn histo_names(&self) -> Vec<String> {
        self.meta.iter().map(|m| m.label.clone()).collect()
    }

    /// Set all labels at once; extra names are rejected
    pub fn set_histo_names(&mut self, names: &[String]) -> Result<(), CodecError> {
        if names.len() > self.meta.len() {
            return Err(index_error(names.len() - 1, self.meta.len()));
        }
        for (idx, name) in names.iter().enumerate() {
            self.set_name_histo(idx, name)?;
        }
        Ok(())
    }

    // Time zero and good bins

    pub fn t0(&self, histo: usize) -> Option<i32> {
        self.meta(histo).and_then(|m| m.t0)
    }

    pub fn t0_double(&self, histo: usize) -> Option<f64> {
        self.meta(histo).and_then(|m| m.real_t0)
    }

    pub fn set_t0(&mut self, histo: usize, t0: i32) -> Result<(), CodecError> {
        self.meta_checked(histo)?.t0 = Some(t0);
        Ok(())
    }

    pub fn set_t0_double(&mut self, histo: usize, t0: f64) -> Result<(), CodecError> {
        self.meta_checked(histo)?.real_t0 = Some(t0);
        Ok(())
    }

    /// t0 of every histogram, None where absent
    pub fn t0_vector(&self) -> Vec<Option<i32>> {
        self.meta.iter().map(|m| m.t0).collect()
    }

    pub fn set_t0_vector(&mut self, t0s: &[i32]) -> Result<(), CodecError> {
        if t0s.len() > self.meta.len() {
            return Err(index_error(t0s.len() - 1, self.meta.len()));
        }
        for (idx, t0) in t0s.iter().enumerate() {
            self.set_t0(idx, *t0)?;
        }
        Ok(())
    }

    pub fn first_good(&self, histo: usize) -> Option<i32> {
        self.meta(histo).map(|m| m.first_good)
    }

    pub fn set_first_good(&mut self, histo: usize, bin: i32) -> Result<(), CodecError> {
        self.meta_checked(histo)?.first_good = bin;
        Ok(())
    }

    pub fn first_good_vector(&self) -> Vec<i32> {
        self.meta.iter().map(|m| m.first_good).collect()
    }

    pub fn last_good(&self, histo: usize) -> Option<i32> {
        self.meta(histo).map(|m| m.last_good)
    }

    pub fn set_last_good(&mut self, histo: usize, bin: i32) -> Result<(), CodecError> {
        self.meta_checked(histo)?.last_good = bin;
        Ok(())
    }

    pub fn last_good_vector(&self) -> Vec<i32> {
        self.meta.iter().map(|m| m.last_good).collect()
    }

    pub fn max_t0(&self) -> Option<i32> {
        self.meta.iter().filter_map(|m| m.t0).max()
    }

    pub fn min_t0(&self) -> Option<i32> {
        self.meta.iter().filter_map(|m| m.t0).min()
    }

    /// Larger t0 of two histograms
    pub fn max_2_t0(&self, k: usize, j: usize) -> Option<i32> {
        Some(self.t0(k)?.max(self.t0(j)?))
    }

    pub fn min_2_t0(&self, k: usize, j: usize) -> Option<i32> {
        Some(self.t0(k)?.min(self.t0(j)?))
    }

    pub fn max_last_good(&self) -> Option<i32> {
        self.meta.iter().map(|m| m.last_good).max()
    }

    pub fn min_last_good(&self) -> Option<i32> {
        self.meta.iter().map(|m| m.last_good).min()
    }

    pub fn max_2_last_good(&self, k: usize, j: usize) -> Option<i32> {
        Some(self.last_good(k)?.max(self.last_good(j)?))
    }

    pub fn min_2_last_good(&self, k: usize, j: usize) -> Option<i32> {
        Some(self.last_good(k)?.min(self.last_good(j)?))
    }

    // Events

    pub fn events_histo(&self, histo: usize) -> Option<i64> {
        self.meta(histo).map(|m| m.events)
    }

    pub fn events_vector(&self) -> Vec<i64> {
        self.meta.iter().map(|m| m.events).collect()
    }

    pub fn total_events(&self) -> i64 {
        self.total_events
    }

    pub fn set_total_events(&mut self, total: i64) {
        self.total_events = total;
    }

    /// Set every histogram's event count to the sum of its bins and update the total
    pub fn recompute_events(&mut self) {
        let mut total = 0;
        for (meta, row) in self.meta.iter_mut().zip(self.grid.rows()) {
            meta.events = row.iter().map(|v| i64::from(*v)).sum();
            total += meta.events;
        }
        self.total_events = total;
    }

    // Bin width

    pub fn bin_width_us(&self) -> f64 {
        self.bin_width_us
    }

    pub fn set_bin_width_us(&mut self, width: f64) {
        self.bin_width_us = width;
    }

    pub fn bin_width_ns(&self) -> f64 {
        self.bin_width_us * NS_PER_US
    }

    pub fn set_bin_width_ns(&mut self, width: f64) {
        self.bin_width_us = width / NS_PER_US;
    }

    pub fn bin_width_ps(&self) -> f64 {
        self.bin_width_us * PS_PER_US
    }

    pub fn set_bin_width_ps(&mut self, width: f64) {
        self.bin_width_us = width / PS_PER_US;
    }

    pub fn default_binning(&self) -> usize {
        self.default_binning
    }

    // Scalers and temperatures

    pub fn scalers(&self) -> &[Scaler] {
        &self.scalers
    }

    /// Replace the scalers, keeping at most MAX_SCALER of them
    pub fn set_scalers(&mut self, mut scalers: Vec<Scaler>) {
        if scalers.len() > MAX_SCALER {
            spdlog::warn!("Dropping {} scalers beyond {MAX_SCALER}", scalers.len() - MAX_SCALER);
            scalers.truncate(MAX_SCALER);
        }
        self.scalers = scalers;
    }

    pub fn number_scaler(&self) -> usize {
        self.scalers.len()
    }

    pub fn scaler_counts(&self) -> Vec<i64> {
        self.scalers.iter().map(|s| s.count).collect()
    }

    pub fn scaler_names(&self) -> Vec<String> {
        self.scalers.iter().map(|s| s.label.clone()).collect()
    }

    pub fn temperatures(&self) -> &[TemperatureReading] {
        &self.temperatures
    }

    pub fn set_temperatures(&mut self, temperatures: Vec<TemperatureReading>) {
        self.temperatures = temperatures;
    }

    pub fn number_temperature(&self) -> usize {
        self.temperatures.len()
    }

    pub fn temperature_means(&self) -> Vec<f64> {
        self.temperatures.iter().map(|t| t.mean).collect()
    }

    pub fn temperature_deviations(&self) -> Vec<f64> {
        self.temperatures.iter().map(|t| t.deviation).collect()
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> HistogramStore {
        let mut store = HistogramStore::from_rows(&[vec![1, 5, 2, 0], vec![0, 1, 9, 3]]).unwrap();
        store.set_t0(0, 1).unwrap();
        store.set_t0(1, 2).unwrap();
        store.set_last_good(0, 3).unwrap();
        store.set_last_good(1, 2).unwrap();
        store
    }

    #[test]
    fn test_shape_and_access() {
        let store = store();
        assert_eq!(store.number_histo(), 2);
        assert_eq!(store.length_histo(), 4);
        assert_eq!(store.metas().len(), 2);
        assert_eq!(store.histo_int(1, 2), Some(9));
        assert_eq!(store.histo(0, 1), Some(5.0));
        assert_eq!(store.histo_int(2, 0), None);
        assert_eq!(store.histo_int(0, 4), None);
        assert_eq!(store.histo_array_int(1), Some(vec![0, 1, 9, 3]));
        assert_eq!(store.histos_vector()[0], vec![1.0, 5.0, 2.0, 0.0]);
        assert_eq!(store.default_binning(), 1);
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        assert!(matches!(
            HistogramStore::from_rows(&[vec![1, 2], vec![3]]),
            Err(CodecError::ConsistencyViolation(_))
        ));
    }

    #[test]
    fn test_extrema_and_setters() {
        let mut store = store();
        assert_eq!(store.max_t0(), Some(2));
        assert_eq!(store.min_t0(), Some(1));
        assert_eq!(store.max_2_t0(0, 1), Some(2));
        assert_eq!(store.min_2_last_good(0, 1), Some(2));
        assert_eq!(store.max_last_good(), Some(3));
        assert_eq!(store.max_2_t0(0, 5), None);
        assert!(store.set_t0(7, 0).is_err());
        store.set_name_histo(0, "forward").unwrap();
        assert_eq!(store.name_histo(0), Some("forw"));
    }

    #[test]
    fn test_events_and_units() {
        let mut store = store();
        store.recompute_events();
        assert_eq!(store.events_vector(), vec![8, 13]);
        assert_eq!(store.total_events(), 21);
        store.set_bin_width_ns(0.1953125);
        assert!((store.bin_width_us() - 0.0001953125).abs() < 1e-15);
        assert!((store.bin_width_ps() - 195.3125).abs() < 1e-9);
        store.set_scalers(vec![Scaler::new("c", 1); 40]);
        assert_eq!(store.number_scaler(), MAX_SCALER);
        assert_eq!(store.scaler_counts().iter().sum::<i64>(), 32);
    }

    #[test]
    fn test_estimate_t0() {
        assert_eq!(estimate_t0(&[0, 3, 10, 10, 2]), 2);
        assert_eq!(estimate_t0(&[]), 0);
    }
}
