// Legacy limits of the PSI-BIN / MDU layouts. These are validated invariants,
// not storage capacities.

/// Maximum number of histograms in a PSI-BIN file (extended layout)
pub const MAX_HISTO: usize = 32;
/// Number of histogram metadata slots in the legacy PSI-BIN header
pub const PSI_BIN_HEADER_HISTO_SLOTS: usize = 16;
/// Maximum number of scalers stored in a PSI-BIN header
pub const MAX_PSI_BIN_SCALER: usize = 18;
/// Maximum number of scalers of any supported format (T5 carries 32 tags)
pub const MAX_SCALER: usize = 32;
/// Maximum number of averaged temperatures
pub const MAX_TEMPER: usize = 4;

/// Physical record length in bins used when writing PSI-BIN payload
pub const MAX_REC: usize = 4096;
/// Longest histogram the PSI-BIN header can describe
pub const MAX_HISTO_LENGTH: usize = 32767;
/// Total number of bins (all histograms) a PSI-BIN file may carry
pub const MAX_TOTAL_BINS: usize = 65536;
/// Histogram lengths produced by the rebin transform are multiples of this
pub const BIN_QUANTUM: usize = 256;
/// Upper cap on the per-histogram length chosen by the rebin transform
pub const MAX_REBIN_LENGTH: usize = 32512;

pub const PSI_BIN_HEADER_SIZE: usize = 1024;
pub const PSI_BIN_FORMAT_ID: &str = "1N";
/// Stored in the slot 0 t0 when the file carries no t0 information
pub const T0_ABSENT: i16 = -1;
/// Written to the obsolete TDC resolution code field
pub const TDC_RESOLUTION_UNUSED: i16 = -1;

pub const MAX_LABEL_LENGTH: usize = 4;
pub const MAX_TITLE_FIELD_LENGTH: usize = 10;
pub const MAX_COMMENT_LENGTH: usize = 62;
pub const DATE_LENGTH: usize = 9;
pub const TIME_LENGTH: usize = 8;

// Bin width units
pub const NS_PER_US: f64 = 1.0e3;
pub const PS_PER_US: f64 = 1.0e6;

/// Bin width in microseconds of TDC resolution code 0 (the legacy fallback)
pub const TDC_BASE_BIN_WIDTH: f64 = 0.125 * 625.0e-6;

/// Counts below this value are considered empty by the views
pub const NEAR_ZERO_COUNTS: f64 = 0.5;
/// Substituted for near-empty bins by the no-zero view
pub const NEAR_ZERO_REPLACEMENT: f64 = 0.1;
/// Error reported for asymmetry bins without enough statistics
pub const ASYMMETRY_PLACEHOLDER_ERROR: f64 = 1.0;
