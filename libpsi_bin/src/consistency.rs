use super::constants::{BIN_QUANTUM, MAX_HISTO, MAX_HISTO_LENGTH, MAX_TOTAL_BINS};
use super::error::CodecError;
use super::histogram::HistogramStore;

/// Check the structural limits of the PSI-BIN layout before writing.
///
/// Rules are checked in order and the first violation is returned:
/// 1. number of histograms in `(0, 32]`
/// 2. histogram length in `(0, 32767]`
/// 3. (strict only) histogram length is a multiple of 256
/// 4. total number of bins `<= 65536`
/// 5. histogram storage is present and agrees with the metadata
pub fn check_consistency(store: &HistogramStore, strict: bool) -> Result<(), CodecError> {
    let number = store.number_histo();
    let length = store.length_histo();
    if number == 0 || number > MAX_HISTO {
        return Err(CodecError::ConsistencyViolation(format!(
            "number of histograms {number} is not in (0, {MAX_HISTO}]"
        )));
    }
    if length == 0 || length > MAX_HISTO_LENGTH {
        return Err(CodecError::ConsistencyViolation(format!(
            "histogram length {length} is not in (0, {MAX_HISTO_LENGTH}]"
        )));
    }
    if strict && length % BIN_QUANTUM != 0 {
        return Err(CodecError::ConsistencyViolation(format!(
            "histogram length {length} is not a multiple of {BIN_QUANTUM}"
        )));
    }
    if number * length > MAX_TOTAL_BINS {
        return Err(CodecError::ConsistencyViolation(format!(
            "{number} histograms x {length} bins = {} exceeds {MAX_TOTAL_BINS} bins",
            number * length
        )));
    }
    if store.is_empty() || store.metas().len() != number {
        return Err(CodecError::ConsistencyViolation(String::from(
            "histogram storage is missing",
        )));
    }
    Ok(())
}
