//! MDU front-end dumps (pTA "M3", TDC "T4" and "T5").
//!
//! A file is a 256 byte general header, a settings block with one tag record per
//! channel, a statistics block and finally the binned positron histograms in tag order.
use bit_set::BitSet;
use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use super::codec::DecodedRun;
use super::constants::*;
use super::error::CodecError;
use super::format::{FileFormat, MduVariant};
use super::histogram::{HistogramMeta, HistogramStore};
use super::layout::{Field, FieldKind, FieldReader};
use super::run_info::{RunIdentity, Scaler, TemperatureReading};

pub const MDU_HEADER_SIZE: usize = 256;
pub const MDU_TAG_SIZE: usize = 48;
pub const MDU_SETTINGS_PREAMBLE: usize = 8;
pub const MDU_STATISTICS_FIXED: usize = 4 + MAX_TEMPER * 8;
const TAG_LABEL_LENGTH: usize = 10;
const SELECTION_LENGTH: usize = 64;
const PTA_BASE_BIN_WIDTH: f64 = 0.000625;
const PTA_MAX_TIMESPAN_CODE: u16 = 5;

// General header
pub const FORMAT_ID: Field = Field::text("format_id", 0, 2);
pub const FORMAT_VERSION: Field = Field::scalar("format_version", 2, FieldKind::U16);
pub const NUM_BYTES_HEADER: Field = Field::scalar("num_bytes_header", 4, FieldKind::U32);
pub const NUM_BYTES_SETTINGS: Field = Field::scalar("num_bytes_settings", 8, FieldKind::U32);
pub const NUM_BYTES_STATISTICS: Field = Field::scalar("num_bytes_statistics", 12, FieldKind::U32);
pub const NUM_BYTES_TAG: Field = Field::scalar("num_bytes_tag", 16, FieldKind::U32);
pub const NUMBER_TAGS: Field = Field::scalar("number_tags", 20, FieldKind::U16);
pub const RUN_NUMBER: Field = Field::scalar("run_number", 24, FieldKind::I32);
pub const SAMPLE: Field = Field::text("sample", 28, MAX_TITLE_FIELD_LENGTH);
pub const TEMPERATURE: Field = Field::text("temperature", 38, MAX_TITLE_FIELD_LENGTH);
pub const FIELD: Field = Field::text("field", 48, MAX_TITLE_FIELD_LENGTH);
pub const ORIENTATION: Field = Field::text("orientation", 58, MAX_TITLE_FIELD_LENGTH);
pub const SETUP: Field = Field::text("setup", 68, MAX_TITLE_FIELD_LENGTH);
pub const SUBTITLE: Field = Field::text("subtitle", 78, MAX_COMMENT_LENGTH);
pub const DATE_START: Field = Field::text("date_start", 140, DATE_LENGTH);
pub const TIME_START: Field = Field::text("time_start", 149, TIME_LENGTH);
pub const DATE_STOP: Field = Field::text("date_stop", 157, DATE_LENGTH);
pub const TIME_STOP: Field = Field::text("time_stop", 166, TIME_LENGTH);
pub const TARGET_BIN_COUNT: Field = Field::scalar("target_bin_count", 176, FieldKind::I32);
pub const TARGET_BIN_OFFSET: Field = Field::scalar("target_bin_offset", 180, FieldKind::I32);
pub const DETECTOR_COUNT: Field = Field::scalar("detector_count", 184, FieldKind::I32);
pub const DETECTOR_SELECTION: Field = Field::text("detector_selection", 188, SELECTION_LENGTH);

// Settings preamble
pub const RESOLUTION_CODE: Field = Field::scalar("resolution_code", 0, FieldKind::U16);

// Tag record, relative to the start of the record
pub const TAG_LABEL: Field = Field::text("tag_label", 0, TAG_LABEL_LENGTH);
pub const TAG_SIGNAL: Field = Field::scalar("tag_signal", 10, FieldKind::U16);
pub const TAG_RAW_FIRST: Field = Field::scalar("tag_raw_first", 12, FieldKind::I32);
pub const TAG_RAW_LAST: Field = Field::scalar("tag_raw_last", 16, FieldKind::I32);
pub const TAG_BINNED_FIRST: Field = Field::scalar("tag_binned_first", 20, FieldKind::I32);
pub const TAG_BINNED_LAST: Field = Field::scalar("tag_binned_last", 24, FieldKind::I32);
pub const TAG_T0: Field = Field::scalar("tag_t0", 28, FieldKind::I32);
pub const TAG_FIRST_GOOD: Field = Field::scalar("tag_first_good", 32, FieldKind::I32);
pub const TAG_LAST_GOOD: Field = Field::scalar("tag_last_good", 36, FieldKind::I32);

// Statistics block
pub const STAT_TOTAL_EVENTS: Field = Field::scalar("total_events", 0, FieldKind::I32);
/// Interleaved (mean, deviation) pairs
pub const STAT_TEMPERATURES: Field = Field::array("temperatures", 4, FieldKind::F32, 2 * MAX_TEMPER);

fn stat_scalers(tags: usize) -> Field {
    Field::array("scalers", MDU_STATISTICS_FIXED, FieldKind::I32, tags)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    Unused,
    Positron,
    Muon,
    Other,
}

impl From<u16> for SignalType {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Unused,
            1 => Self::Positron,
            2 => Self::Muon,
            _ => Self::Other,
        }
    }
}

/// One channel of the settings block
#[derive(Debug, Clone, PartialEq)]
pub struct TagRecord {
    pub label: String,
    pub signal: SignalType,
    pub raw_first: i32,
    pub raw_last: i32,
    pub binned_first: i32,
    pub binned_last: i32,
    pub t0: i32,
    pub first_good: i32,
    pub last_good: i32,
}

impl TagRecord {
    fn read(record: &[u8]) -> Result<Self, CodecError> {
        let fields = FieldReader::new(record);
        Ok(Self {
            label: fields.text(&TAG_LABEL)?,
            signal: SignalType::from(fields.get::<u16>(&TAG_SIGNAL)?),
            raw_first: fields.get(&TAG_RAW_FIRST)?,
            raw_last: fields.get(&TAG_RAW_LAST)?,
            binned_first: fields.get(&TAG_BINNED_FIRST)?,
            binned_last: fields.get(&TAG_BINNED_LAST)?,
            t0: fields.get(&TAG_T0)?,
            first_good: fields.get(&TAG_FIRST_GOOD)?,
            last_good: fields.get(&TAG_LAST_GOOD)?,
        })
    }
}

/// Bin width of the stored data and the ratio between raw and stored bins
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeResolution {
    pub factor: i32,
    pub bin_width_us: f64,
}

impl TimeResolution {
    pub fn from_code(variant: MduVariant, code: u16) -> Result<Self, CodecError> {
        match variant {
            MduVariant::PtaM3 => {
                if code > PTA_MAX_TIMESPAN_CODE {
                    return Err(CodecError::HeaderReadFailed(format!(
                        "unknown pTA timespan code {code}"
                    )));
                }
                let factor = 1i32 << code;
                Ok(Self {
                    factor,
                    bin_width_us: PTA_BASE_BIN_WIDTH / f64::from(factor),
                })
            }
            MduVariant::TdcT4 | MduVariant::TdcT5 => {
                let (factor, bin_width_us) = match code {
                    25 => (32, 0.0000244140625),
                    100 => (8, 0.00009765625),
                    200 => (4, 0.0001953125),
                    800 => (1, 0.00078125),
                    _ => {
                        return Err(CodecError::HeaderReadFailed(format!(
                            "unknown TDC resolution code {code}"
                        )))
                    }
                };
                Ok(Self {
                    factor,
                    bin_width_us,
                })
            }
        }
    }

    /// Raw bin of the start of a range to stored units, None when it does not fit in 32 bits
    pub fn convert_start(&self, raw: i32) -> Option<i32> {
        raw.checked_add(1)?.checked_mul(self.factor)?.checked_sub(1)
    }

    /// Raw bin of the end of a range to stored units, None when it does not fit in 32 bits
    pub fn convert_end(&self, raw: i32) -> Option<i32> {
        raw.checked_mul(self.factor)
    }
}

/// Parse the space separated, 1-based detector selection into 0-based channel indices
pub fn parse_selection(text: &str) -> BitSet {
    let mut selection = BitSet::new();
    for token in text.split_whitespace() {
        match token.parse::<usize>() {
            Ok(number) if number > 0 => {
                selection.insert(number - 1);
            }
            _ => spdlog::warn!("Ignoring detector selection entry {token:?}"),
        }
    }
    selection
}

fn expect_size(name: &str, declared: u32, expected: usize) -> Result<(), CodecError> {
    if declared as usize != expected {
        return Err(CodecError::HistogramCountInvalid(format!(
            "{name} is {declared} bytes, expected {expected}"
        )));
    }
    Ok(())
}

/// Sum of the bins strictly between first and last good
fn good_events(row: &[i32], first_good: i32, last_good: i32) -> i64 {
    let start = (i64::from(first_good) + 1).max(0) as usize;
    let end = (last_good.max(0) as usize).min(row.len());
    if start >= end {
        return 0;
    }
    row[start..end].iter().map(|v| i64::from(*v)).sum()
}

/// Decode an MDU file
pub fn read_mdu(path: &Path) -> Result<DecodedRun, CodecError> {
    let file = File::open(path).map_err(|source| CodecError::OpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    if let Ok(meta) = file.metadata() {
        spdlog::info!(
            "Reading MDU file {} ({})",
            path.to_string_lossy(),
            human_bytes::human_bytes(meta.len() as f64)
        );
    }
    decode_mdu(&mut BufReader::new(file))
}

/// Decode an MDU stream positioned at the start of the general header
pub fn decode_mdu<R: Read>(reader: &mut R) -> Result<DecodedRun, CodecError> {
    let mut header = vec![0u8; MDU_HEADER_SIZE];
    reader
        .read_exact(&mut header)
        .map_err(|e| CodecError::HeaderReadFailed(e.to_string()))?;
    let fields = FieldReader::new(&header);

    let format_id = fields.text(&FORMAT_ID)?;
    let variant = match FileFormat::from_str(&format_id)? {
        FileFormat::Mdu(variant) => variant,
        FileFormat::PsiBin => return Err(CodecError::UnsupportedFormatVersion(format_id)),
    };
    let header_size = fields.get::<u32>(&NUM_BYTES_HEADER)?;
    if header_size as usize != MDU_HEADER_SIZE {
        return Err(CodecError::HeaderReadFailed(format!(
            "general header declares {header_size} bytes, expected {MDU_HEADER_SIZE}"
        )));
    }
    let tags = usize::from(fields.get::<u16>(&NUMBER_TAGS)?);
    if tags != variant.tag_count() {
        return Err(CodecError::HistogramCountInvalid(format!(
            "{} file declares {tags} tags, expected {}",
            variant.tag(),
            variant.tag_count()
        )));
    }
    let settings_size = MDU_SETTINGS_PREAMBLE + tags * MDU_TAG_SIZE;
    let statistics_size = MDU_STATISTICS_FIXED + tags * 4;
    expect_size("tag record", fields.get(&NUM_BYTES_TAG)?, MDU_TAG_SIZE)?;
    expect_size("settings block", fields.get(&NUM_BYTES_SETTINGS)?, settings_size)?;
    expect_size(
        "statistics block",
        fields.get(&NUM_BYTES_STATISTICS)?,
        statistics_size,
    )?;
    let target_bins = fields.get::<i32>(&TARGET_BIN_COUNT)?;
    spdlog::info!(
        "MDU {} version {}: {target_bins} target bins at offset {}, {} detectors",
        variant.tag(),
        fields.get::<u16>(&FORMAT_VERSION)?,
        fields.get::<i32>(&TARGET_BIN_OFFSET)?,
        fields.get::<i32>(&DETECTOR_COUNT)?
    );

    let mut run = RunIdentity::default();
    run.set_format_id(&format_id);
    run.set_run_number(fields.get(&RUN_NUMBER)?);
    run.set_sample(&fields.text(&SAMPLE)?);
    run.set_temperature(&fields.text(&TEMPERATURE)?);
    run.set_field(&fields.text(&FIELD)?);
    run.set_orientation(&fields.text(&ORIENTATION)?);
    run.set_setup(&fields.text(&SETUP)?);
    run.set_comment(&fields.text(&SUBTITLE)?);
    run.set_time_start(&fields.text(&DATE_START)?, &fields.text(&TIME_START)?);
    run.set_time_stop(&fields.text(&DATE_STOP)?, &fields.text(&TIME_STOP)?);

    let selection = match variant {
        MduVariant::PtaM3 => {
            let parsed = parse_selection(&fields.text(&DETECTOR_SELECTION)?);
            if parsed.is_empty() {
                spdlog::warn!("M3 header has no detector selection, every channel is counted");
                None
            } else {
                Some(parsed)
            }
        }
        _ => None,
    };

    let mut settings = vec![0u8; settings_size];
    reader
        .read_exact(&mut settings)
        .map_err(|e| CodecError::HeaderReadFailed(format!("settings block: {e}")))?;
    let resolution = TimeResolution::from_code(
        variant,
        FieldReader::new(&settings).get::<u16>(&RESOLUTION_CODE)?,
    )?;
    let tag_records = settings[MDU_SETTINGS_PREAMBLE..]
        .chunks_exact(MDU_TAG_SIZE)
        .map(TagRecord::read)
        .collect::<Result<Vec<_>, _>>()?;

    let mut statistics = vec![0u8; statistics_size];
    reader
        .read_exact(&mut statistics)
        .map_err(|e| CodecError::HeaderReadFailed(format!("statistics block: {e}")))?;
    let stats = FieldReader::new(&statistics);
    let logged_total = stats.get::<i32>(&STAT_TOTAL_EVENTS)?;
    let temperature_pairs = stats.get_array::<f32>(&STAT_TEMPERATURES)?;
    let scaler_counts = stats.get_array::<i32>(&stat_scalers(tags))?;

    // Histograms
    let mut rows: Vec<Vec<i32>> = Vec::new();
    let mut metas: Vec<HistogramMeta> = Vec::new();
    let mut common_length: Option<usize> = None;
    let mut total_events = 0i64;
    for (channel, tag) in tag_records.iter().enumerate() {
        if tag.signal != SignalType::Positron {
            continue;
        }
        if tag.binned_first < 0 || tag.binned_last < tag.binned_first {
            return Err(CodecError::DataReadFailed(format!(
                "tag {channel} has invalid binned range {}..={}",
                tag.binned_first, tag.binned_last
            )));
        }
        if target_bins > 0 && tag.binned_last >= target_bins {
            return Err(CodecError::DataReadFailed(format!(
                "tag {channel} ends at bin {}, beyond the {target_bins} target bins",
                tag.binned_last
            )));
        }
        let first = tag.binned_first as usize;
        let last = tag.binned_last as usize;

        // Only allocate what the stream actually holds
        let wanted = (last - first + 1) as u64 * 4;
        let mut raw = Vec::new();
        reader
            .by_ref()
            .take(wanted)
            .read_to_end(&mut raw)
            .map_err(|e| CodecError::DataReadFailed(format!("tag {channel}: {e}")))?;
        if (raw.len() as u64) < wanted {
            return Err(CodecError::DataReadFailed(format!(
                "tag {channel}: expected {wanted} bytes of data, found {}",
                raw.len()
            )));
        }
        let mut row: Vec<i32> = Vec::new();
        row.try_reserve_exact(last + 1)
            .map_err(|e| CodecError::AllocationFailed(format!("tag {channel}, {} bins: {e}", last + 1)))?;
        row.resize(first, 0);
        row.extend(raw.chunks_exact(4).map(LittleEndian::read_i32));

        let length = *common_length.get_or_insert(row.len());
        if row.len() != length {
            spdlog::warn!(
                "Tag {channel} ({}) has {} bins, histograms are {length} bins long; data clipped or padded",
                tag.label,
                row.len()
            );
            row.resize(length, 0);
        }

        let (Some(first_good), Some(last_good)) = (
            resolution.convert_start(tag.first_good),
            resolution.convert_end(tag.last_good),
        ) else {
            return Err(CodecError::DataReadFailed(format!(
                "tag {channel} good range {}..{} overflows at factor {}",
                tag.first_good, tag.last_good, resolution.factor
            )));
        };
        let t0 = resolution.convert_start(tag.t0);
        if t0.is_none() {
            spdlog::warn!(
                "Tag {channel} ({}) t0 {} overflows at factor {}, t0 treated as absent",
                tag.label,
                tag.t0,
                resolution.factor
            );
        }
        let events = good_events(&row, first_good, last_good);
        let selected = selection.as_ref().map_or(true, |s| s.contains(channel));
        let mut label = tag.label.clone();
        if selected {
            total_events += events;
        } else {
            label.push_str("**");
        }
        metas.push(HistogramMeta {
            label,
            t0,
            real_t0: None,
            first_good,
            last_good,
            events,
        });
        rows.push(row);
    }
    if rows.is_empty() {
        spdlog::error!("MDU file contains no positron histograms");
        return Err(CodecError::HistogramCountInvalid(String::from(
            "no positron channels",
        )));
    }
    if rows.len() > MAX_HISTO {
        spdlog::warn!(
            "{} positron histograms exceed the PSI-BIN limit of {MAX_HISTO}",
            rows.len()
        );
    }

    let mut store = HistogramStore::from_rows(&rows)?;
    for (idx, meta) in metas.into_iter().enumerate() {
        if let Some(slot) = store.meta_mut(idx) {
            *slot = meta;
        }
    }
    store.set_total_events(total_events);
    store.set_bin_width_us(resolution.bin_width_us);
    store.set_scalers(
        tag_records
            .iter()
            .zip(scaler_counts.iter())
            .map(|(tag, count)| Scaler::new(&tag.label, i64::from(*count)))
            .collect(),
    );
    store.set_temperatures(
        temperature_pairs
            .chunks_exact(2)
            .map(|pair| TemperatureReading::new(f64::from(pair[0]), f64::from(pair[1])))
            .collect(),
    );
    if i64::from(logged_total) != total_events {
        spdlog::info!(
            "Logged total of {logged_total} events differs from {total_events} events in the good ranges"
        );
    }

    spdlog::info!(
        "Decoded MDU run {} with {} histograms of {} bins",
        run.run_number(),
        store.number_histo(),
        store.length_histo()
    );
    Ok(DecodedRun { run, store })
}
