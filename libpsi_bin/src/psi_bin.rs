//! The PSI-BIN layout: a 1024 byte header at fixed offsets followed by the histogram
//! payload, stored in physical records of `lendaf` 32-bit bins.
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::codec::DecodedRun;
use super::consistency::check_consistency;
use super::constants::*;
use super::error::CodecError;
use super::histogram::{HistogramMeta, HistogramStore};
use super::layout::{Field, FieldKind, FieldReader, FieldWriter};
use super::run_info::{RunIdentity, Scaler, TemperatureReading};

const SLOTS: usize = PSI_BIN_HEADER_HISTO_SLOTS;
const LOW_SCALERS: usize = 6;
const HIGH_SCALERS: usize = MAX_PSI_BIN_SCALER - LOW_SCALERS;

pub const FORMAT_ID: Field = Field::text("format_id", 0, 2);
pub const TDC_RESOLUTION: Field = Field::scalar("tdc_resolution", 2, FieldKind::I16);
pub const TDC_OVERFLOW: Field = Field::scalar("tdc_overflow", 4, FieldKind::I16);
pub const RUN_NUMBER: Field = Field::scalar("run_number", 6, FieldKind::I16);
pub const LENGTH_HISTO: Field = Field::scalar("length_histo", 28, FieldKind::I16);
pub const NUMBER_HISTO: Field = Field::scalar("number_histo", 30, FieldKind::I16);
pub const NUMDAF: Field = Field::scalar("numdaf", 128, FieldKind::I16);
pub const LENDAF: Field = Field::scalar("lendaf", 130, FieldKind::I16);
pub const KDAFHI: Field = Field::scalar("kdafhi", 132, FieldKind::I16);
pub const KHIDAF: Field = Field::scalar("khidaf", 134, FieldKind::I16);
pub const SAMPLE: Field = Field::text("sample", 138, MAX_TITLE_FIELD_LENGTH);
pub const TEMPERATURE: Field = Field::text("temperature", 148, MAX_TITLE_FIELD_LENGTH);
pub const FIELD: Field = Field::text("field", 158, MAX_TITLE_FIELD_LENGTH);
pub const ORIENTATION: Field = Field::text("orientation", 168, MAX_TITLE_FIELD_LENGTH);
pub const SETUP: Field = Field::text("setup", 178, MAX_TITLE_FIELD_LENGTH);
pub const DATE_START: Field = Field::text("date_start", 218, DATE_LENGTH);
pub const DATE_STOP: Field = Field::text("date_stop", 227, DATE_LENGTH);
pub const TIME_START: Field = Field::text("time_start", 236, TIME_LENGTH);
pub const TIME_STOP: Field = Field::text("time_stop", 244, TIME_LENGTH);
pub const EVENTS_PER_HISTO: Field = Field::array("events_per_histo", 296, FieldKind::I32, SLOTS);
pub const SCALERS_HIGH: Field = Field::array("scalers_6_17", 360, FieldKind::I32, HIGH_SCALERS);
pub const TOTAL_EVENTS: Field = Field::scalar("total_events", 424, FieldKind::I32);
pub const T0: Field = Field::array("t0", 458, FieldKind::I16, SLOTS);
pub const FIRST_GOOD: Field = Field::array("first_good", 490, FieldKind::I16, SLOTS);
pub const LAST_GOOD: Field = Field::array("last_good", 522, FieldKind::I16, SLOTS);
pub const SCALER_LABELS_HIGH: Field = Field::array(
    "scaler_labels_6_17",
    554,
    FieldKind::Text(MAX_LABEL_LENGTH),
    HIGH_SCALERS,
);
pub const SCALERS_LOW: Field = Field::array("scalers_0_5", 670, FieldKind::I32, LOW_SCALERS);
pub const TEMPERATURES: Field = Field::array("temperatures", 716, FieldKind::F32, MAX_TEMPER);
pub const TEMPERATURE_DEVIATIONS: Field =
    Field::array("temperature_deviations", 738, FieldKind::F32, MAX_TEMPER);
pub const REAL_T0: Field = Field::array("real_t0", 792, FieldKind::F32, SLOTS);
pub const COMMENT: Field = Field::text("comment", 860, MAX_COMMENT_LENGTH);
pub const SCALER_LABELS_LOW: Field = Field::array(
    "scaler_labels_0_5",
    924,
    FieldKind::Text(MAX_LABEL_LENGTH),
    LOW_SCALERS,
);
pub const HISTO_LABELS: Field =
    Field::array("histo_labels", 948, FieldKind::Text(MAX_LABEL_LENGTH), SLOTS);
pub const BIN_WIDTH: Field = Field::scalar("bin_width", 1012, FieldKind::F32);

/// Every field of the header, in offset order
pub const HEADER_LAYOUT: [Field; 33] = [
    FORMAT_ID,
    TDC_RESOLUTION,
    TDC_OVERFLOW,
    RUN_NUMBER,
    LENGTH_HISTO,
    NUMBER_HISTO,
    NUMDAF,
    LENDAF,
    KDAFHI,
    KHIDAF,
    SAMPLE,
    TEMPERATURE,
    FIELD,
    ORIENTATION,
    SETUP,
    DATE_START,
    DATE_STOP,
    TIME_START,
    TIME_STOP,
    EVENTS_PER_HISTO,
    SCALERS_HIGH,
    TOTAL_EVENTS,
    T0,
    FIRST_GOOD,
    LAST_GOOD,
    SCALER_LABELS_HIGH,
    SCALERS_LOW,
    TEMPERATURES,
    TEMPERATURE_DEVIATIONS,
    REAL_T0,
    COMMENT,
    SCALER_LABELS_LOW,
    HISTO_LABELS,
];

/// Record geometry of the histogram payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordGeometry {
    /// Number of data records in the file (numdaf)
    pub num_records: usize,
    /// Record length in bins (lendaf)
    pub record_length: usize,
    /// Records per histogram (kdafhi)
    pub records_per_histo: usize,
}

impl RecordGeometry {
    /// Geometry used when writing: every histogram gets whole records of MAX_REC bins
    pub fn for_writing(number_histo: usize, length_histo: usize) -> Self {
        let records_per_histo = length_histo.div_ceil(MAX_REC);
        Self {
            num_records: number_histo * records_per_histo,
            record_length: MAX_REC,
            records_per_histo,
        }
    }

    pub fn payload_bins(&self) -> usize {
        self.num_records * self.record_length
    }

    pub fn histo_start(&self, histo: usize) -> usize {
        histo * self.records_per_histo * self.record_length
    }

    fn validate(&self, number_histo: usize, length_histo: usize) -> Result<(), CodecError> {
        if self.record_length == 0 || self.records_per_histo == 0 {
            return Err(CodecError::DataReadFailed(format!(
                "invalid record geometry {self:?}"
            )));
        }
        if self.records_per_histo * self.record_length < length_histo {
            return Err(CodecError::DataReadFailed(format!(
                "{} records of {} bins cannot hold a histogram of {length_histo} bins",
                self.records_per_histo, self.record_length
            )));
        }
        if self.num_records < number_histo * self.records_per_histo {
            return Err(CodecError::DataReadFailed(format!(
                "{} records cannot hold {number_histo} histograms",
                self.num_records
            )));
        }
        Ok(())
    }
}

fn positive(value: i16) -> usize {
    value.max(0) as usize
}

fn saturate_i32(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

fn to_i16(name: &str, value: i32) -> Result<i16, CodecError> {
    i16::try_from(value).map_err(|_| {
        CodecError::ConsistencyViolation(format!("{name} {value} does not fit into 16 bits"))
    })
}

/// Decode a PSI-BIN file
pub fn read_psi_bin(path: &Path) -> Result<DecodedRun, CodecError> {
    let file = File::open(path).map_err(|source| CodecError::OpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    if let Ok(meta) = file.metadata() {
        spdlog::info!(
            "Reading PSI-BIN file {} ({})",
            path.to_string_lossy(),
            human_bytes::human_bytes(meta.len() as f64)
        );
    }
    decode_psi_bin(&mut BufReader::new(file))
}

/// Decode a PSI-BIN stream positioned at the start of the header
pub fn decode_psi_bin<R: Read>(reader: &mut R) -> Result<DecodedRun, CodecError> {
    let mut header = vec![0u8; PSI_BIN_HEADER_SIZE];
    reader
        .read_exact(&mut header)
        .map_err(|e| CodecError::HeaderReadFailed(e.to_string()))?;
    let fields = FieldReader::new(&header);

    let format_id = fields.text(&FORMAT_ID)?;
    if format_id != PSI_BIN_FORMAT_ID {
        return Err(CodecError::UnsupportedFormatVersion(format_id));
    }

    let number_histo = fields.get::<i16>(&NUMBER_HISTO)?;
    if number_histo < 1 || number_histo as usize > MAX_HISTO {
        return Err(CodecError::HistogramCountInvalid(format!(
            "header declares {number_histo} histograms"
        )));
    }
    let number_histo = number_histo as usize;
    let length_histo = fields.get::<i16>(&LENGTH_HISTO)?;
    if length_histo < 1 {
        return Err(CodecError::HistogramCountInvalid(format!(
            "header declares histograms of {length_histo} bins"
        )));
    }
    let length_histo = length_histo as usize;

    let histos_per_record = fields.get::<i16>(&KHIDAF)?;
    if histos_per_record != 1 {
        spdlog::error!("Number of histograms/record not equal to 1, the required algorithm is not implemented!");
        return Err(CodecError::UnsupportedRecordGeometry(histos_per_record));
    }
    let geometry = RecordGeometry {
        num_records: positive(fields.get::<i16>(&NUMDAF)?),
        record_length: positive(fields.get::<i16>(&LENDAF)?),
        records_per_histo: positive(fields.get::<i16>(&KDAFHI)?),
    };
    geometry.validate(number_histo, length_histo)?;

    let mut run = RunIdentity::default();
    run.set_format_id(&format_id);
    run.set_run_number(i32::from(fields.get::<i16>(&RUN_NUMBER)?));
    run.set_sample(&fields.text(&SAMPLE)?);
    run.set_temperature(&fields.text(&TEMPERATURE)?);
    run.set_field(&fields.text(&FIELD)?);
    run.set_orientation(&fields.text(&ORIENTATION)?);
    run.set_setup(&fields.text(&SETUP)?);
    run.set_comment(&fields.text(&COMMENT)?);
    run.set_time_start(&fields.text(&DATE_START)?, &fields.text(&TIME_START)?);
    run.set_time_stop(&fields.text(&DATE_STOP)?, &fields.text(&TIME_STOP)?);

    let mut bin_width = f64::from(fields.get::<f32>(&BIN_WIDTH)?);
    if bin_width == 0.0 {
        let code = fields.get::<i16>(&TDC_RESOLUTION)?;
        bin_width = TDC_BASE_BIN_WIDTH * 2f64.powi(i32::from(code));
        spdlog::info!("Bin width reconstructed from TDC resolution code {code}: {bin_width} us");
    }

    // Payload
    let payload_bins = geometry.payload_bins();
    let mut payload: Vec<i32> = Vec::new();
    payload
        .try_reserve_exact(payload_bins)
        .map_err(|e| CodecError::AllocationFailed(format!("{payload_bins} bins: {e}")))?;
    payload.resize(payload_bins, 0);
    reader
        .read_i32_into::<LittleEndian>(&mut payload)
        .map_err(|e| CodecError::DataReadFailed(e.to_string()))?;

    let rows: Vec<Vec<i32>> = (0..number_histo)
        .map(|histo| {
            let start = geometry.histo_start(histo);
            payload[start..start + length_histo].to_vec()
        })
        .collect();
    let mut store = HistogramStore::from_rows(&rows)?;
    store.set_bin_width_us(bin_width);
    store.set_total_events(i64::from(fields.get::<i32>(&TOTAL_EVENTS)?));

    let t0_present = fields.get_at::<i16>(&T0, 0)? != T0_ABSENT;
    if !t0_present {
        spdlog::warn!("PSI-BIN header carries no t0 information");
    }
    if number_histo > SLOTS {
        spdlog::warn!(
            "Header only describes {SLOTS} histograms; histograms {SLOTS}..{number_histo} get default metadata"
        );
    }
    for histo in 0..number_histo.min(SLOTS) {
        let meta = HistogramMeta {
            label: fields.text_at(&HISTO_LABELS, histo)?,
            t0: t0_present
                .then(|| fields.get_at::<i16>(&T0, histo).map(i32::from))
                .transpose()?,
            real_t0: t0_present
                .then(|| fields.get_at::<f32>(&REAL_T0, histo).map(f64::from))
                .transpose()?,
            first_good: i32::from(fields.get_at::<i16>(&FIRST_GOOD, histo)?),
            last_good: i32::from(fields.get_at::<i16>(&LAST_GOOD, histo)?),
            events: i64::from(fields.get_at::<i32>(&EVENTS_PER_HISTO, histo)?),
        };
        if let Some(slot) = store.meta_mut(histo) {
            *slot = meta;
        }
    }

    let mut scalers = Vec::with_capacity(MAX_PSI_BIN_SCALER);
    for idx in 0..LOW_SCALERS {
        scalers.push(Scaler::new(
            &fields.text_at(&SCALER_LABELS_LOW, idx)?,
            i64::from(fields.get_at::<i32>(&SCALERS_LOW, idx)?),
        ));
    }
    for idx in 0..HIGH_SCALERS {
        scalers.push(Scaler::new(
            &fields.text_at(&SCALER_LABELS_HIGH, idx)?,
            i64::from(fields.get_at::<i32>(&SCALERS_HIGH, idx)?),
        ));
    }
    if scalers.iter().all(|s| s.label.is_empty()) {
        spdlog::warn!("PSI-BIN header carries no scaler labels");
    }
    store.set_scalers(scalers);

    let means = fields.get_array::<f32>(&TEMPERATURES)?;
    let deviations = fields.get_array::<f32>(&TEMPERATURE_DEVIATIONS)?;
    store.set_temperatures(
        means
            .iter()
            .zip(deviations.iter())
            .map(|(m, d)| TemperatureReading::new(f64::from(*m), f64::from(*d)))
            .collect(),
    );

    spdlog::info!(
        "Decoded run {} with {number_histo} histograms of {length_histo} bins",
        run.run_number()
    );
    Ok(DecodedRun { run, store })
}

/// Fill the 1024 byte PSI-BIN header for a consistent store
pub fn encode_header(run: &RunIdentity, store: &HistogramStore) -> Result<Vec<u8>, CodecError> {
    let number_histo = store.number_histo();
    let length_histo = store.length_histo();
    let geometry = RecordGeometry::for_writing(number_histo, length_histo);

    let mut header = vec![0u8; PSI_BIN_HEADER_SIZE];
    let mut fields = FieldWriter::new(&mut header);
    fields.put_text(&FORMAT_ID, PSI_BIN_FORMAT_ID)?;
    fields.put::<i16>(&TDC_RESOLUTION, TDC_RESOLUTION_UNUSED)?;
    fields.put::<i16>(&TDC_OVERFLOW, 0)?;
    fields.put::<i16>(&RUN_NUMBER, to_i16("run number", run.run_number())?)?;
    fields.put::<i16>(&LENGTH_HISTO, to_i16("histogram length", length_histo as i32)?)?;
    fields.put::<i16>(&NUMBER_HISTO, to_i16("number of histograms", number_histo as i32)?)?;
    fields.put::<i16>(&NUMDAF, to_i16("number of records", geometry.num_records as i32)?)?;
    fields.put::<i16>(&LENDAF, to_i16("record length", geometry.record_length as i32)?)?;
    fields.put::<i16>(
        &KDAFHI,
        to_i16("records per histogram", geometry.records_per_histo as i32)?,
    )?;
    fields.put::<i16>(&KHIDAF, 1)?;

    fields.put_text(&SAMPLE, run.sample())?;
    fields.put_text(&TEMPERATURE, run.temperature())?;
    fields.put_text(&FIELD, run.field())?;
    fields.put_text(&ORIENTATION, run.orientation())?;
    fields.put_text(&SETUP, run.setup())?;
    fields.put_text(&COMMENT, run.comment())?;
    let (date, time) = run.time_start();
    fields.put_text(&DATE_START, date)?;
    fields.put_text(&TIME_START, time)?;
    let (date, time) = run.time_stop();
    fields.put_text(&DATE_STOP, date)?;
    fields.put_text(&TIME_STOP, time)?;

    fields.put::<i32>(&TOTAL_EVENTS, saturate_i32(store.total_events()))?;
    fields.put::<f32>(&BIN_WIDTH, store.bin_width_us() as f32)?;

    if number_histo > SLOTS {
        spdlog::warn!(
            "Only the metadata of the first {SLOTS} of {number_histo} histograms can be written"
        );
    }
    let t0_present = store.t0(0).is_some();
    for (histo, meta) in store.metas().iter().take(SLOTS).enumerate() {
        fields.put_text_at(&HISTO_LABELS, histo, &meta.label)?;
        fields.put_at::<i32>(&EVENTS_PER_HISTO, histo, saturate_i32(meta.events))?;
        let t0 = meta.t0.unwrap_or(0);
        fields.put_at::<i16>(&T0, histo, to_i16("t0", t0)?)?;
        let real_t0 = meta.real_t0.unwrap_or(store.bin_width_us() * f64::from(t0));
        fields.put_at::<f32>(&REAL_T0, histo, real_t0 as f32)?;
        fields.put_at::<i16>(&FIRST_GOOD, histo, to_i16("first good bin", meta.first_good)?)?;
        fields.put_at::<i16>(&LAST_GOOD, histo, to_i16("last good bin", meta.last_good)?)?;
    }
    if !t0_present {
        fields.put_at::<i16>(&T0, 0, T0_ABSENT)?;
    }

    let scalers = store.scalers();
    if scalers.len() > MAX_PSI_BIN_SCALER {
        spdlog::warn!(
            "Only {MAX_PSI_BIN_SCALER} of {} scalers can be written",
            scalers.len()
        );
    }
    for (idx, scaler) in scalers.iter().take(MAX_PSI_BIN_SCALER).enumerate() {
        let count = saturate_i32(scaler.count);
        if idx < LOW_SCALERS {
            fields.put_text_at(&SCALER_LABELS_LOW, idx, &scaler.label)?;
            fields.put_at::<i32>(&SCALERS_LOW, idx, count)?;
        } else {
            fields.put_text_at(&SCALER_LABELS_HIGH, idx - LOW_SCALERS, &scaler.label)?;
            fields.put_at::<i32>(&SCALERS_HIGH, idx - LOW_SCALERS, count)?;
        }
    }

    let temperatures = store.temperatures();
    if temperatures.len() > MAX_TEMPER {
        spdlog::warn!(
            "Only {MAX_TEMPER} of {} temperatures can be written",
            temperatures.len()
        );
    }
    for (idx, reading) in temperatures.iter().take(MAX_TEMPER).enumerate() {
        fields.put_at::<f32>(&TEMPERATURES, idx, reading.mean as f32)?;
        fields.put_at::<f32>(&TEMPERATURE_DEVIATIONS, idx, reading.deviation as f32)?;
    }

    Ok(header)
}

/// Serialize a store as PSI-BIN. The store must pass the (non strict) consistency check.
pub fn encode_psi_bin<W: Write>(
    writer: &mut W,
    run: &RunIdentity,
    store: &HistogramStore,
) -> Result<(), CodecError> {
    check_consistency(store, false)?;
    let header = encode_header(run, store)?;
    write_records(writer, &header, store)
}

fn write_records<W: Write>(
    writer: &mut W,
    header: &[u8],
    store: &HistogramStore,
) -> Result<(), CodecError> {
    writer.write_all(header)?;

    let geometry = RecordGeometry::for_writing(store.number_histo(), store.length_histo());
    let padded_length = geometry.records_per_histo * geometry.record_length;
    for row in store.grid().rows() {
        for value in row.iter() {
            writer.write_i32::<LittleEndian>(*value)?;
        }
        for _ in row.len()..padded_length {
            writer.write_i32::<LittleEndian>(0)?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Write a store to a PSI-BIN file
pub fn write_psi_bin(path: &Path, run: &RunIdentity, store: &HistogramStore) -> Result<(), CodecError> {
    // Nothing is created on disk unless the header can be encoded
    check_consistency(store, false)?;
    let header = encode_header(run, store)?;
    let file = File::create(path).map_err(|source| CodecError::OpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    write_records(&mut writer, &header, store)?;
    spdlog::info!(
        "Wrote PSI-BIN file {} with {} histograms of {} bins",
        path.to_string_lossy(),
        store.number_histo(),
        store.length_histo()
    );
    Ok(())
}
