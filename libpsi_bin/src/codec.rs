use serde::Serialize;
use std::path::{Path, PathBuf};

use super::consistency;
use super::error::CodecError;
use super::format::FileFormat;
use super::histogram::{HistogramMeta, HistogramStore};
use super::mdu::read_mdu;
use super::psi_bin::{read_psi_bin, write_psi_bin};
use super::rebin::{put_histograms, RebinPolicy};
use super::run_info::{RunIdentity, Scaler, TemperatureReading};

const STATUS_NONE: &str = "NONE";
const STATUS_SUCCESS: &str = "SUCCESS";

/// Everything a decoder produces for one file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRun {
    pub run: RunIdentity,
    pub store: HistogramStore,
}

/// Serializable summary of a decoded file, used by the dump tool
#[derive(Debug, Clone, Serialize)]
pub struct HeaderDump {
    pub filename: String,
    pub format: String,
    pub run: RunIdentity,
    pub start_datetime: Option<String>,
    pub stop_datetime: Option<String>,
    pub field_gauss: Option<f64>,
    pub number_histo: usize,
    pub length_histo: usize,
    pub bin_width_ns: f64,
    pub total_events: i64,
    pub histograms: Vec<HistogramMeta>,
    pub scalers: Vec<Scaler>,
    pub temperatures: Vec<TemperatureReading>,
}

/// One time-differential data file: its run information, its histograms and the status of the
/// last read, write and consistency check.
///
/// A read resets the instance first and only installs the decoded data once the whole file
/// was decoded, so a failed read leaves the reset state behind.
#[derive(Debug, Clone)]
pub struct MusrTdFile {
    filename: Option<PathBuf>,
    format: Option<FileFormat>,
    run: RunIdentity,
    store: HistogramStore,
    read_status: String,
    write_status: String,
    consistency_status: String,
    read_ok: bool,
    write_ok: bool,
    consistency_ok: bool,
}

impl Default for MusrTdFile {
    fn default() -> Self {
        Self {
            filename: None,
            format: None,
            run: RunIdentity::default(),
            store: HistogramStore::new(),
            read_status: String::from(STATUS_NONE),
            write_status: String::from(STATUS_NONE),
            consistency_status: String::from(STATUS_NONE),
            read_ok: false,
            write_ok: false,
            consistency_ok: false,
        }
    }
}

impl MusrTdFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the freshly constructed state
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Decode a PSI-BIN or MDU file, chosen by its format id
    pub fn read(&mut self, path: &Path) -> Result<(), CodecError> {
        self.clear();
        match Self::decode(path) {
            Ok((format, decoded)) => {
                self.filename = Some(path.to_path_buf());
                self.format = Some(format);
                self.run = decoded.run;
                self.store = decoded.store;
                self.read_status = String::from(STATUS_SUCCESS);
                self.read_ok = true;
                Ok(())
            }
            Err(e) => {
                spdlog::error!("Failed to read {}: {e}", path.to_string_lossy());
                self.read_status = e.to_string();
                Err(e)
            }
        }
    }

    fn decode(path: &Path) -> Result<(FileFormat, DecodedRun), CodecError> {
        let format = FileFormat::detect(path)?;
        spdlog::info!("{} has format {format}", path.to_string_lossy());
        let decoded = match format {
            FileFormat::PsiBin => read_psi_bin(path)?,
            FileFormat::Mdu(_) => read_mdu(path)?,
        };
        Ok((format, decoded))
    }

    /// Encode the current contents as a PSI-BIN file
    pub fn write(&mut self, path: &Path) -> Result<(), CodecError> {
        let result = write_psi_bin(path, &self.run, &self.store);
        match &result {
            Ok(()) => {
                self.write_status = String::from(STATUS_SUCCESS);
                self.write_ok = true;
            }
            Err(e) => {
                spdlog::error!("Failed to write {}: {e}", path.to_string_lossy());
                self.write_status = e.to_string();
                self.write_ok = false;
            }
        }
        result
    }

    pub fn check_consistency(&mut self, strict: bool) -> Result<(), CodecError> {
        let result = consistency::check_consistency(&self.store, strict);
        match &result {
            Ok(()) => {
                self.consistency_status = String::from(STATUS_SUCCESS);
                self.consistency_ok = true;
            }
            Err(e) => {
                spdlog::warn!("{e}");
                self.consistency_status = e.to_string();
                self.consistency_ok = false;
            }
        }
        result
    }

    /// Replace the histograms, reshaping them to fit the PSI-BIN limits
    pub fn put_histograms(&mut self, histos: &[Vec<i32>], policy: RebinPolicy) -> Result<(), CodecError> {
        put_histograms(&mut self.store, histos, policy)
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn format(&self) -> Option<FileFormat> {
        self.format
    }

    pub fn read_status(&self) -> &str {
        &self.read_status
    }

    pub fn write_status(&self) -> &str {
        &self.write_status
    }

    pub fn consistency_status(&self) -> &str {
        &self.consistency_status
    }

    pub fn read_ok(&self) -> bool {
        self.read_ok
    }

    pub fn write_ok(&self) -> bool {
        self.write_ok
    }

    pub fn consistency_ok(&self) -> bool {
        self.consistency_ok
    }

    pub fn run(&self) -> &RunIdentity {
        &self.run
    }

    pub fn run_mut(&mut self) -> &mut RunIdentity {
        &mut self.run
    }

    pub fn store(&self) -> &HistogramStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut HistogramStore {
        &mut self.store
    }

    /// Time resolution in ns
    pub fn time_resolution(&self) -> f64 {
        self.store.bin_width_ns()
    }

    /// Up to two temperatures for downstream run data. The first two logged readings are
    /// used when both are non zero, otherwise the title temperature with zero error.
    pub fn consumer_temperatures(&self) -> Vec<TemperatureReading> {
        let logged = self.store.temperatures();
        if logged.len() >= 2 && logged[0].mean != 0.0 && logged[1].mean != 0.0 {
            return logged[..2].to_vec();
        }
        match self.run.temperature_value() {
            Some(kelvin) => vec![TemperatureReading::new(kelvin, 0.0)],
            None => {
                spdlog::warn!("No usable temperature in {:?}", self.run.temperature());
                Vec::new()
            }
        }
    }

    /// (first good, last good) for every histogram
    pub fn good_bins(&self) -> Vec<(i32, i32)> {
        self.store
            .metas()
            .iter()
            .map(|m| (m.first_good, m.last_good))
            .collect()
    }

    pub fn header_dump(&self) -> HeaderDump {
        HeaderDump {
            filename: self
                .filename
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
            format: self.format.map(|f| f.to_string()).unwrap_or_default(),
            run: self.run.clone(),
            start_datetime: self.run.start_datetime().map(|dt| dt.to_string()),
            stop_datetime: self.run.stop_datetime().map(|dt| dt.to_string()),
            field_gauss: self.run.field_value(),
            number_histo: self.store.number_histo(),
            length_histo: self.store.length_histo(),
            bin_width_ns: self.store.bin_width_ns(),
            total_events: self.store.total_events(),
            histograms: self.store.metas().to_vec(),
            scalers: self.store.scalers().to_vec(),
            temperatures: self.store.temperatures().to_vec(),
        }
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_file() -> MusrTdFile {
        let mut file = MusrTdFile::new();
        let run = file.run_mut();
        run.set_run_number(815);
        run.set_sample("MnSi");
        run.set_temperature("28.5 K");
        run.set_comment("helimagnet");
        let rows: Vec<Vec<i32>> = (0..4)
            .map(|h| (0..3000).map(|j| (3000 - j) * (h + 1) / 10).collect())
            .collect();
        file.store_mut().set_bin_width_ns(0.78125);
        file.put_histograms(&rows, RebinPolicy::Truncate).unwrap();
        for h in 0..4 {
            file.store_mut().set_t0(h, 120).unwrap();
            file.store_mut().set_first_good(h, 130).unwrap();
            file.store_mut().set_last_good(h, 2900).unwrap();
        }
        file
    }

    #[test]
    fn test_truncate_round_trip_preserves_counts() {
        let mut original = sample_file();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run0815.bin");
        original.check_consistency(false).unwrap();
        assert!(original.consistency_ok());
        original.write(&path).unwrap();
        assert_eq!(original.write_status(), "SUCCESS");

        let mut decoded = MusrTdFile::new();
        decoded.read(&path).unwrap();
        assert!(decoded.read_ok());
        assert_eq!(decoded.format(), Some(FileFormat::PsiBin));
        assert_eq!(decoded.filename(), Some(path.as_path()));
        assert_eq!(decoded.store().grid(), original.store().grid());
        assert_eq!(decoded.run().sample(), "MnSi");
        assert_eq!(decoded.good_bins(), vec![(130, 2900); 4]);
        assert!((decoded.time_resolution() - 0.78125).abs() < 1e-6);

        // A second pass through the transform keeps the overlapping counts
        let rows: Vec<Vec<i32>> = (0..4)
            .map(|h| decoded.store().histo_array_int(h).unwrap())
            .collect();
        decoded.put_histograms(&rows, RebinPolicy::Truncate).unwrap();
        let second = dir.path().join("again.bin");
        decoded.write(&second).unwrap();
        let mut again = MusrTdFile::new();
        again.read(&second).unwrap();
        assert_eq!(again.store().grid(), original.store().grid());
    }

    #[test]
    fn test_unknown_format_resets_instance() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.bin");
        let mut file = sample_file();
        file.write(&good).unwrap();
        file.read(&good).unwrap();
        assert!(!file.store().is_empty());

        let bad = dir.path().join("bad.bin");
        std::fs::File::create(&bad)
            .unwrap()
            .write_all(b"XX and some bytes")
            .unwrap();
        let err = file.read(&bad).unwrap_err();
        assert_eq!(err.code(), 3);
        assert!(!file.read_ok());
        assert!(file.read_status().contains("XX"));
        assert!(file.store().is_empty());
        assert_eq!(file.run(), &RunIdentity::default());
        assert_eq!(file.filename(), None);

        let missing = dir.path().join("missing.bin");
        assert_eq!(file.read(&missing).unwrap_err().code(), 1);
    }

    #[test]
    fn test_write_rejects_inconsistent_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("too_big.bin");
        let mut file = MusrTdFile::new();
        file.store_mut().set_grid(ndarray::Array2::zeros((16, 4097)));
        assert!(file.check_consistency(false).is_err());
        assert!(file.consistency_status().contains("65552"));
        assert_eq!(file.write(&path).unwrap_err().code(), 8);
        assert!(!file.write_ok());
        assert!(!path.exists());
    }

    #[test]
    fn test_consumer_temperatures() {
        let mut file = sample_file();
        assert_eq!(
            file.consumer_temperatures(),
            vec![TemperatureReading::new(28.5, 0.0)]
        );
        file.store_mut().set_temperatures(vec![
            TemperatureReading::new(28.4, 0.1),
            TemperatureReading::new(28.6, 0.2),
            TemperatureReading::new(3.0, 0.0),
        ]);
        assert_eq!(file.consumer_temperatures().len(), 2);
        assert_eq!(file.consumer_temperatures()[1].deviation, 0.2);

        file.run_mut().set_time_start("01-FEB-24", "10:20:30");
        let dump = file.header_dump();
        assert_eq!(dump.number_histo, 4);
        assert_eq!(dump.start_datetime.as_deref(), Some("2024-02-01 10:20:30.0"));
        assert_eq!(dump.stop_datetime, None);
        let yaml = serde_yaml::to_string(&dump).unwrap();
        assert!(yaml.contains("sample: MnSi"));
    }

    #[test]
    fn test_mdu_file_routes_to_mdu_decoder() {
        use crate::format::MduVariant;
        use crate::mdu::tests::{build_mdu, positron};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deltat_tdc_lem_0042.mdu");
        let bytes = build_mdu(
            "T5",
            800,
            "",
            vec![
                positron("left", (0, 7), vec![4; 8]),
                positron("rght", (1, 7), vec![2; 7]),
            ],
        );
        std::fs::write(&path, bytes).unwrap();

        let mut file = MusrTdFile::new();
        file.read(&path).unwrap();
        assert!(file.read_ok());
        assert_eq!(file.format(), Some(FileFormat::Mdu(MduVariant::TdcT5)));
        assert_eq!(file.run().format_id(), "T5");
        assert_eq!(file.store().number_histo(), 2);
        assert_eq!(file.store().histo_array_int(0), Some(vec![4; 8]));
        assert_eq!(
            file.store().histo_array_int(1),
            Some(vec![0, 2, 2, 2, 2, 2, 2, 2])
        );
        assert_eq!(file.store().number_scaler(), 32);
        assert!((file.time_resolution() - 0.78125).abs() < 1e-9);
    }

    #[test]
    fn test_failed_decode_resets_instance() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.bin");
        let mut file = sample_file();
        file.write(&good).unwrap();
        file.read(&good).unwrap();
        assert!(!file.store().is_empty());

        let bytes = std::fs::read(&good).unwrap();
        let truncated = dir.path().join("truncated.bin");
        std::fs::write(&truncated, &bytes[..bytes.len() - 100]).unwrap();
        let err = file.read(&truncated).unwrap_err();
        assert_eq!(err.code(), 7);
        assert!(!file.read_ok());
        assert!(file.store().is_empty());
        assert_eq!(file.run(), &RunIdentity::default());
        assert_eq!(file.format(), None);
    }
}
