use super::codec::MusrTdFile;
use super::config::ConvertConfig;
use super::error::ProcessorError;

/// The main loop of psi_bin conversion.
///
/// Decode the input (PSI-BIN or MDU), reshape its histograms to fit the PSI-BIN limits,
/// check the result and write it as PSI-BIN. Returns the written file.
pub fn convert(config: &ConvertConfig) -> Result<MusrTdFile, ProcessorError> {
    config.validate()?;

    let mut file = MusrTdFile::new();
    spdlog::info!("Reading {}...", config.input_path.to_string_lossy());
    file.read(&config.input_path)?;
    spdlog::info!(
        "Read run {} with {} histograms of {} bins",
        file.run().run_number(),
        file.store().number_histo(),
        file.store().length_histo()
    );

    let histos: Vec<Vec<i32>> = (0..file.store().number_histo())
        .filter_map(|h| file.store().histo_array_int(h))
        .collect();
    file.put_histograms(&histos, config.policy)?;
    file.check_consistency(config.strict)?;

    spdlog::info!("Writing {}...", config.output_path.to_string_lossy());
    file.write(&config.output_path)?;
    let size = std::fs::metadata(&config.output_path)?.len();
    spdlog::info!(
        "Done converting, wrote {}",
        human_bytes::human_bytes(size as f64)
    );
    Ok(file)
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::rebin::RebinPolicy;

    #[test]
    fn test_convert_rebins_into_budget() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.bin");
        let output = dir.path().join("output.bin");

        let mut source = MusrTdFile::new();
        source.run_mut().set_run_number(7);
        let rows = vec![vec![3; 8000]; 8];
        source.put_histograms(&rows, RebinPolicy::Truncate).unwrap();
        source.store_mut().set_bin_width_us(0.0001);
        source.write(&input).unwrap();

        let config = ConvertConfig {
            input_path: input,
            output_path: output.clone(),
            policy: RebinPolicy::RebinAndPad,
            strict: true,
        };
        let converted = convert(&config).unwrap();
        assert_eq!(converted.store().length_histo(), 8192);
        assert!(converted.write_ok());

        let mut check = MusrTdFile::new();
        check.read(&output).unwrap();
        assert_eq!(check.run().run_number(), 7);
        assert_eq!(check.store().events_vector(), vec![24000; 8]);
    }

    #[test]
    fn test_convert_reports_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConvertConfig {
            input_path: dir.path().join("absent.bin"),
            output_path: dir.path().join("out.bin"),
            ..Default::default()
        };
        assert!(matches!(
            convert(&config),
            Err(ProcessorError::ConfigError(_))
        ));
    }
}
