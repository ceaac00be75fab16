//! # psi_bin_cli
//!
//! Part of the psi_bin crate family.
//!
//! Command line front end of libpsi_bin.
//!
//! ## Use
//!
//! ```bash
//! psi_bin_cli new -p config.yml   # write a template configuration
//! psi_bin_cli -p config.yml       # convert the configured file to PSI-BIN
//! psi_bin_cli dump -p run.bin     # print the decoded header of a PSI-BIN or MDU file
//! ```
use clap::{Arg, Command};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libpsi_bin::codec::MusrTdFile;
use libpsi_bin::config::ConvertConfig;
use libpsi_bin::process::convert;

fn init_logging() {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./psi_bin.log"))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()
            .unwrap(),
    );
    let term_sink = Arc::new(
        spdlog::sink::StdStreamSink::builder()
            .std_stream(spdlog::sink::StdStream::Stdout)
            .level_filter(spdlog::LevelFilter::MoreSevereEqual(spdlog::Level::Info))
            .build()
            .unwrap(),
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .sink(term_sink)
            .build()
            .unwrap(),
    );
    spdlog::set_default_logger(logger);
}

fn make_template_config(path: &Path) {
    match ConvertConfig::default().write_config_file(path) {
        Ok(()) => spdlog::info!("Done."),
        Err(e) => spdlog::error!("Could not create template config file: {e}"),
    }
}

fn dump_header(path: &Path) {
    let mut file = MusrTdFile::new();
    if let Err(e) = file.read(path) {
        spdlog::error!("Could not decode {} (status {}): {e}", path.to_string_lossy(), e.code());
        return;
    }
    match serde_yaml::to_string(&file.header_dump()) {
        Ok(yaml) => println!("{yaml}"),
        Err(e) => spdlog::error!("Could not format header: {e}"),
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("psi_bin_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(Command::new("dump").about("Print the decoded header of a data file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .global(true)
                .required(true)
                .help("Path to the file"),
        )
        .get_matches();

    init_logging();

    let path = match matches.get_one::<String>("path") {
        Some(p) => PathBuf::from(p),
        None => {
            spdlog::error!("A path is required");
            return;
        }
    };

    match matches.subcommand() {
        Some(("new", _)) => {
            spdlog::info!("Making a template config at {}...", path.to_string_lossy());
            make_template_config(&path);
            return;
        }
        Some(("dump", _)) => {
            dump_header(&path);
            return;
        }
        _ => (),
    }

    // Load our config
    spdlog::info!("Loading config from {}...", path.to_string_lossy());
    let config = match ConvertConfig::read_config_file(&path) {
        Ok(c) => c,
        Err(e) => {
            spdlog::error!("{e}");
            return;
        }
    };
    spdlog::info!("Config successfully loaded.");
    spdlog::info!("Input Path: {}", config.input_path.to_string_lossy());
    spdlog::info!("Output Path: {}", config.output_path.to_string_lossy());
    spdlog::info!("Policy: {:?} Strict: {}", config.policy, config.strict);

    match convert(&config) {
        Ok(file) => spdlog::info!(
            "Successfully converted run {} ({} histograms of {} bins)",
            file.run().run_number(),
            file.store().number_histo(),
            file.store().length_histo()
        ),
        Err(e) => spdlog::error!("Conversion failed with error: {e}"),
    }
}
