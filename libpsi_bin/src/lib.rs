//! # psi_bin
//!
//! psi_bin reads and writes the binary time-differential histogram files of muon spin
//! rotation spectrometers, written in Rust. It decodes the PSI-BIN format and the MDU
//! front-end dumps (pTA "M3", TDC "T4" and "T5"), gives access to the histograms through a
//! set of derived views (rebinned, aligned to t0, background corrected, asymmetry with its
//! error), and writes histogram data back as PSI-BIN within the limits of that format.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust before, see the
//! [Rust docs](https://www.rust-lang.org/tools/install) for installation instructions.
//!
//! To build and install the command line tool use `cargo install --path ./psi_bin_cli`
//! from the top level psi_bin repository.
//!
//! ## Usage
//!
//! ```no_run
//! use libpsi_bin::codec::MusrTdFile;
//! use std::path::Path;
//!
//! let mut file = MusrTdFile::new();
//! file.read(Path::new("deltat_tdc_gps_2471.bin")).unwrap();
//! let forward = file.store().histo_vector(0, 4);
//! println!("{} points at {} ns", forward.len(), file.time_resolution() * 4.0);
//! ```
//!
//! ## Configuration
//!
//! The CLI converts any supported file to PSI-BIN. The YAML format of a configuration file
//! is as follows:
//!
//! ```yml
//! input_path: None
//! output_path: None
//! policy: rebin_and_pad
//! strict: false
//! ```
//!
//! `policy` is either `rebin_and_pad` (sum groups of bins, then zero pad to a multiple of
//! 256) or `truncate` (keep the leading bins). With `strict` set, the written histograms
//! must have a length that is a multiple of 256.
//!
//! ## Limits
//!
//! A PSI-BIN file holds at most 32 histograms of at most 32767 bins, and no more than
//! 65536 bins in total. Only the first 16 histograms carry labels, t0 and good bin ranges
//! in the header, and at most 18 scalers and 4 temperatures are stored.
//!
//! ## Output
//!
//! The CLI writes a log file `psi_bin.log` next to where it runs. It contains the details
//! of every decode and encode, including warnings about optional information that was
//! missing from a file.
pub mod codec;
pub mod config;
pub mod consistency;
pub mod constants;
pub mod error;
pub mod format;
pub mod histogram;
pub mod layout;
pub mod mdu;
pub mod process;
pub mod psi_bin;
pub mod rebin;
pub mod run_info;
pub mod views;
