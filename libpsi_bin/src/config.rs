use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConfigError;
use super::rebin::RebinPolicy;

/// Structure representing a conversion job. Contains the input and output paths and how the
/// histograms should be made to fit the PSI-BIN limits.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub policy: RebinPolicy,
    /// Require histogram lengths to be a multiple of 256
    pub strict: bool,
}

impl Default for ConvertConfig {
    /// Generate a new ConvertConfig object. The paths will be empty/invalid
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("None"),
            output_path: PathBuf::from("None"),
            policy: RebinPolicy::RebinAndPad,
            strict: false,
        }
    }
}

impl ConvertConfig {
    /// Read the configuration in a YAML file
    /// Returns a ConvertConfig if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    pub fn does_input_exist(&self) -> bool {
        self.input_path.is_file()
    }

    /// The output directory must exist and the output must not overwrite the input
    pub fn is_output_valid(&self) -> bool {
        let parent_exists = match self.output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.exists(),
            _ => true,
        };
        parent_exists
            && !self.output_path.as_os_str().is_empty()
            && self.output_path != self.input_path
    }

    /// Check the paths before any file is touched
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.does_input_exist() {
            return Err(ConfigError::BadFilePath(self.input_path.clone()));
        }
        if !self.is_output_valid() {
            return Err(ConfigError::InvalidValue(format!(
                "output path {:?} is not writable or equals the input",
                self.output_path
            )));
        }
        Ok(())
    }
}
