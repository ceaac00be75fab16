use std::fmt::Display;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use super::error::CodecError;

/// The three generations of MDU front-end dumps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MduVariant {
    /// pTA electronics ("M3")
    PtaM3,
    /// TDC electronics, 16 tags ("T4")
    TdcT4,
    /// TDC electronics, 32 tags ("T5")
    TdcT5,
}

impl MduVariant {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::PtaM3 => "M3",
            Self::TdcT4 => "T4",
            Self::TdcT5 => "T5",
        }
    }

    /// Number of tag (channel) records in the settings block
    pub fn tag_count(&self) -> usize {
        match self {
            Self::PtaM3 | Self::TdcT4 => 16,
            Self::TdcT5 => 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    PsiBin,
    Mdu(MduVariant),
}

impl FromStr for FileFormat {
    type Err = CodecError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1N" => Ok(Self::PsiBin),
            "M3" => Ok(Self::Mdu(MduVariant::PtaM3)),
            "T4" => Ok(Self::Mdu(MduVariant::TdcT4)),
            "T5" => Ok(Self::Mdu(MduVariant::TdcT5)),
            _ => Err(CodecError::UnsupportedFormatVersion(s.to_string())),
        }
    }
}

impl Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PsiBin => write!(f, "PSI-BIN"),
            Self::Mdu(variant) => write!(f, "MDU ({})", variant.tag()),
        }
    }
}

impl FileFormat {
    /// The 2-character magic token at the start of the file
    pub fn tag(&self) -> &'static str {
        match self {
            Self::PsiBin => "1N",
            Self::Mdu(variant) => variant.tag(),
        }
    }

    /// Identify a file by its first two bytes
    pub fn detect(path: &Path) -> Result<Self, CodecError> {
        let mut file = File::open(path).map_err(|source| CodecError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let mut magic = [0u8; 2];
        file.read_exact(&mut magic)
            .map_err(|e| CodecError::HeaderReadFailed(format!("could not read format id: {e}")))?;
        Self::from_magic(&magic)
    }

    pub fn from_magic(magic: &[u8; 2]) -> Result<Self, CodecError> {
        Self::from_str(&String::from_utf8_lossy(magic))
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_with(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_detect_known_tags() {
        let psi = file_with(b"1N\x00\x00");
        assert_eq!(FileFormat::detect(psi.path()).unwrap(), FileFormat::PsiBin);
        let t5 = file_with(b"T5rest");
        assert_eq!(
            FileFormat::detect(t5.path()).unwrap(),
            FileFormat::Mdu(MduVariant::TdcT5)
        );
        assert_eq!(
            FileFormat::from_magic(b"M3").unwrap(),
            FileFormat::Mdu(MduVariant::PtaM3)
        );
        assert_eq!(MduVariant::TdcT5.tag_count(), 32);
    }

    #[test]
    fn test_detect_rejects_unknown_and_short_files() {
        let unknown = file_with(b"XX");
        match FileFormat::detect(unknown.path()) {
            Err(e @ CodecError::UnsupportedFormatVersion(_)) => assert_eq!(e.code(), 3),
            other => panic!("unexpected result {other:?}"),
        }
        let short = file_with(b"1");
        assert!(matches!(
            FileFormat::detect(short.path()),
            Err(CodecError::HeaderReadFailed(_))
        ));
        assert!(matches!(
            FileFormat::detect(Path::new("/definitely/not/here.bin")),
            Err(CodecError::OpenFailed { .. })
        ));
    }
}
