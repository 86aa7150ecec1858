//! File collaborators: the firmware is read fully before a transfer starts,
//! the photo is written once the transfer completed.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};

pub trait FileSource {
    fn read_all(&self) -> Result<Vec<u8>>;
}

pub trait FileSink {
    fn write_all(&mut self, data: &[u8]) -> Result<()>;
}

/// Firmware image on disk.
pub struct FirmwareFile {
    path: PathBuf,
}

impl FirmwareFile {
    pub fn new(path: impl AsRef<Path>) -> FirmwareFile {
        FirmwareFile { path: path.as_ref().to_path_buf() }
    }
}

impl FileSource for FirmwareFile {
    fn read_all(&self) -> Result<Vec<u8>> {
        let data = fs::read(&self.path).map_err(|source| Error::FirmwareNotFound {
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), bytes = data.len(), "firmware loaded");
        Ok(data)
    }
}

/// Destination of a received payload; an existing file is replaced.
pub struct OutputFile {
    path: PathBuf,
}

impl OutputFile {
    pub fn new(path: impl AsRef<Path>) -> OutputFile {
        OutputFile { path: path.as_ref().to_path_buf() }
    }
}

impl FileSink for OutputFile {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        fs::write(&self.path, data)?;
        info!(path = %self.path.display(), bytes = data.len(), "payload saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::process;

    use super::*;

    fn scratch(name: &str) -> PathBuf {
        env::temp_dir().join(format!("robot-link-{}-{name}", process::id()))
    }

    #[test]
    fn missing_firmware_is_reported() {
        let err = FirmwareFile::new(scratch("absent.bin")).read_all().unwrap_err();
        assert!(matches!(err, Error::FirmwareNotFound { .. }));
    }

    #[test]
    fn image_round_trips_through_disk() {
        let path = scratch("photo.png");
        OutputFile::new(&path).write_all(b"\x89PNG data").unwrap();
        assert_eq!(FirmwareFile::new(&path).read_all().unwrap(), b"\x89PNG data");
        fs::remove_file(path).unwrap();
    }
}
