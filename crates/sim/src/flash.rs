use std::{
    io,
    path::{Path, PathBuf},
};

use embedded_storage::{ReadStorage, Storage};

/// Size of the simulated flash partition.
pub const CAPACITY: usize = 4096;

/// A flash partition kept in a file, so that whatever the controller saves
/// survives from one run to the next.
///
/// A missing file reads as erased flash.
pub struct FileFlash {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl FileFlash {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_owned();
        let mut bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        bytes.resize(CAPACITY, 0xff);
        Ok(FileFlash { path, bytes })
    }

    fn range(&self, offset: u32, len: usize) -> io::Result<std::ops::Range<usize>> {
        let start = offset as usize;
        let end = start + len;
        if end > self.bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{len} bytes at {offset} is past the end of flash"),
            ));
        }
        Ok(start..end)
    }
}

impl ReadStorage for FileFlash {
    type Error = io::Error;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> io::Result<()> {
        let range = self.range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl Storage for FileFlash {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> io::Result<()> {
        let range = self.range(offset, bytes.len())?;
        self.bytes[range].copy_from_slice(bytes);
        std::fs::write(&self.path, &self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use windlass_control::{FlashPreferences, Preferences as _};

    use super::*;

    #[test]
    fn preferences_survive_reopening() {
        let path = std::env::temp_dir().join(format!("windlass-flash-{}.bin", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut prefs = FlashPreferences::new(FileFlash::open(&path).unwrap(), 0);
        assert_eq!(prefs.load("speeds", "upSpeed").unwrap(), None);
        prefs.store("speeds", "upSpeed", 1725.0).unwrap();
        drop(prefs);

        let mut prefs = FlashPreferences::new(FileFlash::open(&path).unwrap(), 0);
        assert_eq!(prefs.load("speeds", "upSpeed").unwrap(), Some(1725.0));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn refuses_to_write_past_the_end() {
        let path = std::env::temp_dir().join("windlass-flash-never-written.bin");
        let mut flash = FileFlash::open(&path).unwrap();
        assert_eq!(flash.capacity(), CAPACITY);
        let mut buf = [0u8; 8];
        assert!(flash.read(CAPACITY as u32 - 4, &mut buf).is_err());
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0xff; 8]);
    }
}
