//! Small key-value persistence for the few numbers that have to survive a
//! reboot: the calibrated winch speeds and the chain counter.

use core::fmt::Write as _;

use embedded_storage::Storage;
use serde::{Deserialize, Serialize};

pub trait Preferences {
    type Error: core::fmt::Debug;

    fn load(&mut self, namespace: &str, key: &str) -> Result<Option<f32>, Self::Error>;
    fn store(&mut self, namespace: &str, key: &str, value: f32) -> Result<(), Self::Error>;
}

impl<P: Preferences + ?Sized> Preferences for &mut P {
    type Error = P::Error;

    fn load(&mut self, namespace: &str, key: &str) -> Result<Option<f32>, Self::Error> {
        (**self).load(namespace, key)
    }

    fn store(&mut self, namespace: &str, key: &str, value: f32) -> Result<(), Self::Error> {
        (**self).store(namespace, key, value)
    }
}

/// Preferences that only live as long as the process.
#[cfg(feature = "std")]
#[derive(Clone, Debug, Default)]
pub struct MemoryPreferences {
    values: std::collections::BTreeMap<(String, String), f32>,
    writes: usize,
}

#[cfg(feature = "std")]
impl MemoryPreferences {
    pub fn get(&self, namespace: &str, key: &str) -> Option<f32> {
        self.values
            .get(&(namespace.to_owned(), key.to_owned()))
            .copied()
    }

    /// How many times anything has been stored.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

#[cfg(feature = "std")]
impl Preferences for MemoryPreferences {
    type Error = core::convert::Infallible;

    fn load(&mut self, namespace: &str, key: &str) -> Result<Option<f32>, Self::Error> {
        Ok(self.get(namespace, key))
    }

    fn store(&mut self, namespace: &str, key: &str, value: f32) -> Result<(), Self::Error> {
        self.values
            .insert((namespace.to_owned(), key.to_owned()), value);
        self.writes += 1;
        Ok(())
    }
}

const MAGIC: &[u8; 4] = b"wndl";
const RECORD_LEN: usize = 256;
const MAX_ENTRIES: usize = 8;

type Key = heapless::String<24>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Record {
    entries: heapless::Vec<(Key, f32), MAX_ENTRIES>,
}

impl Record {
    fn get(&self, key: &str) -> Option<f32> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| *v)
    }
}

#[derive(Debug)]
pub enum FlashError<E> {
    Storage(E),
    Encode(postcard::Error),
    KeyTooLong,
    Full,
}

/// Preferences kept in a single record at a fixed offset in flash.
///
/// The record starts with a magic number; anything else at that offset
/// (for example, erased flash) reads as an empty record. Every store rewrites
/// the whole record.
pub struct FlashPreferences<S> {
    storage: S,
    offset: u32,
    record: Option<Record>,
}

impl<S: Storage> FlashPreferences<S> {
    pub fn new(storage: S, offset: u32) -> Self {
        FlashPreferences {
            storage,
            offset,
            record: None,
        }
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    fn key(namespace: &str, key: &str) -> Result<Key, FlashError<S::Error>> {
        let mut k = Key::new();
        write!(k, "{namespace}/{key}").map_err(|_| FlashError::KeyTooLong)?;
        Ok(k)
    }

    fn record(&mut self) -> Result<&mut Record, FlashError<S::Error>> {
        if self.record.is_none() {
            let mut buf = [0u8; RECORD_LEN];
            self.storage
                .read(self.offset, &mut buf)
                .map_err(FlashError::Storage)?;

            let record = if &buf[0..4] == MAGIC {
                postcard::from_bytes::<Record>(&buf[4..]).unwrap_or_else(|e| {
                    log::warn!("discarding unreadable preferences: {e:?}");
                    Record::default()
                })
            } else {
                Record::default()
            };
            self.record = Some(record);
        }
        Ok(self.record.get_or_insert_with(Record::default))
    }

    fn flush(&mut self) -> Result<(), FlashError<S::Error>> {
        let mut buf = [0xffu8; RECORD_LEN];
        buf[0..4].copy_from_slice(MAGIC);
        if let Some(record) = &self.record {
            postcard::to_slice(record, &mut buf[4..]).map_err(FlashError::Encode)?;
        }
        self.storage
            .write(self.offset, &buf)
            .map_err(FlashError::Storage)
    }
}

impl<S> Preferences for FlashPreferences<S>
where
    S: Storage,
    S::Error: core::fmt::Debug,
{
    type Error = FlashError<S::Error>;

    fn load(&mut self, namespace: &str, key: &str) -> Result<Option<f32>, Self::Error> {
        let key = Self::key(namespace, key)?;
        Ok(self.record()?.get(&key))
    }

    fn store(&mut self, namespace: &str, key: &str, value: f32) -> Result<(), Self::Error> {
        let key = Self::key(namespace, key)?;
        let record = self.record()?;
        if let Some(entry) = record.entries.iter_mut().find(|(k, _)| *k == key) {
            if entry.1 == value {
                return Ok(());
            }
            entry.1 = value;
        } else {
            record
                .entries
                .push((key, value))
                .map_err(|_| FlashError::Full)?;
        }
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use embedded_storage::ReadStorage;

    use super::*;

    /// A flash chip that's just a byte array.
    struct Ram {
        bytes: Vec<u8>,
        writes: usize,
    }

    impl Ram {
        fn erased() -> Self {
            Ram {
                bytes: vec![0xff; 4096],
                writes: 0,
            }
        }
    }

    impl ReadStorage for Ram {
        type Error = ();

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), ()> {
            let start = offset as usize;
            let src = self.bytes.get(start..start + bytes.len()).ok_or(())?;
            bytes.copy_from_slice(src);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.bytes.len()
        }
    }

    impl Storage for Ram {
        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), ()> {
            let start = offset as usize;
            let dst = self.bytes.get_mut(start..start + bytes.len()).ok_or(())?;
            dst.copy_from_slice(bytes);
            self.writes += 1;
            Ok(())
        }
    }

    #[test]
    fn erased_flash_is_empty() {
        let mut prefs = FlashPreferences::new(Ram::erased(), 1024);
        assert_eq!(prefs.load("speeds", "upSpeed").unwrap(), None);
    }

    #[test]
    fn survives_reboot() {
        let mut prefs = FlashPreferences::new(Ram::erased(), 1024);
        prefs.store("speeds", "upSpeed", 850.0).unwrap();
        prefs.store("speeds", "downSpeed", 700.0).unwrap();
        prefs.store("speeds", "upSpeed", 900.0).unwrap();

        let mut prefs = FlashPreferences::new(prefs.into_inner(), 1024);
        assert_eq!(prefs.load("speeds", "upSpeed").unwrap(), Some(900.0));
        assert_eq!(prefs.load("speeds", "downSpeed").unwrap(), Some(700.0));
        assert_eq!(prefs.load("chain", "length").unwrap(), None);
    }

    #[test]
    fn unchanged_values_are_not_rewritten() {
        let mut prefs = FlashPreferences::new(Ram::erased(), 0);
        prefs.store("chain", "length", 12.5).unwrap();
        prefs.store("chain", "length", 12.5).unwrap();
        assert_eq!(prefs.into_inner().writes, 1);
    }

    #[test]
    fn table_fills_up() {
        let mut prefs = FlashPreferences::new(Ram::erased(), 0);
        let keys = ["a", "b", "c", "d", "e", "f", "g", "h"];
        for (i, key) in keys.iter().enumerate() {
            prefs.store("t", key, i as f32).unwrap();
        }
        assert!(matches!(prefs.store("t", "i", 0.0), Err(FlashError::Full)));
        assert!(matches!(
            prefs.store("a-very-long-namespace", "and-key", 0.0),
            Err(FlashError::KeyTooLong)
        ));
    }

    #[test]
    fn memory_counts_writes() {
        let mut prefs = MemoryPreferences::default();
        prefs.store("speeds", "upSpeed", 1.0).unwrap();
        prefs.store("speeds", "upSpeed", 2.0).unwrap();
        assert_eq!(prefs.get("speeds", "upSpeed"), Some(2.0));
        assert_eq!(prefs.writes(), 2);
    }
}
