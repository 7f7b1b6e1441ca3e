//! An on-disk staging area that merges matches from every input file into
//! one record per spectrum, replayed in scan number order at the end.
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, trace};
use tempfile::TempPath;
use thiserror::Error;

use crate::scan::{PeptideSpectrumMatch, SpectrumScan};

mod sql;

pub use sql::{FromSQL, SQLScanRecord, ScanDatabase};

/// The number of scans held in memory at once during ordered iteration
pub const PAGE_SIZE: usize = 512;

#[derive(Debug, Error)]
pub enum ScanStoreError {
    #[error("Scan store database error: {0}")]
    SQLError(#[from] rusqlite::Error),
    #[error("Failed to serialize or deserialize a scan: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Failed to create the scan store file: {0}")]
    IOError(#[from] io::Error),
    #[error("Scan {0} is missing from the store")]
    MissingScan(u32),
    #[error("Spectrum {source_id} (scan {scan_number}) was stored with experimental m/z {stored} but is now seen with {found}")]
    MassToChargeMismatch {
        source_id: String,
        scan_number: u32,
        stored: f64,
        found: f64,
    },
}

impl From<ScanStoreError> for io::Error {
    fn from(value: ScanStoreError) -> Self {
        match value {
            ScanStoreError::IOError(e) => e,
            _ => io::Error::new(io::ErrorKind::Other, value),
        }
    }
}

/// Hands out scan numbers to source spectrum identifiers in order of first sighting
#[derive(Debug, Default, Clone)]
pub struct ScanNumberMap {
    id_map: HashMap<String, u32>,
    next_id: u32,
}

impl ScanNumberMap {
    pub fn get(&self, key: &str) -> Option<u32> {
        self.id_map.get(key).copied()
    }

    /// Get the scan number of `key`, and whether it was newly assigned
    pub fn get_or_insert(&mut self, key: &str) -> (u32, bool) {
        if let Some(value) = self.id_map.get(key) {
            (*value, false)
        } else {
            let value = self.next_id;
            self.id_map.insert(key.to_string(), value);
            self.next_id += 1;
            (value, true)
        }
    }

    /// The scan number the next new key will get
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Forget every key assigned `next_id` or later
    pub fn truncate(&mut self, next_id: u32) {
        if next_id >= self.next_id {
            return;
        }
        self.id_map.retain(|_, v| *v < next_id);
        self.next_id = next_id;
    }

    pub fn len(&self) -> usize {
        self.id_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_map.is_empty()
    }
}

/// The scan store of one run. Opening it always starts from an empty table.
#[derive(Debug)]
pub struct ScanMergeStore {
    database: ScanDatabase,
    scan_numbers: ScanNumberMap,
    checkpoint: Option<u32>,
    path: PathBuf,
    _temporary: Option<TempPath>,
}

impl ScanMergeStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ScanStoreError> {
        let path = path.as_ref().to_path_buf();
        debug!("Opening scan store at {}", path.display());
        let database = ScanDatabase::open(&path)?;
        Ok(Self {
            database,
            scan_numbers: ScanNumberMap::default(),
            checkpoint: None,
            path,
            _temporary: None,
        })
    }

    /// Open a store in the system temporary directory that is deleted when
    /// the store is dropped
    pub fn open_temporary() -> Result<Self, ScanStoreError> {
        let temporary = tempfile::Builder::new()
            .prefix("mzid2pin-")
            .suffix(".sqlite")
            .tempfile()?
            .into_temp_path();
        let mut this = Self::open(&temporary)?;
        this._temporary = Some(temporary);
        Ok(this)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The number of distinct spectra seen so far
    pub fn len(&self) -> usize {
        self.scan_numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scan_numbers.is_empty()
    }

    /// Start a transaction. Scans created inside it are forgotten again if it
    /// is rolled back.
    pub fn begin(&mut self) -> Result<(), ScanStoreError> {
        self.database.begin()?;
        self.checkpoint = Some(self.scan_numbers.next_id());
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), ScanStoreError> {
        self.database.commit()?;
        self.checkpoint = None;
        Ok(())
    }

    /// Undo every write since [`ScanMergeStore::begin`], including the scan
    /// numbers it handed out
    pub fn rollback(&mut self) -> Result<(), ScanStoreError> {
        let Some(checkpoint) = self.checkpoint.take() else {
            return Ok(());
        };
        debug!(
            "Rolling back scans {checkpoint} to {}",
            self.scan_numbers.next_id()
        );
        self.scan_numbers.truncate(checkpoint);
        if !self.database.is_autocommit() {
            self.database.rollback()?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn in_transaction(&self) -> bool {
        self.checkpoint.is_some()
    }

    /// Get the scan number of the spectrum `source_id`, creating an empty scan
    /// on first sighting. A spectrum seen again must report the same precursor m/z.
    pub fn get_or_create(
        &mut self,
        source_id: &str,
        experimental_mass_to_charge: f64,
    ) -> Result<u32, ScanStoreError> {
        if let Some(scan_number) = self.scan_numbers.get(source_id) {
            let stored = self
                .database
                .experimental_mass_to_charge(scan_number)?
                .ok_or(ScanStoreError::MissingScan(scan_number))?;
            if stored != experimental_mass_to_charge {
                return Err(ScanStoreError::MassToChargeMismatch {
                    source_id: source_id.to_string(),
                    scan_number,
                    stored,
                    found: experimental_mass_to_charge,
                });
            }
            return Ok(scan_number);
        }
        let (scan_number, _) = self.scan_numbers.get_or_insert(source_id);
        trace!("Assigned scan {scan_number} to {source_id}");
        let record =
            SQLScanRecord::encode(&SpectrumScan::new(scan_number, experimental_mass_to_charge))?;
        self.database.insert(&record)?;
        Ok(scan_number)
    }

    pub fn get(&self, scan_number: u32) -> Result<SpectrumScan, ScanStoreError> {
        let record = self
            .database
            .get(scan_number)?
            .ok_or(ScanStoreError::MissingScan(scan_number))?;
        Ok(record.decode()?)
    }

    /// Add `matches` to the end of the scan's match list
    pub fn append_matches(
        &mut self,
        scan_number: u32,
        matches: Vec<PeptideSpectrumMatch>,
    ) -> Result<(), ScanStoreError> {
        let mut scan = self.get(scan_number)?;
        scan.matches.extend(matches);
        self.database.update(&SQLScanRecord::encode(&scan)?)?;
        Ok(())
    }

    /// Iterate over every scan in ascending scan number order
    pub fn iter_in_key_order(&self) -> ScanIter<'_> {
        self.iter_with_page_size(PAGE_SIZE)
    }

    pub fn iter_with_page_size(&self, page_size: usize) -> ScanIter<'_> {
        ScanIter {
            database: &self.database,
            next_key: Some(0),
            page: VecDeque::new(),
            page_size: page_size.max(1),
        }
    }
}

/// A single pass over the store that reads one page of scans at a time
pub struct ScanIter<'a> {
    database: &'a ScanDatabase,
    next_key: Option<u32>,
    page: VecDeque<SQLScanRecord>,
    page_size: usize,
}

impl<'a> ScanIter<'a> {
    fn fill_page(&mut self) -> Result<(), ScanStoreError> {
        let Some(start) = self.next_key else {
            return Ok(());
        };
        let rows = self.database.page_from(start, self.page_size)?;
        self.next_key = rows.last().and_then(|r| r.scan_number.checked_add(1));
        self.page.extend(rows);
        Ok(())
    }
}

impl<'a> Iterator for ScanIter<'a> {
    type Item = Result<SpectrumScan, ScanStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() {
            if let Err(e) = self.fill_page() {
                self.next_key = None;
                return Some(Err(e));
            }
        }
        let record = self.page.pop_front()?;
        Some(record.decode().map_err(ScanStoreError::from))
    }
}
