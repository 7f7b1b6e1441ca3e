use std::path::Path;

use rusqlite::{Connection, Error, OptionalExtension, Params, Row};

use crate::scan::SpectrumScan;

pub trait FromSQL: Sized {
    fn from_row(row: &Row<'_>) -> Result<Self, Error>;

    fn get_sql() -> String;

    fn read_from_where<I: Params>(
        connection: &Connection,
        params: I,
        condition_sql_fragment: &str,
    ) -> Result<Vec<Self>, Error> {
        let sql = Self::get_sql();
        let sql = format!("{sql} WHERE {condition_sql_fragment}");
        let mut stmt = connection.prepare(&sql)?;
        let out: Result<Vec<Self>, Error> = stmt
            .query_map(params, |row: &Row<'_>| Self::from_row(row))?
            .collect();
        out
    }
}

/// A row of the `FragSpectrumScans` table. The scan itself is kept as JSON,
/// its precursor m/z is duplicated into its own column for merge checks.
#[derive(Debug, Clone, PartialEq)]
pub struct SQLScanRecord {
    pub scan_number: u32,
    pub experimental_mass_to_charge: f64,
    pub payload: String,
}

impl SQLScanRecord {
    pub fn encode(scan: &SpectrumScan) -> serde_json::Result<Self> {
        Ok(Self {
            scan_number: scan.scan_number,
            experimental_mass_to_charge: scan.experimental_mass_to_charge,
            payload: serde_json::to_string(scan)?,
        })
    }

    pub fn decode(&self) -> serde_json::Result<SpectrumScan> {
        serde_json::from_str(&self.payload)
    }
}

impl FromSQL for SQLScanRecord {
    fn from_row(row: &Row<'_>) -> Result<Self, Error> {
        Ok(Self {
            scan_number: row.get(0)?,
            experimental_mass_to_charge: row.get(1)?,
            payload: row.get(2)?,
        })
    }

    fn get_sql() -> String {
        "SELECT ScanNumber, ExperimentalMassToCharge, Payload FROM FragSpectrumScans".into()
    }
}

/// The SQLite file backing a scan store
#[derive(Debug)]
pub struct ScanDatabase {
    connection: Connection,
}

impl ScanDatabase {
    /// Open the database at `path`, discarding any scans it already holds
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let connection = Connection::open(path)?;
        connection.pragma_update(None, "synchronous", "OFF")?;
        let _mode: String =
            connection.pragma_update_and_check(None, "journal_mode", "MEMORY", |row| row.get(0))?;
        connection.execute_batch(
            "DROP TABLE IF EXISTS FragSpectrumScans;
            CREATE TABLE FragSpectrumScans (
                ScanNumber INTEGER PRIMARY KEY,
                ExperimentalMassToCharge REAL NOT NULL,
                Payload TEXT NOT NULL
            );",
        )?;
        Ok(Self { connection })
    }

    pub fn begin(&self) -> Result<(), Error> {
        self.connection.execute_batch("BEGIN")
    }

    pub fn commit(&self) -> Result<(), Error> {
        self.connection.execute_batch("COMMIT")
    }

    pub fn rollback(&self) -> Result<(), Error> {
        self.connection.execute_batch("ROLLBACK")
    }

    pub fn is_autocommit(&self) -> bool {
        self.connection.is_autocommit()
    }

    pub fn insert(&self, record: &SQLScanRecord) -> Result<(), Error> {
        self.connection.execute(
            "INSERT INTO FragSpectrumScans (ScanNumber, ExperimentalMassToCharge, Payload) VALUES (?1, ?2, ?3)",
            (record.scan_number, record.experimental_mass_to_charge, &record.payload),
        )?;
        Ok(())
    }

    pub fn update(&self, record: &SQLScanRecord) -> Result<(), Error> {
        self.connection.execute(
            "UPDATE FragSpectrumScans SET Payload = ?2 WHERE ScanNumber = ?1",
            (record.scan_number, &record.payload),
        )?;
        Ok(())
    }

    pub fn get(&self, scan_number: u32) -> Result<Option<SQLScanRecord>, Error> {
        let mut rows = SQLScanRecord::read_from_where(
            &self.connection,
            [scan_number],
            "ScanNumber = ?1",
        )?;
        Ok(rows.pop())
    }

    pub fn experimental_mass_to_charge(&self, scan_number: u32) -> Result<Option<f64>, Error> {
        self.connection
            .query_row(
                "SELECT ExperimentalMassToCharge FROM FragSpectrumScans WHERE ScanNumber = ?1",
                [scan_number],
                |row| row.get(0),
            )
            .optional()
    }

    /// Read up to `limit` records with scan numbers of at least `start`, in
    /// ascending order
    pub fn page_from(&self, start: u32, limit: usize) -> Result<Vec<SQLScanRecord>, Error> {
        SQLScanRecord::read_from_where(
            &self.connection,
            (start, limit as i64),
            "ScanNumber >= ?1 ORDER BY ScanNumber LIMIT ?2",
        )
    }

    pub fn count(&self) -> Result<usize, Error> {
        let n: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM FragSpectrumScans", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
