//! The two-pass conversion of mzIdentML files into one `percolator_in` document.
//!
//! The first pass reads every file to find the charge states observed across
//! the run. The second pass builds feature vectors for every match and merges
//! them into the scan store, which is then replayed in scan number order.
use std::fmt::Display;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, info};
use thiserror::Error;

use crate::enzyme::Enzyme;
use crate::features::{ChargeRange, FeatureDescriptor, FeatureError, FeatureFlags, FeatureVectorBuilder};
use crate::identification::{PeptideLookup, PeptideLookupError, SpectrumResult};
use crate::io::mzid::{MzIdentMLParserError, MzIdentMLParserState, MzIdentMLReader, MzIdentMLReaderType};
use crate::io::pin::{PinWriter, PinWriterError};
use crate::store::{ScanMergeStore, ScanStoreError};

/// Whether an input file holds target or decoy matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileRole {
    Target,
    Decoy,
}

impl FileRole {
    pub fn is_decoy(&self) -> bool {
        matches!(self, Self::Decoy)
    }
}

impl Display for FileRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target => f.write_str("target"),
            Self::Decoy => f.write_str("decoy"),
        }
    }
}

/// The inputs and options of one conversion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionConfig {
    pub target_files: Vec<PathBuf>,
    pub decoy_files: Vec<PathBuf>,
    pub enzyme: Enzyme,
    pub ptm: bool,
    pub pngasef: bool,
    pub aa_freq: bool,
    pub monoisotopic: bool,
    /// Where to keep the scan store. A temporary file is used when unset.
    pub store_path: Option<PathBuf>,
}

impl ConversionConfig {
    pub fn new(target_files: Vec<PathBuf>, decoy_files: Vec<PathBuf>) -> Self {
        Self {
            target_files,
            decoy_files,
            ..Default::default()
        }
    }

    pub fn feature_flags(&self) -> FeatureFlags {
        FeatureFlags {
            enzyme: self.enzyme,
            ptm: self.ptm,
            pngasef: self.pngasef,
            aa_freq: self.aa_freq,
            monoisotopic: self.monoisotopic,
        }
    }

    /// Every input file in processing order, targets first
    pub fn input_files(&self) -> impl Iterator<Item = (&Path, FileRole)> {
        self.target_files
            .iter()
            .map(|p| (p.as_path(), FileRole::Target))
            .chain(self.decoy_files.iter().map(|p| (p.as_path(), FileRole::Decoy)))
    }
}

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Failed to read {}: {source}", .path.display())]
    Structural {
        path: PathBuf,
        #[source]
        source: MzIdentMLParserError,
    },
    #[error("{} is missing a required field: {message}", .path.display())]
    MissingField { path: PathBuf, message: String },
    #[error("{} translates into a feature list that differs from a previously created feature list: {source}", .path.display())]
    SchemaDrift {
        path: PathBuf,
        #[source]
        source: FeatureError,
    },
    #[error("{} has an invalid match: {source}", .path.display())]
    InvalidFeature {
        path: PathBuf,
        #[source]
        source: FeatureError,
    },
    #[error("{} is inconsistent with previously merged spectra: {message}", .path.display())]
    MergeInconsistency { path: PathBuf, message: String },
    #[error("{} contains the peptide identifier {peptide_id} more than once", .path.display())]
    DuplicatePeptide { path: PathBuf, peptide_id: String },
    #[error("Scan store failure: {0}")]
    Store(#[from] ScanStoreError),
    #[error("Failed to write the output document: {0}")]
    Output(#[from] PinWriterError),
    #[error("No target files were given")]
    NoInput,
    #[error("No input file has been loaded")]
    NotLoaded,
}

impl ConversionError {
    fn parse(path: &Path, source: MzIdentMLParserError) -> Self {
        if source.is_missing_field() {
            Self::MissingField {
                path: path.to_path_buf(),
                message: source.to_string(),
            }
        } else {
            Self::Structural {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    fn missing<S: Into<String>>(path: &Path, message: S) -> Self {
        Self::MissingField {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    fn feature(path: &Path, source: FeatureError) -> Self {
        let path = path.to_path_buf();
        if source.is_schema_drift() {
            Self::SchemaDrift { path, source }
        } else if source.is_missing_field() {
            Self::MissingField {
                path,
                message: source.to_string(),
            }
        } else if matches!(source, FeatureError::ExperimentalMassMismatch { .. }) {
            Self::MergeInconsistency {
                path,
                message: source.to_string(),
            }
        } else {
            Self::InvalidFeature { path, source }
        }
    }

    fn store(path: &Path, source: ScanStoreError) -> Self {
        match source {
            ScanStoreError::MassToChargeMismatch { .. } | ScanStoreError::MissingScan(_) => {
                Self::MergeInconsistency {
                    path: path.to_path_buf(),
                    message: source.to_string(),
                }
            }
            _ => Self::Store(source),
        }
    }

    fn lookup(path: &Path, source: PeptideLookupError) -> Self {
        match source {
            PeptideLookupError::DuplicatePeptide(peptide_id) => Self::DuplicatePeptide {
                path: path.to_path_buf(),
                peptide_id,
            },
            PeptideLookupError::ParserError(e) => Self::parse(path, e),
        }
    }
}

impl From<ConversionError> for io::Error {
    fn from(value: ConversionError) -> Self {
        match value {
            ConversionError::Structural {
                source: MzIdentMLParserError::IOError(_, ref e),
                ..
            } => io::Error::new(e.kind(), value),
            _ => io::Error::new(io::ErrorKind::InvalidData, value),
        }
    }
}

fn open_reader(path: &Path) -> Result<MzIdentMLReader, ConversionError> {
    MzIdentMLReader::open_path(path).map_err(|e| ConversionError::Structural {
        path: path.to_path_buf(),
        source: MzIdentMLParserError::IOError(MzIdentMLParserState::Start, e),
    })
}

/// Find the smallest and largest charge state of any match in the file at `path`
pub fn scan_charge_range(path: &Path) -> Result<ChargeRange, ConversionError> {
    let mut reader = open_reader(path)?;
    let mut range: Option<ChargeRange> = None;
    for result in reader.iter_results() {
        let result = result.map_err(|e| ConversionError::parse(path, e))?;
        if result.matches.is_empty() {
            return Err(ConversionError::missing(
                path,
                format!("SpectrumIdentificationResult {} has no SpectrumIdentificationItem", result.id),
            ));
        }
        for candidate in result.matches.iter() {
            range = Some(match range {
                Some(range) => range.observe(candidate.charge_state),
                None => ChargeRange::from_charge(candidate.charge_state),
            });
        }
    }
    range.ok_or_else(|| ConversionError::missing(path, "no SpectrumIdentificationResult"))
}

/// The combined charge range of every file in `paths`
pub fn scan_global_charge_range<'a, I: IntoIterator<Item = &'a Path>>(
    paths: I,
) -> Result<ChargeRange, ConversionError> {
    let mut global: Option<ChargeRange> = None;
    for path in paths {
        let range = scan_charge_range(path)?;
        debug!("{} has charge states {range}", path.display());
        global = Some(match global {
            Some(global) => global.combine(range),
            None => range,
        });
    }
    global.ok_or(ConversionError::NoInput)
}

/// Merge one result's matches into the store as target or decoy matches
fn merge_result(
    store: &mut ScanMergeStore,
    builder: &FeatureVectorBuilder<'_>,
    result: SpectrumResult,
    is_decoy: bool,
    path: &Path,
) -> Result<u32, ConversionError> {
    let experimental_mass_to_charge = result.experimental_mass_to_charge().ok_or_else(|| {
        ConversionError::missing(
            path,
            format!("SpectrumIdentificationResult {} has no SpectrumIdentificationItem", result.id),
        )
    })?;
    let scan_number = store
        .get_or_create(&result.id, experimental_mass_to_charge)
        .map_err(|e| ConversionError::store(path, e))?;
    let matches = result
        .matches
        .iter()
        .map(|candidate| builder.build(candidate, experimental_mass_to_charge, is_decoy))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConversionError::feature(path, e))?;
    store
        .append_matches(scan_number, matches)
        .map_err(|e| ConversionError::store(path, e))?;
    Ok(scan_number)
}

/// Merge `first` and every later result of `reader` into the store
fn merge_results<R: Read>(
    store: &mut ScanMergeStore,
    builder: &FeatureVectorBuilder<'_>,
    reader: &mut MzIdentMLReaderType<R>,
    first: SpectrumResult,
    role: FileRole,
    path: &Path,
) -> Result<usize, ConversionError> {
    let mut results_read = 0;
    let mut next = Some(first);
    while let Some(result) = next {
        merge_result(store, builder, result, role.is_decoy(), path)?;
        results_read += 1;
        next = reader
            .read_next_result()
            .map_err(|e| ConversionError::parse(path, e))?;
    }
    Ok(results_read)
}

/// Drives a conversion run and owns its scan store
#[derive(Debug)]
pub struct Converter {
    config: ConversionConfig,
    flags: FeatureFlags,
    store: ScanMergeStore,
    charge_range: Option<ChargeRange>,
    descriptor: Option<FeatureDescriptor>,
}

impl Converter {
    pub fn new(config: ConversionConfig) -> Result<Self, ConversionError> {
        if config.target_files.is_empty() {
            return Err(ConversionError::NoInput);
        }
        let store = match config.store_path.as_ref() {
            Some(path) => ScanMergeStore::open(path)?,
            None => ScanMergeStore::open_temporary()?,
        };
        Ok(Self {
            flags: config.feature_flags(),
            config,
            store,
            charge_range: None,
            descriptor: None,
        })
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn charge_range(&self) -> Option<ChargeRange> {
        self.charge_range
    }

    /// The feature list fixed by the first loaded file
    pub fn descriptor(&self) -> Option<&FeatureDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn store(&self) -> &ScanMergeStore {
        &self.store
    }

    /// Compute the run's charge range over every input file
    pub fn scan_charges(&mut self) -> Result<ChargeRange, ConversionError> {
        info!("Scanning charge states");
        let range = scan_global_charge_range(self.config.input_files().map(|(path, _)| path))?;
        debug!("Charge range of the run is {range}");
        self.charge_range = Some(range);
        Ok(range)
    }

    /// Build the feature vectors of every match in `path` and merge them into
    /// the store, returning the number of results read
    pub fn load_file(&mut self, path: &Path, role: FileRole) -> Result<usize, ConversionError> {
        let charge_range = match self.charge_range {
            Some(range) => range,
            None => self.scan_charges()?,
        };
        info!("Loading {role} file {}", path.display());
        let mut reader = open_reader(path)?;
        let lookup =
            PeptideLookup::from_reader(&mut reader).map_err(|e| ConversionError::lookup(path, e))?;
        debug!("Read {} peptides from {}", lookup.len(), path.display());

        let first = reader
            .read_next_result()
            .map_err(|e| ConversionError::parse(path, e))?
            .ok_or_else(|| ConversionError::missing(path, "no SpectrumIdentificationResult"))?;
        let reference = first.matches.first().ok_or_else(|| {
            ConversionError::missing(
                path,
                format!("SpectrumIdentificationResult {} has no SpectrumIdentificationItem", first.id),
            )
        })?;
        let candidate = FeatureDescriptor::from_reference_match(reference, charge_range, &self.flags);
        if let Some(established) = self.descriptor.as_ref() {
            established
                .check_consistent(&candidate)
                .map_err(|e| ConversionError::feature(path, e))?;
        } else {
            debug!(
                "Feature list: {}",
                candidate.names().collect::<Vec<_>>().join(", ")
            );
        }
        let newly_established = self.descriptor.is_none();
        let descriptor: &FeatureDescriptor = self.descriptor.get_or_insert(candidate);
        let builder = FeatureVectorBuilder::new(&lookup, charge_range, &self.flags, descriptor);

        self.store.begin()?;
        let merged = merge_results(&mut self.store, &builder, &mut reader, first, role, path)
            .and_then(|n| {
                self.store.commit()?;
                Ok(n)
            });
        match merged {
            Ok(results_read) => {
                info!(
                    "Merged {results_read} results from {}, {} spectra in total",
                    path.display(),
                    self.store.len()
                );
                Ok(results_read)
            }
            Err(e) => {
                if let Err(rollback_error) = self.store.rollback() {
                    error!("Failed to roll back {}: {rollback_error}", path.display());
                }
                if newly_established {
                    self.descriptor = None;
                }
                Err(e)
            }
        }
    }

    /// Run both passes over every input file
    pub fn load(&mut self) -> Result<usize, ConversionError> {
        if let Err(e) = self.scan_charges() {
            error!("{e}");
            return Err(e);
        }
        let files: Vec<(PathBuf, FileRole)> = self
            .config
            .input_files()
            .map(|(path, role)| (path.to_path_buf(), role))
            .collect();
        let mut results_read = 0;
        for (path, role) in files {
            match self.load_file(&path, role) {
                Ok(n) => results_read += n,
                Err(e) => {
                    error!("{e}");
                    return Err(e);
                }
            }
        }
        Ok(results_read)
    }

    /// Write the merged scans as a `percolator_in` document, returning the
    /// number of scans written
    pub fn write_document<W: Write>(&self, out: W) -> Result<usize, ConversionError> {
        let descriptor = self.descriptor.as_ref().ok_or(ConversionError::NotLoaded)?;
        let mut writer = PinWriter::new(out);
        writer.write_header(&self.config.enzyme)?;
        writer.write_feature_descriptions(descriptor)?;
        for scan in self.store.iter_in_key_order() {
            writer.write_scan(&scan?)?;
        }
        writer.close()?;
        info!("Wrote {} spectra", writer.scans_written());
        Ok(writer.scans_written())
    }
}

/// Convert every file named by `config` and write the result to `out`
pub fn convert<W: Write>(config: ConversionConfig, out: W) -> Result<usize, ConversionError> {
    let mut converter = Converter::new(config)?;
    converter.load()?;
    converter.write_document(out)
}

#[cfg(test)]
mod test {
    use super::*;

    fn data(name: &str) -> PathBuf {
        PathBuf::from("./test/data").join(name)
    }

    fn config(targets: &[&str], decoys: &[&str]) -> ConversionConfig {
        ConversionConfig::new(
            targets.iter().map(|n| data(n)).collect(),
            decoys.iter().map(|n| data(n)).collect(),
        )
    }

    #[test_log::test]
    fn test_two_file_scenario() -> Result<(), ConversionError> {
        let mut config = config(&["scenario_target.mzid"], &["scenario_decoy.mzid"]);
        config.enzyme = Enzyme::NoEnzyme;
        let mut converter = Converter::new(config)?;
        converter.load()?;
        assert_eq!(converter.charge_range(), Some(ChargeRange::from_charge(2)));
        let descriptor = converter.descriptor().unwrap();
        assert_eq!(descriptor.len(), 4 + 1 + 2);

        let scans: Vec<_> = converter
            .store()
            .iter_in_key_order()
            .collect::<Result<_, _>>()?;
        assert_eq!(scans.len(), 1);
        let scan = &scans[0];
        assert_eq!(scan.scan_number, 0);
        assert_eq!(scan.experimental_mass_to_charge, 501.0);
        assert_eq!(scan.matches.len(), 2);
        assert!(!scan.matches[0].is_decoy);
        assert!(scan.matches[1].is_decoy);
        assert_eq!(scan.matches[0].peptide_sequence, "PEPTIDE");
        assert_eq!(scan.matches[1].peptide_sequence, "EDITPEP");
        assert_eq!(
            scan.matches[0].features(),
            &[0.0, 0.0, 1002.0, 7.0, 1.0, 1.0, 1.0]
        );
        assert_eq!(scan.matches[1].features()[5], 2.0);
        for psm in scan.matches.iter() {
            assert_eq!(psm.features().len(), descriptor.len());
        }

        let mut buffer = Vec::new();
        assert_eq!(converter.write_document(&mut buffer)?, 1);
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text.matches("<fragSpectrumScan ").count(), 1);
        assert!(text.contains("scanNumber=\"0\""));
        assert_eq!(text.matches("<peptideSpectrumMatch ").count(), 2);
        assert!(text.contains("isDecoy=\"false\""));
        assert!(text.contains("isDecoy=\"true\""));
        assert!(text.contains("<enzyme>no enzyme</enzyme>"));
        Ok(())
    }

    #[test_log::test]
    fn test_charge_scan_idempotent() -> Result<(), ConversionError> {
        let paths = [data("target.mzid"), data("decoy.mzid")];
        let first = scan_global_charge_range(paths.iter().map(|p| p.as_path()))?;
        let second = scan_global_charge_range(paths.iter().map(|p| p.as_path()))?;
        assert_eq!(first, second);
        assert_eq!(first, ChargeRange::new(1, 4));
        assert_eq!(scan_charge_range(&paths[0])?, ChargeRange::new(1, 3));
        assert_eq!(scan_charge_range(&paths[1])?, ChargeRange::new(2, 4));
        Ok(())
    }

    #[test_log::test]
    fn test_merge_target_decoy() -> Result<(), ConversionError> {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&["target.mzid"], &["decoy.mzid"]);
        config.store_path = Some(dir.path().join("scans.sqlite"));
        config.ptm = true;
        config.pngasef = true;
        config.aa_freq = true;
        let mut converter = Converter::new(config)?;
        assert_eq!(converter.load()?, 6);

        let descriptor = converter.descriptor().unwrap();
        // base, 4 charges, enzyme, mass difference, ptm, PNGaseF, 20 residues, 3 attributes
        assert_eq!(descriptor.len(), 4 + 4 + 3 + 2 + 1 + 1 + 20 + 3);
        assert_eq!(descriptor.attribute_count(), 3);

        let scans: Vec<_> = converter
            .store()
            .iter_in_key_order()
            .collect::<Result<_, _>>()?;
        let numbers: Vec<u32> = scans.iter().map(|s| s.scan_number).collect();
        assert_eq!(numbers, vec![0, 1, 2, 3]);

        let counts: Vec<(usize, usize)> = scans
            .iter()
            .map(|s| {
                let decoys = s.matches.iter().filter(|m| m.is_decoy).count();
                (s.len() - decoys, decoys)
            })
            .collect();
        assert_eq!(counts, vec![(2, 1), (1, 0), (1, 1), (0, 1)]);
        assert_eq!(scans[2].experimental_mass_to_charge, 620.75);
        for scan in scans.iter() {
            for psm in scan.matches.iter() {
                assert_eq!(psm.features().len(), descriptor.len());
            }
        }

        let names: Vec<&str> = descriptor.names().collect();
        let pngasef = names.iter().position(|n| *n == "PNGaseF").unwrap();
        let deamidated = &scans[1].matches[0];
        assert_eq!(deamidated.peptide_sequence, "AANGTK");
        assert_eq!(deamidated.features()[pngasef], 1.0);
        assert_eq!(deamidated.features()[pngasef - 1], 1.0);

        let xcorr = names.iter().position(|n| *n == "sequest:xcorr").unwrap();
        assert_eq!(scans[0].matches[2].features()[xcorr], 0.9);
        assert_eq!(&names[names.len() - 3..], &["sequest:xcorr", "sequest:deltacn", "num matched ions"]);

        let mut buffer = Vec::new();
        assert_eq!(converter.write_document(&mut buffer)?, 4);
        Ok(())
    }

    #[test_log::test]
    fn test_schema_drift_aborts() {
        let mut buffer = Vec::new();
        let err = convert(config(&["target.mzid"], &["decoy_drift.mzid"]), &mut buffer).unwrap_err();
        match err {
            ConversionError::SchemaDrift { path, .. } => {
                assert!(path.ends_with("decoy_drift.mzid"))
            }
            other => panic!("Expected schema drift, got {other}"),
        }
        assert!(buffer.is_empty());
    }

    #[test_log::test]
    fn test_duplicate_peptide_aborts() {
        let mut buffer = Vec::new();
        let err = convert(config(&["duplicate_peptide.mzid"], &[]), &mut buffer).unwrap_err();
        match err {
            ConversionError::DuplicatePeptide { peptide_id, .. } => assert_eq!(peptide_id, "peptide_1"),
            other => panic!("Expected a duplicate peptide, got {other}"),
        }
        assert!(buffer.is_empty());
    }

    #[test_log::test]
    fn test_merge_conflict_aborts() {
        let mut buffer = Vec::new();
        let err = convert(config(&["target.mzid"], &["decoy_mz_conflict.mzid"]), &mut buffer)
            .unwrap_err();
        assert!(
            matches!(err, ConversionError::MergeInconsistency { .. }),
            "{err}"
        );
        assert!(buffer.is_empty());
    }

    #[test_log::test]
    fn test_failed_file_rolls_back() -> Result<(), ConversionError> {
        let mut converter =
            Converter::new(config(&["missing_calculated.mzid", "target.mzid"], &[]))?;
        let err = converter
            .load_file(&data("missing_calculated.mzid"), FileRole::Target)
            .unwrap_err();
        assert!(matches!(err, ConversionError::MissingField { .. }), "{err}");
        assert!(converter.store().is_empty());
        assert!(!converter.store().in_transaction());
        assert!(converter.descriptor().is_none());

        assert_eq!(converter.load_file(&data("target.mzid"), FileRole::Target)?, 3);
        let scans: Vec<_> = converter
            .store()
            .iter_in_key_order()
            .collect::<Result<_, _>>()?;
        let numbers: Vec<u32> = scans.iter().map(|s| s.scan_number).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
        assert_eq!(scans[0].len(), 2);
        assert_eq!(scans[0].matches[0].id, "SII_1_1");
        Ok(())
    }

    #[test_log::test]
    fn test_missing_fields_abort() {
        let err = convert(config(&["missing_calculated.mzid"], &[]), io::sink()).unwrap_err();
        assert!(matches!(err, ConversionError::MissingField { .. }), "{err}");

        let err = scan_charge_range(&data("empty_result.mzid")).unwrap_err();
        assert!(matches!(err, ConversionError::MissingField { .. }), "{err}");

        let err = convert(config(&["does_not_exist.mzid"], &[]), io::sink()).unwrap_err();
        let err: io::Error = err.into();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        assert!(matches!(
            Converter::new(ConversionConfig::default()),
            Err(ConversionError::NoInput)
        ));
    }
}
