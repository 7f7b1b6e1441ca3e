//! In-memory records for the parts of an mzIdentML document the converter reads.
use std::collections::HashMap;
use std::io::Read;

use thiserror::Error;

use crate::enzyme::TERMINUS;
use crate::io::mzid::{MzIdentMLParserError, MzIdentMLReaderType};
use crate::params::Param;

/// The monoisotopic mass shift of asparagine deamidation
pub const DEAMIDATION_MASS_DELTA: f64 = 0.984016;

/// A `Modification` on a `Peptide`. `location` follows mzIdentML: 0 is the
/// N-terminus, 1 to n are residues and n + 1 is the C-terminus.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeptideModification {
    pub location: Option<usize>,
    pub monoisotopic_mass_delta: Option<f64>,
    pub residues: String,
}

impl PeptideModification {
    pub fn is_deamidation(&self) -> bool {
        self.monoisotopic_mass_delta
            .is_some_and(|delta| (delta - DEAMIDATION_MASS_DELTA).abs() < 0.01)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeptideRecord {
    pub id: String,
    pub sequence: String,
    pub modifications: Vec<PeptideModification>,
}

impl PeptideRecord {
    pub fn new(id: String, sequence: String) -> Self {
        Self {
            id,
            sequence,
            modifications: Vec::new(),
        }
    }

    /// The modifications on the residue at zero-based `index`
    pub fn modifications_at(&self, index: usize) -> impl Iterator<Item = &PeptideModification> {
        self.modifications
            .iter()
            .filter(move |m| m.location == Some(index + 1))
    }
}

/// The residues either side of a peptide in its parent protein
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flanks {
    pub n_term: char,
    pub c_term: char,
}

impl Default for Flanks {
    fn default() -> Self {
        Self {
            n_term: TERMINUS,
            c_term: TERMINUS,
        }
    }
}

impl Flanks {
    /// Build from `pre` and `post` attribute values, where anything other than
    /// a single residue letter marks a terminus
    pub fn from_attributes(pre: Option<&str>, post: Option<&str>) -> Self {
        fn residue(value: Option<&str>) -> char {
            value
                .and_then(|v| v.trim().chars().next())
                .filter(|c| c.is_ascii_alphabetic())
                .unwrap_or(TERMINUS)
        }
        Self {
            n_term: residue(pre),
            c_term: residue(post),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeptideEvidence {
    pub id: String,
    pub flanks: Flanks,
}

/// Everything read out of a `SequenceCollection`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeptideCollection {
    pub peptides: Vec<PeptideRecord>,
    pub evidence: Vec<PeptideEvidence>,
}

/// One `SpectrumIdentificationItem`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchCandidate {
    pub id: String,
    pub peptide_ref: Option<String>,
    pub rank: u32,
    pub charge_state: i32,
    pub experimental_mass_to_charge: f64,
    pub calculated_mass_to_charge: Option<f64>,
    /// Flanks of the first nested `PeptideEvidence` (mzIdentML 1.0)
    pub flanks: Option<Flanks>,
    /// `PeptideEvidenceRef` targets (mzIdentML 1.1)
    pub evidence_refs: Vec<String>,
    pub cv_params: Vec<Param>,
    pub user_params: Vec<Param>,
}

/// One `SpectrumIdentificationResult`, the candidate matches for one spectrum
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrumResult {
    pub id: String,
    pub matches: Vec<MatchCandidate>,
}

impl SpectrumResult {
    /// The precursor m/z of the spectrum, taken from its first match
    pub fn experimental_mass_to_charge(&self) -> Option<f64> {
        self.matches.first().map(|m| m.experimental_mass_to_charge)
    }
}

#[derive(Debug, Error)]
pub enum PeptideLookupError {
    #[error("Peptide identifier {0} occurs more than once")]
    DuplicatePeptide(String),
    #[error(transparent)]
    ParserError(#[from] MzIdentMLParserError),
}

/// Resolves peptide and evidence references for one input file
#[derive(Debug, Default, Clone)]
pub struct PeptideLookup {
    peptides: HashMap<String, PeptideRecord>,
    evidence: HashMap<String, Flanks>,
}

impl PeptideLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the `SequenceCollection` of `reader` into a fresh lookup
    pub fn from_reader<R: Read>(
        reader: &mut MzIdentMLReaderType<R>,
    ) -> Result<Self, PeptideLookupError> {
        let collection = reader.read_peptide_collection()?;
        Self::from_collection(collection)
    }

    pub fn from_collection(collection: PeptideCollection) -> Result<Self, PeptideLookupError> {
        let mut this = Self::new();
        for peptide in collection.peptides {
            this.insert(peptide)?;
        }
        for evidence in collection.evidence {
            this.evidence.insert(evidence.id, evidence.flanks);
        }
        Ok(this)
    }

    pub fn insert(&mut self, peptide: PeptideRecord) -> Result<(), PeptideLookupError> {
        if self.peptides.contains_key(&peptide.id) {
            return Err(PeptideLookupError::DuplicatePeptide(peptide.id));
        }
        self.peptides.insert(peptide.id.clone(), peptide);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&PeptideRecord> {
        self.peptides.get(id)
    }

    /// The flanks of the candidate's first peptide evidence, nested or referenced
    pub fn flanks_for(&self, candidate: &MatchCandidate) -> Flanks {
        if let Some(flanks) = candidate.flanks {
            return flanks;
        }
        candidate
            .evidence_refs
            .first()
            .and_then(|id| self.evidence.get(id))
            .copied()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.peptides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peptides.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_duplicate_peptide() {
        let collection = PeptideCollection {
            peptides: vec![
                PeptideRecord::new("PEP_1".into(), "PEPTIDE".into()),
                PeptideRecord::new("PEP_1".into(), "PEPTIDES".into()),
            ],
            evidence: Vec::new(),
        };
        match PeptideLookup::from_collection(collection) {
            Err(PeptideLookupError::DuplicatePeptide(id)) => assert_eq!(id, "PEP_1"),
            other => panic!("Expected a duplicate peptide error, got {other:?}"),
        }
    }

    #[test]
    fn test_flank_resolution() {
        let collection = PeptideCollection {
            peptides: vec![PeptideRecord::new("PEP_1".into(), "PEPTIDE".into())],
            evidence: vec![PeptideEvidence {
                id: "PE_1".into(),
                flanks: Flanks::from_attributes(Some("K"), Some("-")),
            }],
        };
        let lookup = PeptideLookup::from_collection(collection).unwrap();
        assert_eq!(lookup.len(), 1);

        let mut candidate = MatchCandidate {
            peptide_ref: Some("PEP_1".into()),
            evidence_refs: vec!["PE_1".into()],
            ..Default::default()
        };
        assert_eq!(lookup.get("PEP_1").unwrap().sequence, "PEPTIDE");
        assert_eq!(
            lookup.flanks_for(&candidate),
            Flanks {
                n_term: 'K',
                c_term: '-'
            }
        );

        candidate.flanks = Some(Flanks::from_attributes(Some("R"), Some("A")));
        assert_eq!(lookup.flanks_for(&candidate).n_term, 'R');

        candidate.flanks = None;
        candidate.evidence_refs.clear();
        assert_eq!(lookup.flanks_for(&candidate), Flanks::default());
        assert!(lookup.get("PEP_2").is_none());
    }
}
