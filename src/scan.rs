//! The merged per-spectrum records written to the output document.
use serde::{Deserialize, Serialize};

use crate::features::{FeatureDescriptor, FeatureError};
use crate::identification::{MatchCandidate, PeptideRecord};

/// A feature-annotated peptide-spectrum match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeptideSpectrumMatch {
    pub id: String,
    pub is_decoy: bool,
    pub peptide_sequence: String,
    pub charge_state: i32,
    pub calculated_mass_to_charge: f64,
    pub experimental_mass_to_charge: f64,
    features: Vec<f64>,
}

impl PeptideSpectrumMatch {
    /// Build the match for `candidate`, rejecting a feature vector whose
    /// length differs from `descriptor`
    pub fn from_candidate(
        candidate: &MatchCandidate,
        peptide: &PeptideRecord,
        calculated_mass_to_charge: f64,
        is_decoy: bool,
        features: Vec<f64>,
        descriptor: &FeatureDescriptor,
    ) -> Result<Self, FeatureError> {
        if features.len() != descriptor.len() {
            return Err(FeatureError::VectorLengthMismatch {
                psm: candidate.id.clone(),
                expected: descriptor.len(),
                found: features.len(),
            });
        }
        Ok(Self {
            id: candidate.id.clone(),
            is_decoy,
            peptide_sequence: peptide.sequence.clone(),
            charge_state: candidate.charge_state,
            calculated_mass_to_charge,
            experimental_mass_to_charge: candidate.experimental_mass_to_charge,
            features,
        })
    }

    pub fn features(&self) -> &[f64] {
        &self.features
    }
}

/// All matches against one spectrum, across every input file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumScan {
    pub scan_number: u32,
    pub experimental_mass_to_charge: f64,
    pub matches: Vec<PeptideSpectrumMatch>,
}

impl SpectrumScan {
    pub fn new(scan_number: u32, experimental_mass_to_charge: f64) -> Self {
        Self {
            scan_number,
            experimental_mass_to_charge,
            matches: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}
