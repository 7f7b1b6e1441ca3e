//! Feature naming and feature vector construction for peptide-spectrum matches.
//!
//! The feature list of a run is fixed by the first match of the first file.
//! Every later file must describe the same list, and every match must produce
//! a vector of exactly that length.
use std::fmt::Display;
use std::ops::RangeInclusive;

use thiserror::Error;

use crate::enzyme::Enzyme;
use crate::identification::{MatchCandidate, PeptideLookup, PeptideRecord};
use crate::mass_error::MassDifference;
use crate::params::ParamLike;
use crate::scan::PeptideSpectrumMatch;
use crate::sequence::{amino_acid_frequencies, count_ptms, is_pngasef, peptide_length, AMINO_ACIDS};

/// The inclusive span of precursor charge states observed across a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChargeRange {
    pub min: i32,
    pub max: i32,
}

impl ChargeRange {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn from_charge(charge: i32) -> Self {
        Self::new(charge, charge)
    }

    pub fn observe(self, charge: i32) -> Self {
        Self::new(self.min.min(charge), self.max.max(charge))
    }

    pub fn combine(self, other: Self) -> Self {
        Self::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn iter(&self) -> RangeInclusive<i32> {
        self.min..=self.max
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }
}

impl Display for ChargeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// The optional feature groups of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    pub enzyme: Enzyme,
    pub ptm: bool,
    pub pngasef: bool,
    pub aa_freq: bool,
    pub monoisotopic: bool,
}

#[derive(Debug, Error, PartialEq)]
pub enum FeatureError {
    #[error("Match {0} has no calculatedMassToCharge")]
    MissingCalculatedMass(String),
    #[error("Match {0} has no peptide reference")]
    MissingPeptideRef(String),
    #[error("Match {psm} references peptide {peptide_ref} which is not in the SequenceCollection")]
    UnknownPeptide { psm: String, peptide_ref: String },
    #[error("Match {0} has an empty peptide sequence")]
    EmptySequence(String),
    #[error("Attribute {name} of match {psm} has the non-numeric value \"{value}\"")]
    InvalidAttributeValue {
        psm: String,
        name: String,
        value: String,
    },
    #[error("Match {psm} has {found} valued attributes but the feature list expects {expected}")]
    AttributeCountMismatch {
        psm: String,
        expected: usize,
        found: usize,
    },
    #[error("Match {psm} produced {found} features but the feature list has {expected}")]
    VectorLengthMismatch {
        psm: String,
        expected: usize,
        found: usize,
    },
    #[error("Match {psm} has experimental m/z {found} but its spectrum has {expected}")]
    ExperimentalMassMismatch { psm: String, expected: f64, found: f64 },
    #[error("Feature list differs at position {position}: expected {expected:?}, found {found:?}")]
    DescriptorMismatch {
        position: usize,
        expected: Option<String>,
        found: Option<String>,
    },
}

impl FeatureError {
    /// Whether the error means a file disagrees with the run's feature list
    pub fn is_schema_drift(&self) -> bool {
        matches!(
            self,
            Self::AttributeCountMismatch { .. }
                | Self::VectorLengthMismatch { .. }
                | Self::DescriptorMismatch { .. }
        )
    }

    /// Whether the error means a required field is absent
    pub fn is_missing_field(&self) -> bool {
        matches!(
            self,
            Self::MissingCalculatedMass(_)
                | Self::MissingPeptideRef(_)
                | Self::UnknownPeptide { .. }
                | Self::EmptySequence(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureDescription {
    pub name: String,
}

impl FeatureDescription {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into() }
    }
}

/// The ordered feature names of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureDescriptor {
    descriptions: Vec<FeatureDescription>,
    attribute_count: usize,
}

impl FeatureDescriptor {
    /// Name the features of `reference`. The trailing attribute features come
    /// from its valued `cvParam`s and then its valued `userParam`s.
    pub fn from_reference_match(
        reference: &MatchCandidate,
        charge_range: ChargeRange,
        flags: &FeatureFlags,
    ) -> Self {
        let mut descriptions: Vec<FeatureDescription> = ["deltCn", "IonFrac", "Mass", "PepLen"]
            .into_iter()
            .map(FeatureDescription::new)
            .collect();
        descriptions.extend(
            charge_range
                .iter()
                .map(|c| FeatureDescription::new(format!("Charge{c}"))),
        );
        if flags.enzyme.is_enabled() {
            descriptions.extend(["enzN", "enzC", "enzInt"].map(FeatureDescription::new));
        }
        descriptions.extend(["dM", "absdM"].map(FeatureDescription::new));
        if flags.ptm {
            descriptions.push(FeatureDescription::new("ptm"));
        }
        if flags.pngasef {
            descriptions.push(FeatureDescription::new("PNGaseF"));
        }
        if flags.aa_freq {
            descriptions.extend(
                AMINO_ACIDS
                    .chars()
                    .map(|aa| FeatureDescription::new(format!("{aa}-Freq"))),
            );
        }

        let before = descriptions.len();
        descriptions.extend(
            reference
                .cv_params
                .iter()
                .chain(reference.user_params.iter())
                .filter(|p| p.has_value())
                .map(|p| FeatureDescription::new(p.name())),
        );
        let attribute_count = descriptions.len() - before;
        Self {
            descriptions,
            attribute_count,
        }
    }

    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }

    /// The number of trailing features read from match attributes
    pub fn attribute_count(&self) -> usize {
        self.attribute_count
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FeatureDescription> {
        self.descriptions.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptions.iter().map(|d| d.name.as_str())
    }

    /// Check that `other` names the same features in the same order
    pub fn check_consistent(&self, other: &Self) -> Result<(), FeatureError> {
        let n = self.len().max(other.len());
        for position in 0..n {
            let expected = self.descriptions.get(position);
            let found = other.descriptions.get(position);
            if expected != found {
                return Err(FeatureError::DescriptorMismatch {
                    position,
                    expected: expected.map(|d| d.name.clone()),
                    found: found.map(|d| d.name.clone()),
                });
            }
        }
        Ok(())
    }
}

fn indicator(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Builds feature vectors for the matches of one file
#[derive(Debug, Clone)]
pub struct FeatureVectorBuilder<'a> {
    lookup: &'a PeptideLookup,
    charge_range: ChargeRange,
    flags: &'a FeatureFlags,
    descriptor: &'a FeatureDescriptor,
    mass_difference: MassDifference,
}

impl<'a> FeatureVectorBuilder<'a> {
    pub fn new(
        lookup: &'a PeptideLookup,
        charge_range: ChargeRange,
        flags: &'a FeatureFlags,
        descriptor: &'a FeatureDescriptor,
    ) -> Self {
        Self {
            lookup,
            charge_range,
            flags,
            descriptor,
            mass_difference: MassDifference::new(flags.monoisotopic),
        }
    }

    /// Build the annotated match for `candidate`, a match against a spectrum
    /// whose precursor m/z is `experimental_mass_to_charge`
    pub fn build(
        &self,
        candidate: &MatchCandidate,
        experimental_mass_to_charge: f64,
        is_decoy: bool,
    ) -> Result<PeptideSpectrumMatch, FeatureError> {
        if candidate.experimental_mass_to_charge != experimental_mass_to_charge {
            return Err(FeatureError::ExperimentalMassMismatch {
                psm: candidate.id.clone(),
                expected: experimental_mass_to_charge,
                found: candidate.experimental_mass_to_charge,
            });
        }
        let calculated = candidate
            .calculated_mass_to_charge
            .ok_or_else(|| FeatureError::MissingCalculatedMass(candidate.id.clone()))?;
        let peptide_ref = candidate
            .peptide_ref
            .as_deref()
            .ok_or_else(|| FeatureError::MissingPeptideRef(candidate.id.clone()))?;
        let peptide = self
            .lookup
            .get(peptide_ref)
            .ok_or_else(|| FeatureError::UnknownPeptide {
                psm: candidate.id.clone(),
                peptide_ref: peptide_ref.to_string(),
            })?;

        let features = self.feature_vector(candidate, peptide, calculated, is_decoy)?;
        PeptideSpectrumMatch::from_candidate(
            candidate,
            peptide,
            calculated,
            is_decoy,
            features,
            self.descriptor,
        )
    }

    pub fn feature_vector(
        &self,
        candidate: &MatchCandidate,
        peptide: &PeptideRecord,
        calculated_mass_to_charge: f64,
        is_decoy: bool,
    ) -> Result<Vec<f64>, FeatureError> {
        let sequence = peptide.sequence.as_str();
        let (first, last) = match (sequence.chars().next(), sequence.chars().last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(FeatureError::EmptySequence(candidate.id.clone())),
        };

        let mut features = Vec::with_capacity(self.descriptor.len());
        features.push(0.0);
        features.push(0.0);
        features.push(candidate.experimental_mass_to_charge * candidate.charge_state as f64);
        features.push(peptide_length(sequence) as f64);
        features.extend(
            self.charge_range
                .iter()
                .map(|c| indicator(c == candidate.charge_state)),
        );

        let enzyme = self.flags.enzyme;
        if enzyme.is_enabled() {
            let flanks = self.lookup.flanks_for(candidate);
            features.push(indicator(enzyme.is_enzymatic(flanks.n_term, first)));
            features.push(indicator(enzyme.is_enzymatic(last, flanks.c_term)));
            features.push(enzyme.count_enzymatic(sequence) as f64);
        }

        let dm = self.mass_difference.call(
            candidate.experimental_mass_to_charge,
            calculated_mass_to_charge,
            candidate.charge_state,
        );
        features.push(dm);
        features.push(dm.abs());

        if self.flags.ptm {
            features.push(count_ptms(peptide) as f64);
        }
        if self.flags.pngasef {
            features.push(indicator(is_pngasef(peptide, is_decoy)));
        }
        if self.flags.aa_freq {
            features.extend(amino_acid_frequencies(sequence));
        }

        let attributes_start = features.len();
        for param in candidate.cv_params.iter().chain(candidate.user_params.iter()) {
            if let Some(parsed) = param.to_f64() {
                let value = parsed.map_err(|_| FeatureError::InvalidAttributeValue {
                    psm: candidate.id.clone(),
                    name: param.name().to_string(),
                    value: param.value().unwrap_or_default().to_string(),
                })?;
                features.push(value);
            }
        }
        let found = features.len() - attributes_start;
        if found != self.descriptor.attribute_count() {
            return Err(FeatureError::AttributeCountMismatch {
                psm: candidate.id.clone(),
                expected: self.descriptor.attribute_count(),
                found,
            });
        }
        Ok(features)
    }
}
