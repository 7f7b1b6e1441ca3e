//! Sequence-derived features: length, modification count, glycosylation
//! and residue composition.
use crate::identification::PeptideRecord;

/// The standard residues, in the order their frequency features are emitted
pub const AMINO_ACIDS: &str = "ACDEFGHIKLMNPQRSTVWY";

pub fn is_amino_acid(residue: char) -> bool {
    AMINO_ACIDS.contains(residue)
}

/// Count the standard residues in `sequence`
pub fn peptide_length(sequence: &str) -> usize {
    sequence.chars().filter(|c| is_amino_acid(*c)).count()
}

pub fn count_ptms(peptide: &PeptideRecord) -> usize {
    peptide.modifications.len()
}

/// Whether the peptide carries a deamidated asparagine inside an N-X-[ST]
/// sequon, the signature of PNGase F deglycosylation. Decoy sequences are
/// reversed, so their sequon reads [ST]-X-N.
pub fn is_pngasef(peptide: &PeptideRecord, is_decoy: bool) -> bool {
    let residues: Vec<char> = peptide.sequence.chars().collect();
    residues.iter().enumerate().any(|(i, residue)| {
        if *residue != 'N' || !peptide.modifications_at(i).any(|m| m.is_deamidation()) {
            return false;
        }
        if is_decoy {
            i >= 2 && residues[i - 1] != 'P' && matches!(residues[i - 2], 'S' | 'T')
        } else {
            i + 2 < residues.len()
                && residues[i + 1] != 'P'
                && matches!(residues[i + 2], 'S' | 'T')
        }
    })
}

/// The fraction of the sequence made up by each standard residue, in
/// [`AMINO_ACIDS`] order
pub fn amino_acid_frequencies(sequence: &str) -> [f64; 20] {
    let mut counts = [0usize; 20];
    let mut total = 0usize;
    for c in sequence.chars() {
        total += 1;
        if let Some(i) = AMINO_ACIDS.find(c) {
            counts[i] += 1;
        }
    }
    let mut freqs = [0.0; 20];
    if total == 0 {
        return freqs;
    }
    for (f, n) in freqs.iter_mut().zip(counts) {
        *f = n as f64 / total as f64;
    }
    freqs
}
