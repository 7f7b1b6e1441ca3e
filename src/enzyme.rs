//! Cleavage rules used to derive the enzymatic-terminus features.
use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

/// The marker mzIdentML uses for a protein terminus in `pre`/`post`
pub const TERMINUS: char = '-';

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Enzyme {
    NoEnzyme,
    Elastase,
    Chymotrypsin,
    #[default]
    Trypsin,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown enzyme \"{0}\", expected one of no_enzyme, elastase, chymotrypsin, trypsin")]
pub struct EnzymeParseError(pub String);

impl Enzyme {
    /// Whether this rule contributes the `enzN`, `enzC` and `enzInt` features
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::NoEnzyme)
    }

    /// The name written to the `enzyme` element of the output header
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::NoEnzyme => "no enzyme",
            Self::Elastase => "elastase",
            Self::Chymotrypsin => "chymotrypsin",
            Self::Trypsin => "trypsin",
        }
    }

    /// Whether the bond between residue `n` and residue `c` is a cleavage site.
    pub fn is_enzymatic(&self, n: char, c: char) -> bool {
        if n == TERMINUS || c == TERMINUS {
            return true;
        }
        match self {
            Self::NoEnzyme => true,
            Self::Trypsin => matches!(n, 'K' | 'R') && c != 'P',
            Self::Chymotrypsin => matches!(n, 'F' | 'H' | 'W' | 'Y' | 'L' | 'M') && c != 'P',
            Self::Elastase => matches!(n, 'L' | 'V' | 'A' | 'G') && c != 'P',
        }
    }

    /// Count the cleavage sites between consecutive residues of `sequence`
    pub fn count_enzymatic(&self, sequence: &str) -> usize {
        sequence
            .chars()
            .zip(sequence.chars().skip(1))
            .filter(|(n, c)| self.is_enzymatic(*n, *c))
            .count()
    }
}

impl Display for Enzyme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Enzyme {
    type Err = EnzymeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "no_enzyme" | "none" => Ok(Self::NoEnzyme),
            "elastase" => Ok(Self::Elastase),
            "chymotrypsin" => Ok(Self::Chymotrypsin),
            "trypsin" => Ok(Self::Trypsin),
            _ => Err(EnzymeParseError(s.to_string())),
        }
    }
}
