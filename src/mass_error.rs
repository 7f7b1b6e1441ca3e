/// The spacing between the monoisotopic peak and the first C13 isotope
pub const C13_SPACING: f64 = 1.0033548378;

/// How the observed-minus-calculated precursor difference is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MassDifference {
    /// The plain m/z difference
    #[default]
    Exact,
    /// The difference with whole isotope errors removed, for searches that
    /// allowed the precursor to be picked off the monoisotopic peak
    IsotopeCorrected,
}

impl MassDifference {
    pub fn new(monoisotopic: bool) -> Self {
        if monoisotopic {
            Self::IsotopeCorrected
        } else {
            Self::Exact
        }
    }

    /// Compute the signed difference between the `observed` and `calculated` m/z
    /// of a precursor carrying `charge`.
    pub fn call(&self, observed: f64, calculated: f64, charge: i32) -> f64 {
        let delta = observed - calculated;
        match self {
            Self::Exact => delta,
            Self::IsotopeCorrected => {
                let spacing = C13_SPACING / (charge.unsigned_abs().max(1) as f64);
                delta - spacing * (delta / spacing).round()
            }
        }
    }
}
