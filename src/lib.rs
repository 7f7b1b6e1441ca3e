//! Convert mzIdentML search results into a `percolator_in` document.
//!
//! Target and decoy files are read in two passes. The first finds the charge
//! states of the run and the second builds one feature vector per
//! peptide-spectrum match, merging matches against the same spectrum into a
//! single scan. See [`convert::Converter`] for the driver.
pub mod convert;
pub mod enzyme;
pub mod features;
pub mod identification;
pub mod io;
pub mod mass_error;
pub mod params;
pub mod scan;
pub mod sequence;
pub mod store;

pub use crate::convert::{convert, ConversionConfig, ConversionError, Converter, FileRole};
pub use crate::enzyme::Enzyme;
pub use crate::features::{ChargeRange, FeatureDescriptor, FeatureFlags, FeatureVectorBuilder};
pub use crate::mass_error::MassDifference;
pub use crate::scan::{PeptideSpectrumMatch, SpectrumScan};

pub use crate::io::mzid::MzIdentMLReader;
pub use crate::io::pin::PinWriter;
