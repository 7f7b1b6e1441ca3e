//! Reading mzIdentML identifications and writing `percolator_in` documents.
pub mod mzid;
pub mod pin;

pub use crate::io::mzid::{MzIdentMLParserError, MzIdentMLReader, MzIdentMLReaderType};
pub use crate::io::pin::{PinWriter, PinWriterError, PinWriterType};
