//! A streaming reader for mzIdentML identification documents.
mod reader;
mod reading_shared;

pub use reader::{
    MzIdentMLReader, MzIdentMLReaderType, PeptideBuilder, ResultIter, SpectrumResultBuilder,
};
pub use reading_shared::{MzIdentMLParserError, MzIdentMLParserState, MzIdentMLSAX};
