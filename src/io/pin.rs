//! A streaming writer for Percolator's `percolator_in` XML format.
mod writer;

pub use writer::{
    PinWriter, PinWriterError, PinWriterState, PinWriterType, WriterResult,
    PERCOLATOR_IN_NAMESPACE,
};
