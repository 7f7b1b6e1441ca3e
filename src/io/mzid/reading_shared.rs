use std::io;
use std::str::FromStr;

use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesEnd, BytesStart, BytesText};
use quick_xml::Error as XMLError;
use thiserror::Error;

use crate::params::Param;

/**
The different states the [`MzIdentMLReaderType`](super::MzIdentMLReaderType) can enter
while parsing different phases of the document. This information is mostly
needed to report where in the document an error occurred.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
pub enum MzIdentMLParserState {
    Start = 0,
    Resume,

    /// Inside an element whose content is not read
    Skipping,

    SequenceCollection,
    Peptide,
    PeptideSequence,
    SequenceCollectionDone,

    SpectrumIdentificationResult,
    SpectrumIdentificationItem,
    SpectrumIdentificationResultDone,

    EOF,
    ParserError,
}

/**
All the ways that mzIdentML parsing can go wrong
*/
#[derive(Debug, Error)]
pub enum MzIdentMLParserError {
    #[error("An error occurred outside of normal conditions {0:?}")]
    UnknownError(MzIdentMLParserState),
    #[error("An incomplete element {0} was encountered in {1:?}")]
    IncompleteElementError(String, MzIdentMLParserState),
    #[error("The {0} section was not found")]
    SectionNotFound(&'static str),
    #[error("The {0} section has already been read past")]
    SectionOver(&'static str),
    #[error("Required attribute {attribute} of {element} is missing in {state:?}")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
        state: MzIdentMLParserState,
    },
    #[error("Attribute {attribute}=\"{value}\" of {element} could not be parsed in {state:?}")]
    InvalidAttribute {
        element: &'static str,
        attribute: &'static str,
        value: String,
        state: MzIdentMLParserState,
    },
    #[error("An XML error {1} was encountered in {0:?}")]
    XMLError(MzIdentMLParserState, #[source] XMLError),
    #[error("An IO error {1} was encountered in {0:?}")]
    IOError(MzIdentMLParserState, #[source] io::Error),
}

impl MzIdentMLParserError {
    /// Whether the document is well formed but lacks something required
    pub fn is_missing_field(&self) -> bool {
        matches!(
            self,
            Self::SectionNotFound(_) | Self::MissingAttribute { .. }
        )
    }
}

impl From<MzIdentMLParserError> for io::Error {
    fn from(value: MzIdentMLParserError) -> Self {
        match value {
            MzIdentMLParserError::IOError(_, ref e) => io::Error::new(e.kind(), value),
            _ => io::Error::new(io::ErrorKind::InvalidData, value),
        }
    }
}

pub type ParserResult = Result<MzIdentMLParserState, MzIdentMLParserError>;

/**
Common XML error handling behaviors
*/
pub trait XMLParseBase {
    fn handle_xml_error(&self, error: XMLError, state: MzIdentMLParserState) -> MzIdentMLParserError {
        match error {
            XMLError::Io(e) => MzIdentMLParserError::IOError(state, io::Error::new(e.kind(), e)),
            _ => MzIdentMLParserError::XMLError(state, error),
        }
    }

    fn attribute_value(
        attr: &Attribute<'_>,
        state: MzIdentMLParserState,
    ) -> Result<String, MzIdentMLParserError> {
        attr.unescape_value()
            .map(|v| v.into_owned())
            .map_err(|e| MzIdentMLParserError::XMLError(state, e))
    }

    fn parse_attribute<T: FromStr>(
        element: &'static str,
        attribute: &'static str,
        value: String,
        state: MzIdentMLParserState,
    ) -> Result<T, MzIdentMLParserError> {
        value
            .trim()
            .parse::<T>()
            .map_err(|_| MzIdentMLParserError::InvalidAttribute {
                element,
                attribute,
                value,
                state,
            })
    }

    fn require<T>(
        value: Option<T>,
        element: &'static str,
        attribute: &'static str,
        state: MzIdentMLParserState,
    ) -> Result<T, MzIdentMLParserError> {
        value.ok_or(MzIdentMLParserError::MissingAttribute {
            element,
            attribute,
            state,
        })
    }
}

/**
Common `cvParam` and `userParam` parsing behaviors
*/
pub trait CVParamParse: XMLParseBase {
    fn handle_param(event: &BytesStart, state: MzIdentMLParserState) -> Result<Param, MzIdentMLParserError> {
        let mut param = Param::new();
        for attr_parsed in event.attributes() {
            let attr = attr_parsed.map_err(|e| MzIdentMLParserError::XMLError(state, e.into()))?;
            match attr.key.as_ref() {
                b"name" => param.name = Self::attribute_value(&attr, state)?,
                b"value" => param.value = Some(Self::attribute_value(&attr, state)?),
                _ => {}
            }
        }
        Ok(param)
    }
}

/// Tracks the depth of an element subtree whose content is ignored, and the
/// state to return to once it closes
#[derive(Debug, Clone, Copy)]
pub(crate) struct SubtreeSkip {
    depth: usize,
    resume: MzIdentMLParserState,
}

impl Default for SubtreeSkip {
    fn default() -> Self {
        Self {
            depth: 0,
            resume: MzIdentMLParserState::Resume,
        }
    }
}

impl SubtreeSkip {
    pub(crate) fn enter(&mut self, resume: MzIdentMLParserState) -> MzIdentMLParserState {
        self.depth = 1;
        self.resume = resume;
        MzIdentMLParserState::Skipping
    }

    pub(crate) fn descend(&mut self) -> MzIdentMLParserState {
        self.depth += 1;
        MzIdentMLParserState::Skipping
    }

    pub(crate) fn ascend(&mut self) -> MzIdentMLParserState {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.resume
        } else {
            MzIdentMLParserState::Skipping
        }
    }
}

/**
The SAX-style event handlers of an mzIdentML subtree builder
*/
pub trait MzIdentMLSAX {
    fn start_element(&mut self, event: &BytesStart, state: MzIdentMLParserState) -> ParserResult;

    fn empty_element(&mut self, event: &BytesStart, state: MzIdentMLParserState) -> ParserResult;

    fn end_element(&mut self, event: &BytesEnd, state: MzIdentMLParserState) -> ParserResult;

    fn text(&mut self, event: &BytesText, state: MzIdentMLParserState) -> ParserResult;

    /// The state that marks this builder's subtree as complete
    fn completion_state() -> MzIdentMLParserState;

    /// The element this builder reads, for error reporting
    fn element_name() -> &'static str;

    /// Whether the builder has entered its subtree
    fn is_started(&self) -> bool;
}
