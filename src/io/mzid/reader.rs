use std::fs;
use std::io::{self, prelude::*, BufReader};
use std::path::Path;

use log::{trace, warn};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Reader;

use super::reading_shared::{
    CVParamParse, MzIdentMLParserError, MzIdentMLParserState, MzIdentMLSAX, ParserResult,
    SubtreeSkip, XMLParseBase,
};
use crate::identification::{
    Flanks, MatchCandidate, PeptideCollection, PeptideEvidence, PeptideModification,
    PeptideRecord, SpectrumResult,
};

pub type Bytes = Vec<u8>;

const BUFFER_SIZE: usize = 10000;

/// Reads the `Peptide` and `PeptideEvidence` entries of a `SequenceCollection`
#[derive(Debug, Default)]
pub struct PeptideBuilder {
    collection: PeptideCollection,
    current: Option<PeptideRecord>,
    skip: SubtreeSkip,
    started: bool,
}

impl XMLParseBase for PeptideBuilder {}
impl CVParamParse for PeptideBuilder {}

impl PeptideBuilder {
    pub fn into_collection(self) -> PeptideCollection {
        self.collection
    }

    fn parse_peptide(event: &BytesStart, state: MzIdentMLParserState) -> Result<PeptideRecord, MzIdentMLParserError> {
        let mut id = None;
        for attr_parsed in event.attributes() {
            let attr = attr_parsed.map_err(|e| MzIdentMLParserError::XMLError(state, e.into()))?;
            if attr.key.as_ref() == b"id" {
                id = Some(Self::attribute_value(&attr, state)?);
            }
        }
        let id = Self::require(id, "Peptide", "id", state)?;
        Ok(PeptideRecord::new(id, String::new()))
    }

    fn parse_modification(
        event: &BytesStart,
        state: MzIdentMLParserState,
    ) -> Result<PeptideModification, MzIdentMLParserError> {
        let mut modification = PeptideModification::default();
        for attr_parsed in event.attributes() {
            let attr = attr_parsed.map_err(|e| MzIdentMLParserError::XMLError(state, e.into()))?;
            match attr.key.as_ref() {
                b"location" => {
                    let value = Self::attribute_value(&attr, state)?;
                    modification.location =
                        Some(Self::parse_attribute("Modification", "location", value, state)?);
                }
                b"monoisotopicMassDelta" => {
                    let value = Self::attribute_value(&attr, state)?;
                    modification.monoisotopic_mass_delta = Some(Self::parse_attribute(
                        "Modification",
                        "monoisotopicMassDelta",
                        value,
                        state,
                    )?);
                }
                b"residues" => modification.residues = Self::attribute_value(&attr, state)?,
                _ => {}
            }
        }
        Ok(modification)
    }

    fn parse_evidence(event: &BytesStart, state: MzIdentMLParserState) -> Result<PeptideEvidence, MzIdentMLParserError> {
        let mut id = None;
        let mut pre = None;
        let mut post = None;
        for attr_parsed in event.attributes() {
            let attr = attr_parsed.map_err(|e| MzIdentMLParserError::XMLError(state, e.into()))?;
            match attr.key.as_ref() {
                b"id" => id = Some(Self::attribute_value(&attr, state)?),
                b"pre" => pre = Some(Self::attribute_value(&attr, state)?),
                b"post" => post = Some(Self::attribute_value(&attr, state)?),
                _ => {}
            }
        }
        Ok(PeptideEvidence {
            id: Self::require(id, "PeptideEvidence", "id", state)?,
            flanks: Flanks::from_attributes(pre.as_deref(), post.as_deref()),
        })
    }

    fn push_modification(&mut self, event: &BytesStart, state: MzIdentMLParserState) -> Result<(), MzIdentMLParserError> {
        let modification = Self::parse_modification(event, state)?;
        if let Some(peptide) = self.current.as_mut() {
            peptide.modifications.push(modification);
        }
        Ok(())
    }
}

impl MzIdentMLSAX for PeptideBuilder {
    fn start_element(&mut self, event: &BytesStart, state: MzIdentMLParserState) -> ParserResult {
        let elt_name = event.local_name();
        match state {
            MzIdentMLParserState::Skipping => Ok(self.skip.descend()),
            MzIdentMLParserState::SequenceCollection => match elt_name.as_ref() {
                b"Peptide" => {
                    self.current = Some(Self::parse_peptide(event, state)?);
                    Ok(MzIdentMLParserState::Peptide)
                }
                b"PeptideEvidence" => {
                    self.collection.evidence.push(Self::parse_evidence(event, state)?);
                    Ok(self.skip.enter(state))
                }
                _ => Ok(self.skip.enter(state)),
            },
            MzIdentMLParserState::Peptide => match elt_name.as_ref() {
                b"PeptideSequence" | b"peptideSequence" => Ok(MzIdentMLParserState::PeptideSequence),
                b"Modification" => {
                    self.push_modification(event, state)?;
                    Ok(self.skip.enter(state))
                }
                _ => Ok(self.skip.enter(state)),
            },
            MzIdentMLParserState::PeptideSequence => Ok(self.skip.enter(state)),
            _ => {
                if elt_name.as_ref() == b"SequenceCollection" {
                    self.started = true;
                    Ok(MzIdentMLParserState::SequenceCollection)
                } else {
                    Ok(state)
                }
            }
        }
    }

    fn empty_element(&mut self, event: &BytesStart, state: MzIdentMLParserState) -> ParserResult {
        let elt_name = event.local_name();
        match state {
            MzIdentMLParserState::SequenceCollection => match elt_name.as_ref() {
                b"Peptide" => {
                    let peptide = Self::parse_peptide(event, state)?;
                    self.collection.peptides.push(peptide);
                }
                b"PeptideEvidence" => {
                    self.collection.evidence.push(Self::parse_evidence(event, state)?);
                }
                _ => {}
            },
            MzIdentMLParserState::Peptide => {
                if elt_name.as_ref() == b"Modification" {
                    self.push_modification(event, state)?;
                }
            }
            MzIdentMLParserState::Skipping | MzIdentMLParserState::PeptideSequence => {}
            _ => {
                if elt_name.as_ref() == b"SequenceCollection" {
                    self.started = true;
                    return Ok(MzIdentMLParserState::SequenceCollectionDone);
                }
            }
        }
        Ok(state)
    }

    fn end_element(&mut self, _event: &BytesEnd, state: MzIdentMLParserState) -> ParserResult {
        match state {
            MzIdentMLParserState::Skipping => Ok(self.skip.ascend()),
            MzIdentMLParserState::PeptideSequence => Ok(MzIdentMLParserState::Peptide),
            MzIdentMLParserState::Peptide => {
                if let Some(peptide) = self.current.take() {
                    trace!("Read peptide {} = {}", peptide.id, peptide.sequence);
                    self.collection.peptides.push(peptide);
                }
                Ok(MzIdentMLParserState::SequenceCollection)
            }
            MzIdentMLParserState::SequenceCollection => Ok(MzIdentMLParserState::SequenceCollectionDone),
            _ => Ok(state),
        }
    }

    fn text(&mut self, event: &BytesText, state: MzIdentMLParserState) -> ParserResult {
        if state == MzIdentMLParserState::PeptideSequence {
            let text = event
                .unescape()
                .map_err(|e| self.handle_xml_error(e, state))?;
            if let Some(peptide) = self.current.as_mut() {
                peptide.sequence.extend(text.chars().filter(|c| !c.is_whitespace()));
            }
        }
        Ok(state)
    }

    fn completion_state() -> MzIdentMLParserState {
        MzIdentMLParserState::SequenceCollectionDone
    }

    fn element_name() -> &'static str {
        "SequenceCollection"
    }

    fn is_started(&self) -> bool {
        self.started
    }
}

/// Reads one `SpectrumIdentificationResult` and the items directly inside it
#[derive(Debug, Default)]
pub struct SpectrumResultBuilder {
    result: SpectrumResult,
    current: Option<MatchCandidate>,
    skip: SubtreeSkip,
    started: bool,
}

impl XMLParseBase for SpectrumResultBuilder {}
impl CVParamParse for SpectrumResultBuilder {}

impl SpectrumResultBuilder {
    pub fn into_result(self) -> SpectrumResult {
        self.result
    }

    fn begin_result(&mut self, event: &BytesStart, state: MzIdentMLParserState) -> Result<(), MzIdentMLParserError> {
        let mut id = None;
        for attr_parsed in event.attributes() {
            let attr = attr_parsed.map_err(|e| MzIdentMLParserError::XMLError(state, e.into()))?;
            if attr.key.as_ref() == b"id" {
                id = Some(Self::attribute_value(&attr, state)?);
            }
        }
        self.result.id = Self::require(id, "SpectrumIdentificationResult", "id", state)?;
        self.started = true;
        trace!("Reading result {}", self.result.id);
        Ok(())
    }

    fn parse_item(event: &BytesStart, state: MzIdentMLParserState) -> Result<MatchCandidate, MzIdentMLParserError> {
        const ELT: &str = "SpectrumIdentificationItem";
        let mut candidate = MatchCandidate::default();
        let mut id = None;
        let mut charge = None;
        let mut experimental = None;
        for attr_parsed in event.attributes() {
            let attr = attr_parsed.map_err(|e| MzIdentMLParserError::XMLError(state, e.into()))?;
            match attr.key.as_ref() {
                b"id" => id = Some(Self::attribute_value(&attr, state)?),
                b"chargeState" => {
                    let value = Self::attribute_value(&attr, state)?;
                    charge = Some(Self::parse_attribute(ELT, "chargeState", value, state)?);
                }
                b"experimentalMassToCharge" => {
                    let value = Self::attribute_value(&attr, state)?;
                    experimental =
                        Some(Self::parse_attribute(ELT, "experimentalMassToCharge", value, state)?);
                }
                b"calculatedMassToCharge" => {
                    let value = Self::attribute_value(&attr, state)?;
                    candidate.calculated_mass_to_charge =
                        Some(Self::parse_attribute(ELT, "calculatedMassToCharge", value, state)?);
                }
                b"Peptide_ref" | b"peptide_ref" => {
                    candidate.peptide_ref = Some(Self::attribute_value(&attr, state)?);
                }
                b"rank" => {
                    let value = Self::attribute_value(&attr, state)?;
                    candidate.rank = Self::parse_attribute(ELT, "rank", value, state)?;
                }
                _ => {}
            }
        }
        candidate.id = Self::require(id, ELT, "id", state)?;
        candidate.charge_state = Self::require(charge, ELT, "chargeState", state)?;
        candidate.experimental_mass_to_charge =
            Self::require(experimental, ELT, "experimentalMassToCharge", state)?;
        Ok(candidate)
    }

    fn item_child(&mut self, event: &BytesStart, state: MzIdentMLParserState) -> Result<(), MzIdentMLParserError> {
        let Some(candidate) = self.current.as_mut() else {
            return Ok(());
        };
        match event.local_name().as_ref() {
            b"cvParam" => candidate.cv_params.push(Self::handle_param(event, state)?),
            b"userParam" => candidate.user_params.push(Self::handle_param(event, state)?),
            b"PeptideEvidence" => {
                if candidate.flanks.is_none() {
                    candidate.flanks = Some(PeptideBuilder::parse_evidence(event, state)?.flanks);
                }
            }
            b"PeptideEvidenceRef" => {
                for attr_parsed in event.attributes() {
                    let attr = attr_parsed.map_err(|e| MzIdentMLParserError::XMLError(state, e.into()))?;
                    if attr.key.as_ref() == b"peptideEvidence_ref" {
                        candidate.evidence_refs.push(Self::attribute_value(&attr, state)?);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn finish_item(&mut self) {
        if let Some(candidate) = self.current.take() {
            self.result.matches.push(candidate);
        }
    }
}

impl MzIdentMLSAX for SpectrumResultBuilder {
    fn start_element(&mut self, event: &BytesStart, state: MzIdentMLParserState) -> ParserResult {
        let elt_name = event.local_name();
        match state {
            MzIdentMLParserState::Skipping => Ok(self.skip.descend()),
            MzIdentMLParserState::SpectrumIdentificationResult => match elt_name.as_ref() {
                b"SpectrumIdentificationItem" => {
                    self.current = Some(Self::parse_item(event, state)?);
                    Ok(MzIdentMLParserState::SpectrumIdentificationItem)
                }
                _ => Ok(self.skip.enter(state)),
            },
            MzIdentMLParserState::SpectrumIdentificationItem => {
                self.item_child(event, state)?;
                Ok(self.skip.enter(state))
            }
            _ => {
                if elt_name.as_ref() == b"SpectrumIdentificationResult" {
                    self.begin_result(event, state)?;
                    Ok(MzIdentMLParserState::SpectrumIdentificationResult)
                } else {
                    Ok(state)
                }
            }
        }
    }

    fn empty_element(&mut self, event: &BytesStart, state: MzIdentMLParserState) -> ParserResult {
        let elt_name = event.local_name();
        match state {
            MzIdentMLParserState::Skipping => Ok(state),
            MzIdentMLParserState::SpectrumIdentificationResult => {
                if elt_name.as_ref() == b"SpectrumIdentificationItem" {
                    self.current = Some(Self::parse_item(event, state)?);
                    self.finish_item();
                }
                Ok(state)
            }
            MzIdentMLParserState::SpectrumIdentificationItem => {
                self.item_child(event, state)?;
                Ok(state)
            }
            _ => {
                if elt_name.as_ref() == b"SpectrumIdentificationResult" {
                    self.begin_result(event, state)?;
                    Ok(MzIdentMLParserState::SpectrumIdentificationResultDone)
                } else {
                    Ok(state)
                }
            }
        }
    }

    fn end_element(&mut self, _event: &BytesEnd, state: MzIdentMLParserState) -> ParserResult {
        match state {
            MzIdentMLParserState::Skipping => Ok(self.skip.ascend()),
            MzIdentMLParserState::SpectrumIdentificationItem => {
                self.finish_item();
                Ok(MzIdentMLParserState::SpectrumIdentificationResult)
            }
            MzIdentMLParserState::SpectrumIdentificationResult => {
                Ok(MzIdentMLParserState::SpectrumIdentificationResultDone)
            }
            _ => Ok(state),
        }
    }

    fn text(&mut self, _event: &BytesText, state: MzIdentMLParserState) -> ParserResult {
        Ok(state)
    }

    fn completion_state() -> MzIdentMLParserState {
        MzIdentMLParserState::SpectrumIdentificationResultDone
    }

    fn element_name() -> &'static str {
        "SpectrumIdentificationResult"
    }

    fn is_started(&self) -> bool {
        self.started
    }
}

/**
A streaming mzIdentML reader that materializes one subtree at a time: the
`SequenceCollection`, then each `SpectrumIdentificationResult` in document order.
*/
pub struct MzIdentMLReaderType<R: Read> {
    /// The current state of the parser
    pub state: MzIdentMLParserState,
    /// The last error encountered
    pub error: Option<Box<MzIdentMLParserError>>,
    handle: Reader<BufReader<R>>,
    buffer: Bytes,
    results_read: usize,
}

pub type MzIdentMLReader = MzIdentMLReaderType<fs::File>;

impl<R: Read> MzIdentMLReaderType<R> {
    pub fn new(file: R) -> Self {
        let mut handle = Reader::from_reader(BufReader::with_capacity(BUFFER_SIZE, file));
        handle.trim_text(true);
        Self {
            state: MzIdentMLParserState::Start,
            error: None,
            handle,
            buffer: Bytes::with_capacity(BUFFER_SIZE),
            results_read: 0,
        }
    }

    /// The number of `SpectrumIdentificationResult` entries read so far
    pub fn results_read(&self) -> usize {
        self.results_read
    }

    /// Feed events to `accumulator` until its subtree is complete, the document
    /// ends or an error occurs
    fn _parse_into<B: MzIdentMLSAX>(&mut self, mut accumulator: B) -> Result<B, MzIdentMLParserError> {
        macro_rules! err_state {
            ($message:ident) => {{
                self.state = MzIdentMLParserState::ParserError;
                self.error = Some(Box::new($message));
            }};
        }

        loop {
            let state = self.state;
            match self.handle.read_event_into(&mut self.buffer) {
                Ok(Event::Start(ref e)) => {
                    if log::log_enabled!(log::Level::Trace) {
                        trace!(
                            "Starting mzIdentML element: {}",
                            String::from_utf8_lossy(e.name().as_ref())
                        );
                    }
                    match accumulator.start_element(e, state) {
                        Ok(state) => self.state = state,
                        Err(message) => err_state!(message),
                    }
                }
                Ok(Event::End(ref e)) => match accumulator.end_element(e, state) {
                    Ok(state) => self.state = state,
                    Err(message) => err_state!(message),
                },
                Ok(Event::Empty(ref e)) => match accumulator.empty_element(e, state) {
                    Ok(state) => self.state = state,
                    Err(message) => err_state!(message),
                },
                Ok(Event::Text(ref e)) => match accumulator.text(e, state) {
                    Ok(state) => self.state = state,
                    Err(message) => err_state!(message),
                },
                Ok(Event::Eof) => {
                    trace!("Reached EOF");
                    self.state = MzIdentMLParserState::EOF;
                }
                Err(err) => {
                    let message = MzIdentMLParserError::XMLError(state, err);
                    warn!(
                        "Encountered an error at byte {}: {}",
                        self.handle.buffer_position(),
                        message
                    );
                    err_state!(message);
                }
                _ => {}
            }
            self.buffer.clear();
            if (self.state == B::completion_state() && accumulator.is_started())
                || self.state == MzIdentMLParserState::EOF
                || self.state == MzIdentMLParserState::ParserError
            {
                break;
            }
        }

        match self.error.take() {
            Some(err) => Err(*err),
            None => {
                if self.state == MzIdentMLParserState::EOF && accumulator.is_started() {
                    self.state = MzIdentMLParserState::ParserError;
                    Err(MzIdentMLParserError::IncompleteElementError(
                        B::element_name().to_string(),
                        MzIdentMLParserState::EOF,
                    ))
                } else {
                    Ok(accumulator)
                }
            }
        }
    }

    /// Read every `Peptide` and `PeptideEvidence` in the `SequenceCollection`
    pub fn read_peptide_collection(&mut self) -> Result<PeptideCollection, MzIdentMLParserError> {
        match self.state {
            MzIdentMLParserState::Start | MzIdentMLParserState::Resume => {}
            MzIdentMLParserState::ParserError => {
                return Err(MzIdentMLParserError::UnknownError(self.state))
            }
            _ => return Err(MzIdentMLParserError::SectionOver("SequenceCollection")),
        }
        let builder = self._parse_into(PeptideBuilder::default())?;
        if !builder.is_started() {
            return Err(MzIdentMLParserError::SectionNotFound("SequenceCollection"));
        }
        let collection = builder.into_collection();
        log::debug!(
            "Read {} peptides and {} peptide evidence entries",
            collection.peptides.len(),
            collection.evidence.len()
        );
        Ok(collection)
    }

    /// Read the next `SpectrumIdentificationResult`, or `None` at the end of the document
    pub fn read_next_result(&mut self) -> Result<Option<SpectrumResult>, MzIdentMLParserError> {
        match self.state {
            MzIdentMLParserState::EOF => return Ok(None),
            MzIdentMLParserState::ParserError => {
                return Err(MzIdentMLParserError::UnknownError(self.state))
            }
            MzIdentMLParserState::SpectrumIdentificationResultDone => {
                self.state = MzIdentMLParserState::Resume;
            }
            _ => {}
        }
        let builder = self._parse_into(SpectrumResultBuilder::default())?;
        if !builder.is_started() {
            return Ok(None);
        }
        self.results_read += 1;
        Ok(Some(builder.into_result()))
    }

    pub fn iter_results(&mut self) -> ResultIter<'_, R> {
        ResultIter {
            reader: self,
            done: false,
        }
    }
}

impl MzIdentMLReaderType<fs::File> {
    pub fn open_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let handle = fs::File::open(path)?;
        Ok(Self::new(handle))
    }
}

/// Iterates over the remaining results of a reader, stopping after the first error
pub struct ResultIter<'a, R: Read> {
    reader: &'a mut MzIdentMLReaderType<R>,
    done: bool,
}

impl<'a, R: Read> Iterator for ResultIter<'a, R> {
    type Item = Result<SpectrumResult, MzIdentMLParserError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_next_result() {
            Ok(Some(result)) => Some(Ok(result)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::params::ParamLike;

    const DOCUMENT_1_1: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MzIdentML id="test" version="1.1.0" xmlns="http://psidev.info/psi/pi/mzIdentML/1.1">
  <SequenceCollection>
    <DBSequence id="DBSeq_1" accession="P1" searchDatabase_ref="SDB_1">
      <Seq>MKPEPTIDEKAANGTK</Seq>
      <cvParam cvRef="PSI-MS" accession="MS:1001088" name="protein description" value="test"/>
    </DBSequence>
    <Peptide id="PEP_1">
      <PeptideSequence>PEPTIDEK</PeptideSequence>
    </Peptide>
    <Peptide id="PEP_2">
      <PeptideSequence>AANGTK</PeptideSequence>
      <Modification location="3" monoisotopicMassDelta="0.984016" residues="N">
        <cvParam cvRef="UNIMOD" accession="UNIMOD:7" name="Deamidated"/>
      </Modification>
    </Peptide>
    <PeptideEvidence id="PE_1" peptide_ref="PEP_1" dBSequence_ref="DBSeq_1" pre="K" post="A"/>
  </SequenceCollection>
  <DataCollection>
    <AnalysisData>
      <SpectrumIdentificationList id="SIL_1">
        <SpectrumIdentificationResult id="SIR_1" spectrumID="index=0" spectraData_ref="SD_1">
          <SpectrumIdentificationItem id="SII_1_1" calculatedMassToCharge="500.0" chargeState="2" experimentalMassToCharge="501.0" peptide_ref="PEP_1" rank="1" passThreshold="true">
            <PeptideEvidenceRef peptideEvidence_ref="PE_1"/>
            <Fragmentation>
              <IonType charge="1" index="1 2">
                <cvParam cvRef="PSI-MS" accession="MS:1001229" name="frag: a ion" value="1.0"/>
              </IonType>
            </Fragmentation>
            <cvParam cvRef="PSI-MS" accession="MS:1001155" name="SEQUEST:xcorr" value="2.5"/>
            <cvParam cvRef="PSI-MS" accession="MS:1001160" name="SEQUEST:sp"/>
            <userParam name="num matched ions" value="12"/>
          </SpectrumIdentificationItem>
          <SpectrumIdentificationItem id="SII_1_2" calculatedMassToCharge="501.5" chargeState="3" experimentalMassToCharge="501.0" peptide_ref="PEP_2" rank="2" passThreshold="false"/>
          <cvParam cvRef="PSI-MS" accession="MS:1000796" name="spectrum title" value="scan 1"/>
        </SpectrumIdentificationResult>
        <SpectrumIdentificationResult id="SIR_2" spectrumID="index=1" spectraData_ref="SD_1">
          <SpectrumIdentificationItem id="SII_2_1" calculatedMassToCharge="300.0" chargeState="1" experimentalMassToCharge="300.2" peptide_ref="PEP_2" rank="1" passThreshold="true">
            <cvParam cvRef="PSI-MS" accession="MS:1001155" name="SEQUEST:xcorr" value="1.5"/>
            <userParam name="num matched ions" value="4"/>
          </SpectrumIdentificationItem>
        </SpectrumIdentificationResult>
      </SpectrumIdentificationList>
    </AnalysisData>
  </DataCollection>
</MzIdentML>
"#;

    fn open_text(text: &str) -> MzIdentMLReaderType<io::Cursor<Vec<u8>>> {
        MzIdentMLReaderType::new(io::Cursor::new(text.as_bytes().to_vec()))
    }

    #[test_log::test]
    fn test_read_peptide_collection() -> Result<(), MzIdentMLParserError> {
        let mut reader = open_text(DOCUMENT_1_1);
        let collection = reader.read_peptide_collection()?;
        assert_eq!(collection.peptides.len(), 2);
        assert_eq!(collection.peptides[0].id, "PEP_1");
        assert_eq!(collection.peptides[0].sequence, "PEPTIDEK");
        let modified = &collection.peptides[1];
        assert_eq!(modified.modifications.len(), 1);
        assert_eq!(modified.modifications[0].location, Some(3));
        assert!(modified.modifications[0].is_deamidation());
        assert_eq!(collection.evidence.len(), 1);
        assert_eq!(collection.evidence[0].flanks, Flanks { n_term: 'K', c_term: 'A' });

        assert!(matches!(
            reader.read_peptide_collection(),
            Err(MzIdentMLParserError::SectionOver(_))
        ));
        Ok(())
    }

    #[test_log::test]
    fn test_read_results() -> Result<(), MzIdentMLParserError> {
        let mut reader = open_text(DOCUMENT_1_1);
        reader.read_peptide_collection()?;
        let results: Vec<SpectrumResult> = reader.iter_results().collect::<Result<_, _>>()?;
        assert_eq!(results.len(), 2);
        assert_eq!(reader.results_read(), 2);

        let first = &results[0];
        assert_eq!(first.id, "SIR_1");
        assert_eq!(first.matches.len(), 2);
        assert_eq!(first.experimental_mass_to_charge(), Some(501.0));

        let item = &first.matches[0];
        assert_eq!(item.id, "SII_1_1");
        assert_eq!(item.charge_state, 2);
        assert_eq!(item.calculated_mass_to_charge, Some(500.0));
        assert_eq!(item.peptide_ref.as_deref(), Some("PEP_1"));
        assert_eq!(item.evidence_refs, vec!["PE_1".to_string()]);
        assert_eq!(item.cv_params.len(), 2);
        assert_eq!(item.cv_params[0].name(), "SEQUEST:xcorr");
        assert_eq!(item.cv_params[0].value(), Some("2.5"));
        assert!(!item.cv_params[1].has_value());
        assert_eq!(item.user_params.len(), 1);

        let empty_item = &first.matches[1];
        assert_eq!(empty_item.rank, 2);
        assert_eq!(empty_item.charge_state, 3);
        assert!(empty_item.cv_params.is_empty());

        assert_eq!(results[1].matches[0].charge_state, 1);
        assert!(reader.read_next_result()?.is_none());
        Ok(())
    }

    #[test_log::test]
    fn test_results_across_comments_and_lists() -> Result<(), MzIdentMLParserError> {
        let text = r#"<?xml version="1.0" encoding="UTF-8"?>
<MzIdentML id="test" version="1.1.0">
  <SequenceCollection>
    <Peptide id="PEP_1"><PeptideSequence>PEPTIDE</PeptideSequence></Peptide>
  </SequenceCollection>
  <DataCollection>
    <AnalysisData>
      <SpectrumIdentificationList id="SIL_1">
        <SpectrumIdentificationResult id="SIR_1">
          <SpectrumIdentificationItem id="SII_1" calculatedMassToCharge="500.0" chargeState="2" experimentalMassToCharge="501.0" peptide_ref="PEP_1" rank="1"/>
        </SpectrumIdentificationResult>
        <!-- rescored by a second engine -->
        <?instruction ignored?>
        <SpectrumIdentificationResult id="SIR_2">
          <SpectrumIdentificationItem id="SII_2" calculatedMassToCharge="400.0" chargeState="3" experimentalMassToCharge="401.0" peptide_ref="PEP_1" rank="1"/>
        </SpectrumIdentificationResult>
      </SpectrumIdentificationList>
      <SpectrumIdentificationList id="SIL_2">
        <SpectrumIdentificationResult id="SIR_3">
          <SpectrumIdentificationItem id="SII_3" calculatedMassToCharge="300.0" chargeState="1" experimentalMassToCharge="301.0" peptide_ref="PEP_1" rank="1"/>
        </SpectrumIdentificationResult>
      </SpectrumIdentificationList>
    </AnalysisData>
  </DataCollection>
</MzIdentML>
"#;
        let mut reader = open_text(text);
        reader.read_peptide_collection()?;
        let ids: Vec<String> = reader
            .iter_results()
            .map(|r| r.map(|r| r.id))
            .collect::<Result<_, _>>()?;
        assert_eq!(ids, vec!["SIR_1", "SIR_2", "SIR_3"]);
        assert_eq!(reader.results_read(), 3);
        assert_eq!(reader.state, MzIdentMLParserState::EOF);
        Ok(())
    }

    #[test_log::test]
    fn test_results_without_peptides() -> Result<(), MzIdentMLParserError> {
        let mut reader = open_text(DOCUMENT_1_1);
        let first = reader.read_next_result()?.unwrap();
        assert_eq!(first.id, "SIR_1");
        assert!(matches!(
            reader.read_peptide_collection(),
            Err(MzIdentMLParserError::SectionOver(_))
        ));
        Ok(())
    }

    #[test]
    fn test_nested_evidence_1_0() -> Result<(), MzIdentMLParserError> {
        let text = r#"<?xml version="1.0" encoding="UTF-8"?>
<mzIdentML id="" version="1.0.0">
  <SequenceCollection>
    <Peptide id="peptide_1_1">
      <peptideSequence>PEPTIDE</peptideSequence>
    </Peptide>
  </SequenceCollection>
  <DataCollection><AnalysisData><SpectrumIdentificationList id="SIL_1">
    <SpectrumIdentificationResult id="SIR_1" spectrumID="index=0">
      <SpectrumIdentificationItem id="SII_1_1" calculatedMassToCharge="500.0" chargeState="2" experimentalMassToCharge="501.0" Peptide_ref="peptide_1_1" rank="1" passThreshold="true">
        <PeptideEvidence id="PE_1_1" start="1" end="7" pre="R" post="-" missedCleavages="0" isDecoy="false" DBSequence_Ref="DBSeq_1">
          <cvParam accession="MS:1001207" name="Mascot" cvRef="PSI-MS"/>
        </PeptideEvidence>
        <PeptideEvidence id="PE_1_2" pre="A" post="G" isDecoy="false" DBSequence_Ref="DBSeq_2"/>
        <cvParam accession="MS:1001155" name="sequest:xcorr" cvRef="PSI-MS" value="3.1"/>
      </SpectrumIdentificationItem>
    </SpectrumIdentificationResult>
  </SpectrumIdentificationList></AnalysisData></DataCollection>
</mzIdentML>
"#;
        let mut reader = open_text(text);
        let collection = reader.read_peptide_collection()?;
        assert_eq!(collection.peptides[0].sequence, "PEPTIDE");
        let result = reader.read_next_result()?.unwrap();
        let item = &result.matches[0];
        assert_eq!(item.peptide_ref.as_deref(), Some("peptide_1_1"));
        assert_eq!(item.flanks, Some(Flanks { n_term: 'R', c_term: '-' }));
        assert_eq!(item.cv_params.len(), 1);
        assert_eq!(item.cv_params[0].name(), "sequest:xcorr");
        Ok(())
    }

    #[test]
    fn test_missing_attribute() {
        let text = r#"<MzIdentML><SequenceCollection/><SpectrumIdentificationResult id="SIR_1">
<SpectrumIdentificationItem id="SII_1" experimentalMassToCharge="501.0"/>
</SpectrumIdentificationResult></MzIdentML>"#;
        let mut reader = open_text(text);
        assert!(reader.read_peptide_collection().unwrap().peptides.is_empty());
        let err = reader.read_next_result().unwrap_err();
        assert!(err.is_missing_field(), "{err}");
        assert_eq!(reader.state, MzIdentMLParserState::ParserError);
        assert!(reader.read_next_result().is_err());
    }

    #[test]
    fn test_truncated_document() {
        let text = r#"<MzIdentML><SequenceCollection><Peptide id="PEP_1"><PeptideSequence>PEP"#;
        let mut reader = open_text(text);
        assert!(reader.read_peptide_collection().is_err());

        let mut reader = open_text(r#"<MzIdentML><DataCollection></DataCollection></MzIdentML>"#);
        assert!(matches!(
            reader.read_peptide_collection(),
            Err(MzIdentMLParserError::SectionNotFound("SequenceCollection"))
        ));
    }
}
