use std::fmt::Debug;
use std::io::{self, BufWriter, Write};

use log::debug;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Error as XMLError;
use quick_xml::Writer;
use thiserror::Error;

use crate::enzyme::Enzyme;
use crate::features::FeatureDescriptor;
use crate::scan::{PeptideSpectrumMatch, SpectrumScan};

const BUFFER_SIZE: usize = 10000;

pub const PERCOLATOR_IN_NAMESPACE: &str = "http://per-colator.com/percolator_in/11";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

macro_rules! bstart {
    ($e:tt) => {
        BytesStart::from_content($e, $e.len())
    };
}

macro_rules! attrib {
    ($name:expr, $value:expr, $elt:ident) => {
        let key = $name.as_bytes();
        let value = $value.as_bytes();
        $elt.push_attribute((key, value));
    };
}

macro_rules! start_event {
    ($writer:ident, $target:ident) => {
        $writer.handle.write_event(Event::Start($target.borrow()))?;
    };
}

macro_rules! end_event {
    ($writer:ident, $target:ident) => {
        $writer.handle.write_event(Event::End($target.to_end()))?;
    };
}

/// Format a double the way `xsd:double` spells it
fn format_double(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "INF".to_string()
    } else if value == f64::NEG_INFINITY {
        "-INF".to_string()
    } else {
        value.to_string()
    }
}

/**
The different states that [`PinWriterType`] can enter while writing a
`percolator_in` document. Sections must be written in this order.
*/
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Eq, Ord)]
pub enum PinWriterState {
    Start,
    DocumentOpen,
    FeatureDescriptions,
    Scans,
    DocumentClosed,
}

#[derive(Debug, Error)]
pub enum PinWriterError {
    #[error("An XML error occurred while writing: {0}")]
    XMLError(#[from] XMLError),
    #[error("An IO error occurred while writing: {0}")]
    IOError(#[from] io::Error),
    #[error("Cannot transition from {from_state:?} to {to_state:?}")]
    StateTransitionError {
        from_state: PinWriterState,
        to_state: PinWriterState,
    },
    #[error("Match {psm} in scan {scan_number} has {found} features but {expected} were described")]
    FeatureCountMismatch {
        psm: String,
        scan_number: u32,
        expected: usize,
        found: usize,
    },
}

impl From<PinWriterError> for io::Error {
    fn from(value: PinWriterError) -> Self {
        match value {
            PinWriterError::IOError(e) => e,
            _ => io::Error::new(io::ErrorKind::InvalidData, value),
        }
    }
}

pub type WriterResult = Result<(), PinWriterError>;

struct InnerXMLWriter<W: Write> {
    pub handle: Writer<BufWriter<W>>,
}

impl<W: Write> Debug for InnerXMLWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InnerXMLWriter")
            .field("handle", &"...")
            .finish()
    }
}

impl<W: Write> InnerXMLWriter<W> {
    pub fn new(file: W) -> InnerXMLWriter<W> {
        let handle = BufWriter::with_capacity(BUFFER_SIZE, file);
        Self {
            handle: Writer::new_with_indent(handle, b' ', 2),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.handle.get_mut().flush()
    }

    pub fn write_event(&mut self, event: Event) -> WriterResult {
        self.handle.write_event(event)?;
        Ok(())
    }

    /// Write `<name>text</name>`
    pub fn write_text_element(&mut self, name: &str, text: &str) -> WriterResult {
        let elt = BytesStart::new(name);
        self.handle.write_event(Event::Start(elt.borrow()))?;
        self.handle.write_event(Event::Text(BytesText::new(text)))?;
        self.handle.write_event(Event::End(elt.to_end()))?;
        Ok(())
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.handle.into_inner().into_inner().map_err(|e| e.into_error())
    }
}

/**
Writes a `percolator_in` document: the enzyme header, the feature
descriptions and then one `fragSpectrumScan` per spectrum.
*/
#[derive(Debug)]
pub struct PinWriterType<W: Write> {
    handle: InnerXMLWriter<W>,
    pub state: PinWriterState,
    feature_count: usize,
    scans_written: usize,
}

pub type PinWriter<W> = PinWriterType<W>;

impl<W: Write> PinWriterType<W> {
    pub fn new(file: W) -> Self {
        Self {
            handle: InnerXMLWriter::new(file),
            state: PinWriterState::Start,
            feature_count: 0,
            scans_written: 0,
        }
    }

    pub fn scans_written(&self) -> usize {
        self.scans_written
    }

    fn transition(&mut self, allowed_from: &[PinWriterState], to_state: PinWriterState) -> WriterResult {
        if !allowed_from.contains(&self.state) {
            return Err(PinWriterError::StateTransitionError {
                from_state: self.state,
                to_state,
            });
        }
        self.state = to_state;
        Ok(())
    }

    /// Write the XML declaration, open the root element and name the enzyme
    pub fn write_header(&mut self, enzyme: &Enzyme) -> WriterResult {
        self.transition(&[PinWriterState::Start], PinWriterState::DocumentOpen)?;
        let handle = &mut self.handle;
        handle.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let mut experiment = bstart!("experiment");
        attrib!("xmlns", PERCOLATOR_IN_NAMESPACE, experiment);
        attrib!("xmlns:xsi", XSI_NAMESPACE, experiment);
        let schema_location = format!("{PERCOLATOR_IN_NAMESPACE} percolator_in.xsd");
        attrib!("xsi:schemaLocation", schema_location, experiment);
        start_event!(handle, experiment);
        handle.write_text_element("enzyme", enzyme.display_name())?;
        Ok(())
    }

    pub fn write_feature_descriptions(&mut self, descriptor: &FeatureDescriptor) -> WriterResult {
        self.transition(
            &[PinWriterState::DocumentOpen],
            PinWriterState::FeatureDescriptions,
        )?;
        let handle = &mut self.handle;
        let outer = bstart!("featureDescriptions");
        start_event!(handle, outer);
        for description in descriptor.iter() {
            let mut elt = bstart!("featureDescription");
            attrib!("name", description.name, elt);
            handle.write_event(Event::Empty(elt))?;
        }
        end_event!(handle, outer);
        self.feature_count = descriptor.len();
        debug!("Wrote {} feature descriptions", descriptor.len());
        Ok(())
    }

    fn write_match(&mut self, scan_number: u32, psm: &PeptideSpectrumMatch) -> WriterResult {
        if psm.features().len() != self.feature_count {
            return Err(PinWriterError::FeatureCountMismatch {
                psm: psm.id.clone(),
                scan_number,
                expected: self.feature_count,
                found: psm.features().len(),
            });
        }
        let handle = &mut self.handle;
        let calculated = format_double(psm.calculated_mass_to_charge);
        let charge = psm.charge_state.to_string();
        let experimental = format_double(psm.experimental_mass_to_charge);
        let is_decoy = if psm.is_decoy { "true" } else { "false" };
        let mut elt = bstart!("peptideSpectrumMatch");
        attrib!("id", psm.id, elt);
        attrib!("calculatedMassToCharge", calculated, elt);
        attrib!("chargeState", charge, elt);
        attrib!("experimentalMassToCharge", experimental, elt);
        attrib!("isDecoy", is_decoy, elt);
        start_event!(handle, elt);

        let features = bstart!("features");
        start_event!(handle, features);
        for value in psm.features() {
            handle.write_text_element("feature", &format_double(*value))?;
        }
        end_event!(handle, features);

        let peptide = bstart!("peptide");
        start_event!(handle, peptide);
        handle.write_text_element("peptideSequence", &psm.peptide_sequence)?;
        end_event!(handle, peptide);

        end_event!(handle, elt);
        Ok(())
    }

    /// Write one `fragSpectrumScan` holding all of the scan's matches
    pub fn write_scan(&mut self, scan: &SpectrumScan) -> WriterResult {
        self.transition(
            &[PinWriterState::FeatureDescriptions, PinWriterState::Scans],
            PinWriterState::Scans,
        )?;
        let scan_number = scan.scan_number.to_string();
        let experimental = format_double(scan.experimental_mass_to_charge);
        let mut elt = bstart!("fragSpectrumScan");
        attrib!("scanNumber", scan_number, elt);
        attrib!("experimentalMassToCharge", experimental, elt);
        let handle = &mut self.handle;
        start_event!(handle, elt);
        for psm in scan.matches.iter() {
            self.write_match(scan.scan_number, psm)?;
        }
        let handle = &mut self.handle;
        end_event!(handle, elt);
        self.scans_written += 1;
        Ok(())
    }

    /// Close the root element and flush the underlying stream
    pub fn close(&mut self) -> WriterResult {
        self.transition(
            &[PinWriterState::FeatureDescriptions, PinWriterState::Scans],
            PinWriterState::DocumentClosed,
        )?;
        self.handle
            .write_event(Event::End(BytesEnd::new("experiment")))?;
        self.handle.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.handle.into_inner()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::features::{ChargeRange, FeatureFlags};
    use crate::identification::{MatchCandidate, PeptideRecord};

    fn scan_with_match(descriptor: &FeatureDescriptor, candidate: &MatchCandidate) -> SpectrumScan {
        let peptide = PeptideRecord::new("PEP_1".into(), "PEPTIDE".into());
        let mut features = vec![0.0; descriptor.len()];
        features[2] = 1002.5;
        let psm = PeptideSpectrumMatch::from_candidate(candidate, &peptide, 500.0, true, features, descriptor)
            .unwrap();
        let mut scan = SpectrumScan::new(3, 501.25);
        scan.matches.push(psm);
        scan
    }

    #[test]
    fn test_write_document() -> Result<(), PinWriterError> {
        let candidate = MatchCandidate {
            id: "SII_1".into(),
            charge_state: 2,
            experimental_mass_to_charge: 501.25,
            ..Default::default()
        };
        let flags = FeatureFlags {
            enzyme: Enzyme::NoEnzyme,
            ..Default::default()
        };
        let descriptor = FeatureDescriptor::from_reference_match(&candidate, ChargeRange::from_charge(2), &flags);
        let scan = scan_with_match(&descriptor, &candidate);

        let mut writer = PinWriter::new(Vec::new());
        writer.write_header(&Enzyme::NoEnzyme)?;
        writer.write_feature_descriptions(&descriptor)?;
        writer.write_scan(&scan)?;
        writer.close()?;
        assert_eq!(writer.scans_written(), 1);
        let text = String::from_utf8(writer.into_inner()?).unwrap();

        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(text.contains(&format!("<experiment xmlns=\"{PERCOLATOR_IN_NAMESPACE}\"")));
        assert!(text.contains("<enzyme>no enzyme</enzyme>"));
        assert!(text.contains("<featureDescription name=\"Charge2\"/>"));
        assert_eq!(text.matches("<featureDescription ").count(), descriptor.len());
        assert!(text.contains("<fragSpectrumScan scanNumber=\"3\" experimentalMassToCharge=\"501.25\">"));
        assert!(text.contains(
            "<peptideSpectrumMatch id=\"SII_1\" calculatedMassToCharge=\"500\" chargeState=\"2\" experimentalMassToCharge=\"501.25\" isDecoy=\"true\">"
        ));
        assert!(text.contains("<feature>1002.5</feature>"));
        assert_eq!(text.matches("<feature>").count(), descriptor.len());
        assert!(text.contains("<peptideSequence>PEPTIDE</peptideSequence>"));
        assert!(text.trim_end().ends_with("</experiment>"));
        Ok(())
    }

    #[test]
    fn test_out_of_order() {
        let mut writer = PinWriter::new(Vec::new());
        let descriptor = FeatureDescriptor::default();
        assert!(matches!(
            writer.write_feature_descriptions(&descriptor),
            Err(PinWriterError::StateTransitionError {
                from_state: PinWriterState::Start,
                to_state: PinWriterState::FeatureDescriptions
            })
        ));
        writer.write_header(&Enzyme::Trypsin).unwrap();
        assert!(writer.write_scan(&SpectrumScan::new(0, 1.0)).is_err());
        assert!(writer.close().is_err());
        assert!(writer.write_header(&Enzyme::Trypsin).is_err());
    }

    #[test]
    fn test_feature_count_checked() {
        let candidate = MatchCandidate {
            id: "SII_1".into(),
            charge_state: 2,
            experimental_mass_to_charge: 501.25,
            ..Default::default()
        };
        let flags = FeatureFlags::default();
        let descriptor = FeatureDescriptor::from_reference_match(&candidate, ChargeRange::new(1, 3), &flags);
        let narrower = FeatureDescriptor::from_reference_match(&candidate, ChargeRange::from_charge(2), &flags);
        let scan = scan_with_match(&descriptor, &candidate);

        let mut writer = PinWriter::new(Vec::new());
        writer.write_header(&Enzyme::Trypsin).unwrap();
        writer.write_feature_descriptions(&narrower).unwrap();
        assert!(matches!(
            writer.write_scan(&scan),
            Err(PinWriterError::FeatureCountMismatch { .. })
        ));
    }

    #[test]
    fn test_format_double() {
        assert_eq!(format_double(1.0), "1");
        assert_eq!(format_double(-0.25), "-0.25");
        assert_eq!(format_double(f64::INFINITY), "INF");
        assert_eq!(format_double(f64::NAN), "NaN");
    }
}
