use std::fs;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use log::error;

use mzid2pin::{ConversionConfig, Converter, Enzyme};

/// Convert mzIdentML target and decoy search results into percolator input XML
#[derive(Debug, Parser)]
#[command(name = "mzid2pin", version)]
struct App {
    /// An mzIdentML file of target matches
    #[arg(short = 't', long = "target-file", required = true, num_args = 1..)]
    target_files: Vec<PathBuf>,

    /// An mzIdentML file of decoy matches
    #[arg(short = 'd', long = "decoy-file", num_args = 1..)]
    decoy_files: Vec<PathBuf>,

    /// The protease used in the search: no_enzyme, elastase, chymotrypsin or trypsin
    #[arg(short = 'e', long = "enzyme-type", default_value_t = Enzyme::Trypsin)]
    enzyme: Enzyme,

    /// Add the number of post-translational modifications as a feature
    #[arg(short = 'p', long)]
    ptm: bool,

    /// Add a feature for deamidated asparagines in an N-glycosylation motif
    #[arg(short = 'n', long)]
    pngasef: bool,

    /// Add the frequency of each amino acid as a feature
    #[arg(short = 'a', long = "aa-freq")]
    aa_freq: bool,

    /// Remove whole isotope errors from the precursor mass difference
    #[arg(short = 'M', long)]
    monoisotopic: bool,

    /// Keep the scan store in this file instead of a temporary one
    #[arg(short = 'b', long = "tmp-file")]
    tmp_file: Option<PathBuf>,

    /// Write the document to this file instead of STDOUT
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

impl From<App> for ConversionConfig {
    fn from(value: App) -> Self {
        Self {
            target_files: value.target_files,
            decoy_files: value.decoy_files,
            enzyme: value.enzyme,
            ptm: value.ptm,
            pngasef: value.pngasef,
            aa_freq: value.aa_freq,
            monoisotopic: value.monoisotopic,
            store_path: value.tmp_file,
        }
    }
}

fn run(app: App) -> io::Result<()> {
    let output = app.output.clone();
    let mut converter = Converter::new(app.into())?;
    converter.load()?;
    match output {
        Some(path) => {
            let handle = fs::File::create(&path)?;
            converter.write_document(BufWriter::new(handle))?;
        }
        None => {
            converter.write_document(io::stdout().lock())?;
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let app = App::parse();
    if let Err(e) = run(app) {
        error!("{e}");
        exit(1);
    }
}
