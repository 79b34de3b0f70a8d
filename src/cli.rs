use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "ledgersplit",
    version,
    about = "Split accounting export PDFs into one file per document"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Split each input into one output file per logical document.
    Split(SplitArgs),
    /// Walk and resolve outlines without writing any output.
    Inspect(InspectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SplitArgs {
    /// Input files named DOCTYPE_YEAR_MONTH.pdf.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Restrict processing to the first N pages, 0 = unlimited.
    #[arg(short, long, default_value_t = 0)]
    pub restrict: usize,

    /// Root of the <doctype>/<year>/<month> output tree.
    #[arg(long)]
    pub output_root: Option<PathBuf>,

    #[arg(long)]
    pub report_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    /// Input files named DOCTYPE_YEAR_MONTH.pdf.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
