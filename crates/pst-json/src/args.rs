use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about)]
pub struct Args {
    /// A PST/OST file, or a directory searched recursively for them.
    #[arg(value_name = "PST_DIR")]
    pub pst_dir: PathBuf,

    /// Directory for the converted JSON files. Created when missing.
    #[arg(value_name = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Folders nested deeper than this are skipped.
    #[arg(long, default_value_t = 64)]
    pub max_depth: usize,

    /// Number of containers converted in parallel.
    #[arg(long)]
    pub jobs: Option<usize>,

    /// Indent the JSON output.
    #[arg(long)]
    pub pretty: bool,
}
