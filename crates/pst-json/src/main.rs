use anyhow::Context;
use clap::Parser;
use pst_decoder::messaging::walker::WalkOptions;
use pst_json::{
    args::Args,
    convert::{self, ConvertOptions},
};
use rayon::prelude::*;
use std::{fs, process};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if !args.pst_dir.exists() {
        println!("Directory {} doesn't exist", args.pst_dir.display());
        process::exit(1);
    }
    if args.output_dir.is_file() {
        println!(
            "Output {} must be directory, not file",
            args.output_dir.display()
        );
        process::exit(1);
    }
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let jobs = convert::discover(&args.pst_dir, &args.output_dir)?;
    info!(files = jobs.len(), "converting");

    let options = ConvertOptions {
        walk: WalkOptions {
            max_depth: args.max_depth,
        },
        pretty: args.pretty,
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.jobs.unwrap_or_default())
        .build()
        .context("starting worker threads")?;

    pool.install(|| {
        jobs.par_iter()
            .for_each(|job| match convert::convert(job, options) {
                Ok(summary) => info!(
                    input = %job.input.display(),
                    store = summary.store_name.as_deref().unwrap_or_default(),
                    messages = summary.messages,
                    diagnostics = summary.diagnostics,
                    output = ?summary.output,
                    "converted"
                ),
                Err(err) => warn!(input = %job.input.display(), "skipping file: {err:#}"),
            })
    });

    println!("Done");
    Ok(())
}
