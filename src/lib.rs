pub mod core;
pub mod sweep;

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct SweepCommand {
    /// JSON or YAML sweep configuration
    #[arg(short, long)]
    pub config: PathBuf,
    /// Print the validated configuration and run count without touching hardware
    #[arg(long)]
    pub dry_run: bool,
    /// CSV dataset output path, overrides `output_file`
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Per-run timeout in seconds, overrides `timeout_s`
    #[arg(short, long)]
    pub timeout: Option<f64>,
    /// Extend an existing dataset instead of truncating it
    #[arg(long)]
    pub append: bool,
    /// Do not wrap benchmarks with `perf stat`
    #[arg(long)]
    pub no_perf: bool,
    /// Skip the stabilization delay when a frequency could not be applied
    #[arg(long)]
    pub skip_stabilization_on_failure: bool,
    /// Directory for sweep.log, defaults to the dataset's directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}
