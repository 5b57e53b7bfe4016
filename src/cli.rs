use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "reprise",
    about = "List local videos with previews and remember where you stopped watching",
    long_about = None,
    version,
    arg_required_else_help = true,
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to TOML config file (overrides default search: ./reprise.toml, ~/.config/reprise/config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Only list videos whose location under a root starts with PREFIX [default: Movies]
    #[arg(short, long, value_name = "PREFIX", global = true)]
    pub filter: Option<String>,

    /// Position file to read and write [default: <data dir>/reprise/positions.json]
    #[arg(long, value_name = "FILE", global = true)]
    pub store: Option<PathBuf>,

    /// Seconds into each video the preview frame is taken from [default: 60]
    #[arg(long, value_name = "SECS", global = true)]
    pub probe_offset: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List videos under one or more roots, newest first, with duration and resume point
    List {
        /// Directories to catalog; the filter applies to paths relative to each
        #[arg(num_args = 1.., required = true)]
        roots: Vec<PathBuf>,

        /// Write each extracted preview frame as DIR/<n>.png
        #[arg(long, value_name = "DIR")]
        thumbnails: Option<PathBuf>,
    },
    /// Print the saved resume offset of a video, in milliseconds
    Position {
        file: PathBuf,
    },
    /// Forget the saved resume offset of a video
    Forget {
        file: PathBuf,
    },
}
