use clap::Parser;
use std::path::PathBuf;

use crate::delta::blocks::DEFAULT_BLOCK_SIZE;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory to scan
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Limit the scan to these sub-paths within DIR
    #[arg(short, long)]
    pub sub: Vec<String>,

    /// Exclude patterns (gitignore style)
    #[arg(short, long)]
    pub exclude: Vec<String>,

    /// Block size for content hashing, in bytes
    #[arg(short = 'B', long, default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,

    /// Number of parallel hashers
    #[arg(short = 'j', long, default_value_t = 4)]
    pub hashers: usize,

    /// Do not treat permission changes as changes
    #[arg(long, default_value_t = false)]
    pub ignore_perms: bool,

    /// Rename files whose names are in the wrong normalization form
    #[arg(long, default_value_t = false)]
    pub auto_normalize: bool,

    /// Compute weak rolling hashes in addition to strong hashes
    #[arg(short = 'w', long, default_value_t = false)]
    pub weak_hashes: bool,

    /// Symlinks (relative to DIR) whose directory targets are scanned too
    #[arg(long)]
    pub follow_symlink: Vec<String>,

    /// Progress event cadence in seconds; 0 means default, negative disables
    #[arg(long, default_value_t = 0)]
    pub progress_interval: i32,

    /// Show a progress bar while hashing
    #[arg(short = 'P', long, default_value_t = false)]
    pub progress: bool,

    /// Hours to keep temporary files before deleting them during a scan
    #[arg(long, default_value_t = 24)]
    pub temp_lifetime: u64,

    /// Replica id stamped into emitted descriptors
    #[arg(long, default_value_t = 1)]
    pub id: u64,

    /// Suppress non-error messages
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,

    /// Increase verbosity
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}
