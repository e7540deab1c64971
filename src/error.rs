use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriftsyncError {
    #[error("{0}: not a directory")]
    NotADirectory(PathBuf),

    #[error("scan cancelled")]
    Cancelled,

    #[error("{path}: file changed during hashing")]
    ContentChanged { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Pattern error: {0}")]
    Pattern(#[from] globset::Error),
}
