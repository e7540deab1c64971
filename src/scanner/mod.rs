use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::delta::blocks::{BlockInfo, DEFAULT_BLOCK_SIZE};
use crate::events::EventSink;
use crate::ignore::Matcher;
use crate::version::{ShortId, Version};

pub mod hasher;
pub mod normalize;
pub mod progress;
pub mod walker;

pub use walker::{perms_equal, walk, MASK_MODE_PERM};

/// What kind of on-disk object a descriptor refers to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    #[default]
    File,
    Directory,
    Symlink,
}

/// Descriptor of one on-disk object, as emitted by the scanner and compared
/// against the prior snapshot.
///
/// `name` is the path relative to the scan root, `/` separated, in the
/// platform's canonical Unicode normalization form. `blocks` is filled in by
/// the hash pipeline for files and stays empty for directories and symlinks.
/// `invalid` and `deleted` are only ever read from prior state; the scanner
/// never sets them on entries it emits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub permissions: u32,
    pub no_permissions: bool,
    pub modified_s: i64,
    pub modified_ns: i32,
    pub modified_by: ShortId,
    pub version: Version,
    pub symlink_target: String,
    pub blocks: Vec<BlockInfo>,
    pub invalid: bool,
    pub deleted: bool,
}

impl FileEntry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    pub fn has_permission_bits(&self) -> bool {
        !self.no_permissions
    }
}

/// Prior snapshot collaborator: the record of the previous scan's outputs.
pub trait CurrentFiler: Send + Sync {
    /// The file as seen at the last scan, if any.
    fn current_file(&self, name: &str) -> Option<FileEntry>;
}

/// Stat collaborator. Supplied to allow mtime correction layers on top of
/// the plain filesystem.
pub trait Lstater: Send + Sync {
    fn lstat(&self, path: &Path) -> io::Result<Metadata>;
}

/// Scan configuration, immutable for the lifetime of one scan.
#[derive(Clone)]
pub struct ScanConfig {
    /// Opaque folder identifier placed into progress events.
    pub folder: String,
    /// Absolute base directory for the scan.
    pub dir: PathBuf,
    /// Limit the scan to these sub-paths within `dir`; empty means the whole
    /// folder.
    pub subs: Vec<String>,
    /// Block size used when hashing, in bytes.
    pub block_size: usize,
    /// Ignore pattern collaborator.
    pub matcher: Option<Arc<dyn Matcher>>,
    /// Age beyond which temporary files are deleted during the scan.
    pub temp_lifetime: Duration,
    /// Prior snapshot collaborator; absent means an empty snapshot.
    pub current_filer: Option<Arc<dyn CurrentFiler>>,
    /// Stat collaborator; absent means plain `fs::symlink_metadata`.
    pub lstater: Option<Arc<dyn Lstater>>,
    /// When true, permission changes are not considered changes and emitted
    /// entries carry zero permissions with `no_permissions` set.
    pub ignore_perms: bool,
    /// Whether to repair file names that are in the wrong normalization form.
    pub auto_normalize: bool,
    /// Number of parallel hasher threads.
    pub hashers: usize,
    /// Local replica id, stamped into descriptors and version vectors.
    pub short_id: ShortId,
    /// Progress event cadence in seconds; 0 means the 2 second default,
    /// negative disables progress entirely.
    pub progress_tick_interval_s: i32,
    /// Cancellation signal; drop the paired sender (or send a unit) to stop
    /// the scan.
    pub cancel: Receiver<()>,
    /// Whether to compute weak rolling hashes in addition to strong hashes.
    pub use_weak_hashes: bool,
    /// Relative paths whose symlink targets, when directories, are admitted
    /// as additional scan roots.
    pub follow_symlinks: Vec<String>,
    /// Progress event consumer.
    pub events: Option<Arc<dyn EventSink>>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            folder: String::new(),
            dir: PathBuf::new(),
            subs: Vec::new(),
            block_size: DEFAULT_BLOCK_SIZE,
            matcher: None,
            temp_lifetime: Duration::from_secs(24 * 3600),
            current_filer: None,
            lstater: None,
            ignore_perms: false,
            auto_normalize: false,
            hashers: 1,
            short_id: ShortId::default(),
            progress_tick_interval_s: 0,
            cancel: crossbeam_channel::never(),
            use_weak_hashes: false,
            follow_symlinks: Vec::new(),
            events: None,
        }
    }
}
