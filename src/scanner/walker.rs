use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::DriftsyncError;
use crate::events::{EventSink, ProgressEvent};
use crate::ignore;
use crate::scanner::progress::ByteCounter;
use crate::scanner::{hasher, normalize};
use crate::scanner::{CurrentFiler, EntryKind, FileEntry, Lstater, ScanConfig};
use crate::Result;

/// Permission bits that survive into emitted descriptors. Windows only has
/// a read-only attribute, reported as all "w" bits at once; the group and
/// other writable bits are not exported to avoid creating world-writable
/// files on other platforms.
#[cfg(windows)]
pub const MASK_MODE_PERM: u32 = 0o755;
#[cfg(not(windows))]
pub const MASK_MODE_PERM: u32 = 0o777;

/// Whether two permission sets count as equal for change detection.
#[cfg(windows)]
pub fn perms_equal(a: u32, b: u32) -> bool {
    // Only writeable vs read only exists, represented equally for user,
    // group and other. Compare against user.
    (a ^ b) & 0o600 == 0
}

#[cfg(not(windows))]
pub fn perms_equal(a: u32, b: u32) -> bool {
    (a ^ b) & 0o777 == 0
}

const EXECUTABLE_EXTS: &[&str] = &[".bat", ".cmd", ".com", ".exe", ".ps1"];

fn is_windows_executable(rel_path: &str) -> bool {
    let lower = rel_path.to_ascii_lowercase();
    EXECUTABLE_EXTS.iter().any(|ext| lower.ends_with(ext))
}

static SYMLINK_TO_FILE_WARNING: Once = Once::new();

/// Scan the tree rooted at `config.dir` and return the stream of
/// descriptors for everything that differs from the prior snapshot. File
/// descriptors arrive with their block lists already computed; the stream
/// closes once the walk and all hashing have finished, or after
/// cancellation.
pub fn walk(config: ScanConfig) -> Result<Receiver<FileEntry>> {
    let current_filer = config
        .current_filer
        .clone()
        .unwrap_or_else(|| Arc::new(NoCurrentFiler) as Arc<dyn CurrentFiler>);
    let lstater = config
        .lstater
        .clone()
        .unwrap_or_else(|| Arc::new(DefaultLstater) as Arc<dyn Lstater>);

    Walker {
        config,
        current_filer,
        lstater,
    }
    .walk()
}

struct Walker {
    config: ScanConfig,
    current_filer: Arc<dyn CurrentFiler>,
    lstater: Arc<dyn Lstater>,
}

/// Outcome of visiting one entry.
enum Visit {
    Continue,
    /// Do not descend into this subtree.
    SkipDir,
    /// Cancellation observed, stop the walk.
    Stop,
}

impl Walker {
    fn walk(self) -> Result<Receiver<FileEntry>> {
        debug!(
            dir = %self.config.dir.display(),
            subs = ?self.config.subs,
            block_size = self.config.block_size,
            "walk"
        );
        self.check_dir()?;

        let (to_hash_tx, to_hash_rx) = bounded::<FileEntry>(0);
        let (finished_tx, finished_rx) = bounded::<FileEntry>(0);

        let dir = self.config.dir.clone();
        let block_size = self.config.block_size;
        let hashers = self.config.hashers;
        let cancel = self.config.cancel.clone();
        let use_weak_hashes = self.config.use_weak_hashes;
        let tick_interval_s = self.config.progress_tick_interval_s;
        let folder = self.config.folder.clone();
        let events = self.config.events.clone();

        // The walker thread sends files that need hashing to the hasher
        // pool and everything else straight to the output stream.
        let walker_finished_tx = finished_tx.clone();
        thread::spawn(move || self.walk_roots(&to_hash_tx, &walker_finished_tx));

        if tick_interval_s < 0 {
            // No progress events required; feed the hashers directly from
            // the walker.
            hasher::spawn_parallel_hasher(
                dir,
                block_size,
                hashers,
                finished_tx,
                to_hash_rx,
                None,
                None,
                cancel,
                use_weak_hashes,
            );
            return Ok(finished_rx);
        }

        // Defaults to every 2 seconds.
        let tick_interval = Duration::from_secs(if tick_interval_s == 0 {
            2
        } else {
            tick_interval_s as u64
        });

        thread::spawn(move || {
            buffer_and_hash(
                dir,
                block_size,
                hashers,
                finished_tx,
                to_hash_rx,
                cancel,
                use_weak_hashes,
                tick_interval,
                folder,
                events,
            )
        });

        Ok(finished_rx)
    }

    fn check_dir(&self) -> Result<()> {
        let meta = self.lstater.lstat(&self.config.dir)?;
        if !meta.is_dir() {
            return Err(DriftsyncError::NotADirectory(self.config.dir.clone()));
        }
        Ok(())
    }

    fn walk_roots(&self, to_hash: &Sender<FileEntry>, finished: &Sender<FileEntry>) {
        let now = SystemTime::now();

        let mut roots: Vec<PathBuf> = if self.config.subs.is_empty() {
            vec![self.config.dir.clone()]
        } else {
            self.config
                .subs
                .iter()
                .map(|sub| self.config.dir.join(sub))
                .collect()
        };

        for link in &self.config.follow_symlinks {
            let path = self.config.dir.join(link);
            let path_str = path.to_string_lossy().into_owned();

            // The symlink must lie under one of the roots we intend to
            // scan. The trailing separator defeats partial component
            // matches such as "photos" vs "photos-old".
            let admitted = roots.iter().any(|allowed| {
                path_str.starts_with(&format!(
                    "{}{}",
                    allowed.display(),
                    std::path::MAIN_SEPARATOR
                ))
            });
            if !admitted {
                continue;
            }

            match fs::metadata(&path) {
                Ok(meta) if meta.is_dir() => roots.push(path),
                Ok(_) => SYMLINK_TO_FILE_WARNING.call_once(|| {
                    warn!(path = %path.display(), "following symlinks to files is unsupported");
                }),
                // The symlink points to something that doesn't exist.
                // Never mind.
                Err(_) => {}
            }
        }

        for root in &roots {
            if !self.walk_root(root, now, to_hash, finished) {
                return;
            }
        }
    }

    /// Walk one root to completion. Returns false when cancellation was
    /// observed and the remaining roots should be abandoned.
    fn walk_root(
        &self,
        root: &Path,
        now: SystemTime,
        to_hash: &Sender<FileEntry>,
        finished: &Sender<FileEntry>,
    ) -> bool {
        let mut it = WalkDir::new(root).follow_links(false).into_iter();
        loop {
            let entry = match it.next() {
                None => return true,
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    let err = DriftsyncError::Walk(err);
                    debug!(error = %err, "walk error");
                    continue;
                }
            };
            match self.visit(entry.path(), now, to_hash, finished) {
                Visit::Continue => {}
                Visit::SkipDir => {
                    if entry.file_type().is_dir() {
                        it.skip_current_dir();
                    }
                }
                Visit::Stop => return false,
            }
        }
    }

    fn visit(
        &self,
        abs_path: &Path,
        now: SystemTime,
        to_hash: &Sender<FileEntry>,
        finished: &Sender<FileEntry>,
    ) -> Visit {
        let rel = match abs_path.strip_prefix(&self.config.dir) {
            Ok(rel) => rel,
            Err(err) => {
                debug!(path = %abs_path.display(), error = %err, "path outside scan dir");
                return Visit::SkipDir;
            }
        };
        if rel.as_os_str().is_empty() {
            // The scan root itself.
            return Visit::Continue;
        }

        let Some(rel_path) = rel.to_str() else {
            warn!(path = %abs_path.display(), "file name is not valid UTF-8; skipping");
            return Visit::SkipDir;
        };
        // Emitted names are `/` separated. Only Windows has a different
        // path separator to convert; on Unix a backslash is an ordinary
        // name byte and must pass through untouched.
        let rel_path = if cfg!(windows) {
            rel_path.replace('\\', "/")
        } else {
            rel_path.to_string()
        };

        // The iteration metadata can be stale by the time we get here,
        // stat again.
        let meta = match self.lstater.lstat(abs_path) {
            Ok(meta) => meta,
            Err(err) => {
                debug!(%rel_path, error = %err, "lstat error");
                return Visit::SkipDir;
            }
        };

        if ignore::is_temporary(&rel_path) {
            debug!(%rel_path, "temporary");
            if meta.file_type().is_file() && older_than(&meta, self.config.temp_lifetime, now) {
                match fs::remove_file(abs_path) {
                    Ok(()) => debug!(%rel_path, "removed stale temporary"),
                    Err(err) => debug!(%rel_path, error = %err, "failed to remove stale temporary"),
                }
            }
            return Visit::Continue;
        }

        if ignore::is_internal(&rel_path) {
            debug!(%rel_path, "ignored (internal)");
            return Visit::SkipDir;
        }

        if let Some(matcher) = &self.config.matcher {
            if matcher.is_ignored(&rel_path) {
                debug!(%rel_path, "ignored (patterns)");
                return Visit::SkipDir;
            }
        }

        let rel_path = match normalize::normalize_path(
            &self.config.dir,
            abs_path,
            &rel_path,
            self.config.auto_normalize,
            self.lstater.as_ref(),
        ) {
            Some(rel_path) => rel_path,
            None => return Visit::SkipDir,
        };

        let file_type = meta.file_type();
        let keep_going = if file_type.is_symlink() {
            if self.config.follow_symlinks.iter().any(|l| *l == rel_path) {
                // Admitted separately as a scan root; descend into it
                // there rather than recording the link itself.
                return Visit::Continue;
            }
            self.walk_symlink(abs_path, &rel_path, finished)
        } else if file_type.is_dir() {
            self.walk_dir(&rel_path, &meta, finished)
        } else if file_type.is_file() {
            self.walk_regular(&rel_path, &meta, to_hash)
        } else {
            // Devices, sockets, fifos.
            true
        };

        if keep_going {
            Visit::Continue
        } else {
            Visit::Stop
        }
    }

    fn walk_regular(&self, rel_path: &str, meta: &Metadata, to_hash: &Sender<FileEntry>) -> bool {
        let mut cur_mode = mode_of(meta);
        if cfg!(windows) && is_windows_executable(rel_path) {
            cur_mode |= 0o111;
        }

        let (modified_s, modified_ns) = mtime_parts(meta);

        // A file is unchanged when it exists in the prior snapshot with
        // the same permissions (unless permissions are ignored or the
        // prior entry carries none), is not marked deleted, has the same
        // modification time and size, was a file, and was not invalid.
        let prior = self.current_filer.current_file(rel_path);
        if let Some(prior) = &prior {
            let perm_unchanged = self.config.ignore_perms
                || !prior.has_permission_bits()
                || perms_equal(prior.permissions, cur_mode);
            if perm_unchanged
                && !prior.deleted
                && prior.modified_s == modified_s
                && prior.modified_ns == modified_ns
                && prior.is_file()
                && !prior.invalid
                && prior.size == meta.len()
            {
                return true;
            }
            debug!(rel_path, "rescan");
        }

        let entry = FileEntry {
            name: rel_path.to_string(),
            kind: EntryKind::File,
            size: meta.len(),
            permissions: if self.config.ignore_perms {
                0
            } else {
                cur_mode & MASK_MODE_PERM
            },
            no_permissions: self.config.ignore_perms,
            modified_s,
            modified_ns,
            modified_by: self.config.short_id,
            version: prior
                .map(|p| p.version)
                .unwrap_or_default()
                .update(self.config.short_id),
            symlink_target: String::new(),
            blocks: Vec::new(),
            invalid: false,
            deleted: false,
        };
        debug!(rel_path, size = entry.size, "to hash");
        self.send(to_hash, entry)
    }

    fn walk_dir(&self, rel_path: &str, meta: &Metadata, finished: &Sender<FileEntry>) -> bool {
        // A directory is unchanged when the prior entry exists with the
        // same permissions (same relaxations as for files), is not marked
        // deleted, was a directory, and was not invalid.
        let prior = self.current_filer.current_file(rel_path);
        if let Some(prior) = &prior {
            let perm_unchanged = self.config.ignore_perms
                || !prior.has_permission_bits()
                || perms_equal(prior.permissions, mode_of(meta));
            if perm_unchanged && !prior.deleted && prior.is_directory() && !prior.invalid {
                return true;
            }
        }

        let (modified_s, modified_ns) = mtime_parts(meta);
        let entry = FileEntry {
            name: rel_path.to_string(),
            kind: EntryKind::Directory,
            size: 0,
            permissions: if self.config.ignore_perms {
                0
            } else {
                mode_of(meta) & MASK_MODE_PERM
            },
            no_permissions: self.config.ignore_perms,
            modified_s,
            modified_ns,
            modified_by: self.config.short_id,
            version: prior
                .map(|p| p.version)
                .unwrap_or_default()
                .update(self.config.short_id),
            symlink_target: String::new(),
            blocks: Vec::new(),
            invalid: false,
            deleted: false,
        };
        debug!(rel_path, "dir");
        self.send(finished, entry)
    }

    #[cfg(windows)]
    fn walk_symlink(&self, _abs_path: &Path, _rel_path: &str, _finished: &Sender<FileEntry>) -> bool {
        // Symlinks are not supported on Windows; ignore instead of
        // failing.
        true
    }

    #[cfg(not(windows))]
    fn walk_symlink(&self, abs_path: &Path, rel_path: &str, finished: &Sender<FileEntry>) -> bool {
        let target = match fs::read_link(abs_path) {
            Ok(target) => target.to_string_lossy().into_owned(),
            Err(err) => {
                debug!(rel_path, error = %err, "readlink error");
                return true;
            }
        };

        // A symlink is unchanged when the prior entry exists, is not
        // marked deleted, was a symlink, was not invalid, and points at
        // the same target.
        let prior = self.current_filer.current_file(rel_path);
        if let Some(prior) = &prior {
            if !prior.deleted && prior.is_symlink() && !prior.invalid && prior.symlink_target == target
            {
                return true;
            }
        }

        let entry = FileEntry {
            name: rel_path.to_string(),
            kind: EntryKind::Symlink,
            size: 0,
            permissions: 0,
            // Symlinks don't have permissions of their own.
            no_permissions: true,
            modified_s: 0,
            modified_ns: 0,
            modified_by: self.config.short_id,
            version: prior
                .map(|p| p.version)
                .unwrap_or_default()
                .update(self.config.short_id),
            symlink_target: target,
            blocks: Vec::new(),
            invalid: false,
            deleted: false,
        };
        debug!(rel_path, "symlink changed");
        self.send(finished, entry)
    }

    /// Send an entry, racing against cancellation. Returns false when the
    /// scan should stop.
    fn send(&self, tx: &Sender<FileEntry>, entry: FileEntry) -> bool {
        select! {
            send(tx, entry) -> res => res.is_ok(),
            recv(self.config.cancel) -> _ => false,
        }
    }
}

/// Buffer the full list of files to hash, then stream them to the hasher
/// pool while a separate thread emits progress events on every tick.
/// Knowing the denominator requires the walk to finish first; this trades
/// scan-to-first-hash latency for accurate progress.
#[allow(clippy::too_many_arguments)]
fn buffer_and_hash(
    dir: PathBuf,
    block_size: usize,
    hashers: usize,
    finished_tx: Sender<FileEntry>,
    to_hash_rx: Receiver<FileEntry>,
    cancel: Receiver<()>,
    use_weak_hashes: bool,
    tick_interval: Duration,
    folder: String,
    events: Option<Arc<dyn EventSink>>,
) {
    let mut files = Vec::new();
    let mut total: u64 = 1;
    for entry in to_hash_rx.iter() {
        total += entry.size;
        files.push(entry);
    }

    let (real_to_hash_tx, real_to_hash_rx) = bounded::<FileEntry>(0);
    let (done_tx, done_rx) = bounded::<()>(0);
    let counter = ByteCounter::new();

    hasher::spawn_parallel_hasher(
        dir.clone(),
        block_size,
        hashers,
        finished_tx,
        real_to_hash_rx,
        Some(Arc::clone(&counter)),
        Some(done_tx),
        cancel.clone(),
        use_weak_hashes,
    );

    {
        let counter = Arc::clone(&counter);
        let cancel = cancel.clone();
        thread::spawn(move || {
            let ticker = tick(tick_interval);
            loop {
                select! {
                    recv(done_rx) -> _ => {
                        debug!(dir = %dir.display(), "walk progress done");
                        break;
                    }
                    recv(ticker) -> _ => {
                        let current = counter.total();
                        let rate = counter.rate();
                        debug!(
                            current,
                            total,
                            rate_mib = rate / (1024.0 * 1024.0),
                            "scan progress"
                        );
                        if let Some(events) = &events {
                            events.scan_progress(ProgressEvent {
                                folder: folder.clone(),
                                current,
                                total,
                                rate,
                            });
                        }
                    }
                    recv(cancel) -> _ => break,
                }
            }
            counter.close();
        });
    }

    for entry in files {
        select! {
            send(real_to_hash_tx, entry) -> res => {
                if res.is_err() {
                    break;
                }
            }
            recv(cancel) -> _ => break,
        }
    }
}

fn older_than(meta: &Metadata, lifetime: Duration, now: SystemTime) -> bool {
    match meta.modified() {
        Ok(modified) => modified + lifetime < now,
        Err(_) => false,
    }
}

fn mtime_parts(meta: &Metadata) -> (i64, i32) {
    let Ok(modified) = meta.modified() else {
        return (0, 0);
    };
    match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, d.subsec_nanos() as i32),
        Err(err) => {
            let d = err.duration();
            (-(d.as_secs() as i64), -(d.subsec_nanos() as i32))
        }
    }
}

#[cfg(unix)]
fn mode_of(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_of(meta: &Metadata) -> u32 {
    // Synthesize a mode from what the platform reports.
    if meta.is_dir() {
        0o755
    } else if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// A no-op CurrentFiler.
struct NoCurrentFiler;

impl CurrentFiler for NoCurrentFiler {
    fn current_file(&self, _name: &str) -> Option<FileEntry> {
        None
    }
}

/// A plain-filesystem Lstater.
struct DefaultLstater;

impl Lstater for DefaultLstater {
    fn lstat(&self, path: &Path) -> io::Result<Metadata> {
        fs::symlink_metadata(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[cfg(not(windows))]
    #[test]
    fn perms_compare_all_nine_bits() {
        assert!(perms_equal(0o644, 0o644));
        assert!(!perms_equal(0o644, 0o640));
        assert!(perms_equal(0o100644, 0o644)); // type bits don't count
    }

    #[test]
    fn executable_extensions() {
        assert!(is_windows_executable("tools/Setup.EXE"));
        assert!(is_windows_executable("run.bat"));
        assert!(!is_windows_executable("exe"));
        assert!(!is_windows_executable("notes.txt"));
    }

    #[test]
    fn stale_and_fresh_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(b"x").unwrap();
        file.set_modified(UNIX_EPOCH).unwrap();
        drop(file);

        let meta = fs::symlink_metadata(&path).unwrap();
        let now = SystemTime::now();
        assert!(older_than(&meta, Duration::from_secs(3600), now));
        assert!(!older_than(&meta, Duration::from_secs(1 << 40), now));
    }

    #[test]
    fn mtime_splits_into_seconds_and_nanos() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m");
        let file = fs::File::create(&path).unwrap();
        file.set_modified(UNIX_EPOCH + Duration::new(1_000, 42)).unwrap();
        drop(file);

        let meta = fs::symlink_metadata(&path).unwrap();
        let (s, ns) = mtime_parts(&meta);
        assert_eq!(s, 1_000);
        assert_eq!(ns, 42);
    }
}
