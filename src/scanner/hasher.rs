use crossbeam_channel::{select, Receiver, Sender, TryRecvError};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::debug;

use crate::delta::blocks::{hash_blocks, BlockInfo};
use crate::scanner::progress::ByteCounter;
use crate::scanner::FileEntry;
use crate::{DriftsyncError, Result};

/// True once the cancellation signal has fired (message sent or sender
/// dropped).
pub(crate) fn cancelled(cancel: &Receiver<()>) -> bool {
    matches!(cancel.try_recv(), Ok(()) | Err(TryRecvError::Disconnected))
}

/// Start `workers` hasher threads consuming file entries from `inbox`,
/// attaching block lists and forwarding the finished entries to `outbox`.
///
/// The outbox closes once every worker has exited; when `done` is given its
/// receiving side is disconnected at that same point, signalling the
/// pipeline is drained. No ordering is preserved between inputs and outputs.
#[allow(clippy::too_many_arguments)]
pub fn spawn_parallel_hasher(
    dir: PathBuf,
    block_size: usize,
    workers: usize,
    outbox: Sender<FileEntry>,
    inbox: Receiver<FileEntry>,
    counter: Option<Arc<ByteCounter>>,
    done: Option<Sender<()>>,
    cancel: Receiver<()>,
    use_weak_hashes: bool,
) {
    let mut handles = Vec::with_capacity(workers.max(1));
    for _ in 0..workers.max(1) {
        let dir = dir.clone();
        let outbox = outbox.clone();
        let inbox = inbox.clone();
        let counter = counter.clone();
        let cancel = cancel.clone();
        handles.push(thread::spawn(move || {
            hash_loop(
                &dir,
                block_size,
                outbox,
                inbox,
                counter,
                cancel,
                use_weak_hashes,
            );
        }));
    }
    // The workers hold the only outbox clones that matter from here on; the
    // original is dropped so the output stream closes when they exit.
    drop(outbox);

    thread::spawn(move || {
        for handle in handles {
            let _ = handle.join();
        }
        drop(done);
    });
}

fn hash_loop(
    dir: &Path,
    block_size: usize,
    outbox: Sender<FileEntry>,
    inbox: Receiver<FileEntry>,
    counter: Option<Arc<ByteCounter>>,
    cancel: Receiver<()>,
    use_weak_hashes: bool,
) {
    loop {
        let mut entry = select! {
            recv(inbox) -> msg => match msg {
                Ok(entry) => entry,
                Err(_) => return, // inbox closed and drained
            },
            recv(cancel) -> _ => return,
        };

        match hash_file(
            dir,
            &entry,
            block_size,
            counter.as_deref(),
            &cancel,
            use_weak_hashes,
        ) {
            Ok(blocks) => {
                entry.blocks = blocks;
                select! {
                    send(outbox, entry) -> res => {
                        if res.is_err() {
                            return;
                        }
                    }
                    recv(cancel) -> _ => return,
                }
            }
            Err(DriftsyncError::Cancelled) => return,
            Err(err) => {
                debug!(name = %entry.name, error = %err, "hash error");
            }
        }
    }
}

fn hash_file(
    dir: &Path,
    entry: &FileEntry,
    block_size: usize,
    counter: Option<&ByteCounter>,
    cancel: &Receiver<()>,
    use_weak_hashes: bool,
) -> Result<Vec<BlockInfo>> {
    let path = dir.join(&entry.name);
    let file = File::open(&path)?;
    let mut reader = CountingReader {
        inner: file,
        counter,
        cancel,
    };

    let blocks = match hash_blocks(&mut reader, block_size, use_weak_hashes) {
        Ok(blocks) => blocks,
        Err(err) => {
            // A read abandoned by cancellation surfaces as an IO error
            // from the reader wrapper.
            if cancelled(cancel) {
                return Err(DriftsyncError::Cancelled);
            }
            return Err(err.into());
        }
    };

    // The file may have shrunk or grown since the walker saw it. Drop it;
    // the next scan will pick up whatever it has become.
    let hashed: u64 = blocks.iter().map(|b| u64::from(b.size)).sum();
    if hashed != entry.size {
        return Err(DriftsyncError::ContentChanged { path });
    }

    Ok(blocks)
}

/// Reader wrapper that feeds read counts into the progress counter and
/// observes cancellation between reads, bounding the work done after the
/// signal fires to one in-flight block.
struct CountingReader<'a, R> {
    inner: R,
    counter: Option<&'a ByteCounter>,
    cancel: &'a Receiver<()>,
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if cancelled(self.cancel) {
            return Err(io::Error::new(io::ErrorKind::Other, "hashing cancelled"));
        }
        let n = self.inner.read(buf)?;
        if let Some(counter) = self.counter {
            counter.update(n as u64);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};
    use std::io::Write;

    fn entry_for(name: &str, size: u64) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            size,
            ..FileEntry::default()
        }
    }

    #[test]
    fn hashes_and_forwards_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("a.bin"))
            .unwrap()
            .write_all(&[9u8; 10])
            .unwrap();

        let (in_tx, in_rx) = unbounded();
        let (out_tx, out_rx) = unbounded();
        spawn_parallel_hasher(
            dir.path().to_path_buf(),
            4,
            2,
            out_tx,
            in_rx,
            None,
            None,
            crossbeam_channel::never(),
            false,
        );

        in_tx.send(entry_for("a.bin", 10)).unwrap();
        drop(in_tx);

        let out: Vec<FileEntry> = out_rx.iter().collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].blocks.len(), 3);
    }

    #[test]
    fn size_mismatch_discards_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("short.bin"))
            .unwrap()
            .write_all(&[1u8; 4])
            .unwrap();

        let (in_tx, in_rx) = unbounded();
        let (out_tx, out_rx) = unbounded();
        spawn_parallel_hasher(
            dir.path().to_path_buf(),
            4,
            1,
            out_tx,
            in_rx,
            None,
            None,
            crossbeam_channel::never(),
            false,
        );

        // The walker believed the file was larger than it is now.
        in_tx.send(entry_for("short.bin", 100)).unwrap();
        drop(in_tx);

        assert!(out_rx.iter().next().is_none());
    }

    #[test]
    fn missing_file_discards_entry_and_signals_done() {
        let dir = tempfile::tempdir().unwrap();
        let (in_tx, in_rx) = unbounded();
        let (out_tx, out_rx) = unbounded();
        let (done_tx, done_rx) = bounded::<()>(0);
        spawn_parallel_hasher(
            dir.path().to_path_buf(),
            4,
            1,
            out_tx,
            in_rx,
            None,
            Some(done_tx),
            crossbeam_channel::never(),
            false,
        );

        in_tx.send(entry_for("gone.bin", 1)).unwrap();
        drop(in_tx);

        assert!(out_rx.iter().next().is_none());
        // done disconnects once the pool has wound down
        assert!(done_rx.recv().is_err());
    }
}
