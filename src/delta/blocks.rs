use crate::delta::rolling::RollingChecksum;
use serde::{Deserialize, Serialize};
use std::io::Read;

pub const DEFAULT_BLOCK_SIZE: usize = 128 * 1024;

/// Hash of one fixed-size block of file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Byte offset of the block within the file.
    pub offset: u64,
    /// Block length in bytes. Equal to the configured block size except for
    /// the last block, which may be shorter.
    pub size: u32,
    /// BLAKE3 hash of the block contents, truncated to 16 bytes.
    pub hash: [u8; 16],
    /// Rolling checksum of the block, 0 when weak hashing is disabled.
    pub weak_hash: u32,
}

/// Hash a single block of data at the given offset.
pub fn hash_block(offset: u64, chunk: &[u8], use_weak: bool) -> BlockInfo {
    let strong = blake3::hash(chunk);
    let mut hash = [0u8; 16];
    hash.copy_from_slice(&strong.as_bytes()[0..16]);

    let weak_hash = if use_weak {
        let mut weak = RollingChecksum::new();
        weak.update(chunk);
        weak.digest()
    } else {
        0
    };

    BlockInfo {
        offset,
        size: chunk.len() as u32,
        hash,
        weak_hash,
    }
}

/// Read `buf.len()` bytes unless EOF comes first. Returns the number of
/// bytes actually read; short only at EOF.
pub fn read_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Hash the whole of `reader` in blocks of `block_size`.
///
/// Every file yields at least one block: an empty input produces a single
/// zero-length block, so callers can rely on the block list being non-empty.
pub fn hash_blocks<R: Read>(
    reader: &mut R,
    block_size: usize,
    use_weak: bool,
) -> std::io::Result<Vec<BlockInfo>> {
    let mut blocks = Vec::new();
    let mut buffer = vec![0u8; block_size];
    let mut offset = 0u64;

    loop {
        let n = read_block(reader, &mut buffer)?;
        if n == 0 {
            break;
        }
        blocks.push(hash_block(offset, &buffer[0..n], use_weak));
        offset += n as u64;
    }

    if blocks.is_empty() {
        blocks.push(hash_block(0, &[], use_weak));
    }

    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn splits_into_aligned_blocks_with_short_tail() {
        let data = vec![7u8; 10];
        let blocks = hash_blocks(&mut Cursor::new(&data), 4, false).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(
            blocks.iter().map(|b| b.size).collect::<Vec<_>>(),
            vec![4, 4, 2]
        );
        assert_eq!(
            blocks.iter().map(|b| b.offset).collect::<Vec<_>>(),
            vec![0, 4, 8]
        );
    }

    #[test]
    fn exact_multiple_has_no_tail() {
        let data = vec![1u8; 8];
        let blocks = hash_blocks(&mut Cursor::new(&data), 4, false).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.size == 4));
    }

    #[test]
    fn empty_input_yields_one_empty_block() {
        let blocks = hash_blocks(&mut Cursor::new(&[] as &[u8]), 4, false).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].size, 0);
        assert_eq!(blocks[0].offset, 0);
    }

    #[test]
    fn same_content_same_hash() {
        let a = hash_blocks(&mut Cursor::new(b"hello world"), 4, false).unwrap();
        let b = hash_blocks(&mut Cursor::new(b"hello world"), 4, false).unwrap();
        assert_eq!(a, b);

        let c = hash_blocks(&mut Cursor::new(b"hello worle"), 4, false).unwrap();
        assert_ne!(a.last().unwrap().hash, c.last().unwrap().hash);
    }

    #[test]
    fn weak_hashes_only_when_requested() {
        let without = hash_blocks(&mut Cursor::new(b"abcdefgh"), 4, false).unwrap();
        assert!(without.iter().all(|b| b.weak_hash == 0));

        let with = hash_blocks(&mut Cursor::new(b"abcdefgh"), 4, true).unwrap();
        assert!(with.iter().all(|b| b.weak_hash != 0));

        // Strong hashes are unaffected by the weak hash switch.
        for (a, b) in without.iter().zip(&with) {
            assert_eq!(a.hash, b.hash);
        }
    }
}
