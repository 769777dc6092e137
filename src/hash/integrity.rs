//! Content hashing and byte-exact comparison
//!
//! Files are consumed in fixed 8 KiB blocks, through a memory map when the
//! file fits in an addressable region and through a plain read loop
//! otherwise. Both paths feed the digest identical blocks, so the result
//! never depends on which one was taken.

use crate::config::HashAlgorithm;
use crate::error::{IoResultExt, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Block size used by hashing and comparison
pub const BLOCK_SIZE: usize = 8 * 1024;

/// Files up to this size are read through a memory map
pub const MAPPED_READ_LIMIT: u64 = i32::MAX as u64;

/// Hash result as hex string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashResult {
    /// The hash algorithm used
    pub algorithm: HashAlgorithm,
    /// Hash value as lowercase hex string
    pub hash: String,
    /// File size in bytes
    pub size: u64,
}

impl HashResult {
    /// Create a new hash result
    pub fn new(algorithm: HashAlgorithm, hash: String, size: u64) -> Self {
        Self { algorithm, hash, size }
    }

    /// Verify against another hash result
    pub fn verify(&self, other: &HashResult) -> bool {
        self.algorithm == other.algorithm && self.hash == other.hash
    }
}

impl std::fmt::Display for HashResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

/// Unified hasher that supports all algorithms
pub enum Hasher {
    /// XXHash3 128-bit
    XXHash3(xxhash_rust::xxh3::Xxh3),
    /// XXHash64
    XXHash64(xxhash_rust::xxh64::Xxh64),
    /// BLAKE3
    Blake3(blake3::Hasher),
    /// SHA-256
    Sha256(sha2::Sha256),
}

impl Hasher {
    /// Create a new hasher for the given algorithm
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::XXHash3 => Self::XXHash3(xxhash_rust::xxh3::Xxh3::new()),
            HashAlgorithm::XXHash64 => Self::XXHash64(xxhash_rust::xxh64::Xxh64::new(0)),
            HashAlgorithm::Blake3 => Self::Blake3(blake3::Hasher::new()),
            HashAlgorithm::Sha256 => {
                use sha2::Digest;
                Self::Sha256(sha2::Sha256::new())
            }
        }
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::XXHash3(h) => h.update(data),
            Self::XXHash64(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
            Self::Sha256(h) => {
                use sha2::Digest;
                h.update(data);
            }
        }
    }

    /// Finalize and get the hash as hex string
    pub fn finalize(self) -> String {
        match self {
            Self::XXHash3(h) => format!("{:032x}", h.digest128()),
            Self::XXHash64(h) => format!("{:016x}", h.digest()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
            Self::Sha256(h) => {
                use sha2::Digest;
                hex::encode(h.finalize())
            }
        }
    }
}

/// Compute the digest of a file
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<HashResult> {
    hash_file_with_limit(path, algorithm, MAPPED_READ_LIMIT)
}

/// Compute the digest of a file, mapping it only when it is at most `mapped_limit` bytes
pub fn hash_file_with_limit(path: &Path, algorithm: HashAlgorithm, mapped_limit: u64) -> Result<HashResult> {
    let file = File::open(path).with_path(path)?;
    let size = file.metadata().with_path(path)?.len();
    let mut hasher = Hasher::new(algorithm);

    if size <= mapped_limit {
        hash_mapped(path, &file, size, &mut hasher)?;
    } else {
        hash_streamed(path, file, &mut hasher)?;
    }

    Ok(HashResult::new(algorithm, hasher.finalize(), size))
}

fn hash_mapped(path: &Path, file: &File, size: u64, hasher: &mut Hasher) -> Result<()> {
    // Zero-length files cannot be mapped on every platform
    if size == 0 {
        return Ok(());
    }
    // SAFETY: the map is read-only and dropped before this function returns.
    let map = unsafe { Mmap::map(file) }.with_path(path)?;
    for block in map.chunks(BLOCK_SIZE) {
        hasher.update(block);
    }
    Ok(())
}

fn hash_streamed(path: &Path, file: File, hasher: &mut Hasher) -> Result<()> {
    let mut reader = BufReader::with_capacity(BLOCK_SIZE * 8, file);
    let mut block = vec![0u8; BLOCK_SIZE];
    loop {
        let filled = fill_block(&mut reader, &mut block).with_path(path)?;
        if filled == 0 {
            break;
        }
        hasher.update(&block[..filled]);
    }
    Ok(())
}

/// Compute hash of data in memory
pub fn hash_bytes(data: &[u8], algorithm: HashAlgorithm) -> HashResult {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    HashResult::new(algorithm, hasher.finalize(), data.len() as u64)
}

/// Batch hash multiple files in parallel
pub fn hash_files_parallel(paths: &[&Path], algorithm: HashAlgorithm) -> Vec<Result<HashResult>> {
    paths
        .par_iter()
        .map(|path| hash_file(path, algorithm))
        .collect()
}

/// Check whether two files hold identical bytes
///
/// Files of different lengths are rejected from metadata alone, without
/// reading any content. Otherwise blocks are compared in order and the
/// first mismatch ends the scan.
pub fn compare_files(first: &Path, second: &Path) -> Result<bool> {
    compare_files_with_limit(first, second, MAPPED_READ_LIMIT)
}

/// Like [`compare_files`], mapping the files only when they are at most `mapped_limit` bytes
pub fn compare_files_with_limit(first: &Path, second: &Path, mapped_limit: u64) -> Result<bool> {
    let first_len = std::fs::metadata(first).with_path(first)?.len();
    let second_len = std::fs::metadata(second).with_path(second)?.len();

    if first_len != second_len {
        return Ok(false);
    }
    if first_len == 0 {
        return Ok(true);
    }

    let a = File::open(first).with_path(first)?;
    let b = File::open(second).with_path(second)?;

    if first_len <= mapped_limit {
        // SAFETY: both maps are read-only and local to this block.
        let map_a = unsafe { Mmap::map(&a) }.with_path(first)?;
        let map_b = unsafe { Mmap::map(&b) }.with_path(second)?;
        if map_a.len() != map_b.len() {
            return Ok(false);
        }
        Ok(map_a
            .chunks(BLOCK_SIZE)
            .zip(map_b.chunks(BLOCK_SIZE))
            .all(|(x, y)| x == y))
    } else {
        compare_streamed(first, a, second, b)
    }
}

fn compare_streamed(first: &Path, a: File, second: &Path, b: File) -> Result<bool> {
    let mut reader_a = BufReader::with_capacity(BLOCK_SIZE * 8, a);
    let mut reader_b = BufReader::with_capacity(BLOCK_SIZE * 8, b);
    let mut block_a = vec![0u8; BLOCK_SIZE];
    let mut block_b = vec![0u8; BLOCK_SIZE];

    loop {
        let filled_a = fill_block(&mut reader_a, &mut block_a).with_path(first)?;
        let filled_b = fill_block(&mut reader_b, &mut block_b).with_path(second)?;

        if filled_a != filled_b || block_a[..filled_a] != block_b[..filled_b] {
            return Ok(false);
        }
        if filled_a == 0 {
            return Ok(true);
        }
    }
}

/// Read until `block` is full or the reader is exhausted
fn fill_block<R: Read>(reader: &mut R, block: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < block.len() {
        match reader.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
