//! Change detection strategies
//!
//! Each strategy answers one question: given a source file and the path
//! that would receive it, does the destination need to be (re)written?
//! Metadata strategies are O(1); content strategies read both files.

use crate::config::{HashAlgorithm, StrategyKind};
use crate::core::WorkerPool;
use crate::error::Result;
use crate::hash::{compare_files, hash_file, HashResult};
use std::fs::{File, Metadata};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Bytes sampled at each end by [`Strategy::HeadTail`]
pub const SAMPLE_WINDOW: u64 = 4096;

/// A change detection strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Destination missing or its modification time differs in either direction
    ModTime,
    /// Destination missing or its length differs
    Size,
    /// Destination missing, length differs, or the first or last 4 KiB differ
    HeadTail,
    /// Digests differ, or exactly one of the two files exists
    Hash(HashAlgorithm),
    /// Bytes differ, or exactly one of the two files exists
    Content,
    /// Copy unconditionally
    Always,
    /// Copy if any of the inner strategies says so, or if there are none
    Any(Vec<Strategy>),
}

impl Strategy {
    /// OR-combine strategies; nothing to combine means always copy
    pub fn combine(mut strategies: Vec<Strategy>) -> Strategy {
        match strategies.len() {
            0 => Strategy::Always,
            1 => strategies.remove(0),
            _ => Strategy::Any(strategies),
        }
    }

    /// Build the combined strategy for a configured selection
    pub fn from_kinds(kinds: &[StrategyKind], algorithm: HashAlgorithm) -> Strategy {
        let strategies = kinds
            .iter()
            .map(|kind| match kind {
                StrategyKind::ModTime => Strategy::ModTime,
                StrategyKind::Size => Strategy::Size,
                StrategyKind::HeadTail => Strategy::HeadTail,
                StrategyKind::Hash => Strategy::Hash(algorithm),
                StrategyKind::Content => Strategy::Content,
                StrategyKind::Always => Strategy::Always,
            })
            .collect();
        Self::combine(strategies)
    }

    /// Decide whether `destination` must be rewritten from `source`
    ///
    /// The pool is only used for sub-work, such as hashing both files at
    /// once. Read failures are logged; they never escape.
    pub fn should_copy(&self, source: &Path, destination: &Path, pool: &WorkerPool) -> bool {
        match self {
            Self::ModTime => by_mod_time(source, destination),
            Self::Size => by_size(source, destination),
            Self::HeadTail => by_head_tail(source, destination),
            Self::Hash(algorithm) => by_hash(source, destination, *algorithm, pool),
            Self::Content => by_content(source, destination),
            Self::Always => true,
            Self::Any(strategies) => {
                strategies.is_empty() || strategies.iter().any(|s| s.should_copy(source, destination, pool))
            }
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModTime => write!(f, "modification time"),
            Self::Size => write!(f, "size"),
            Self::HeadTail => write!(f, "head and tail"),
            Self::Hash(algorithm) => write!(f, "{} hash", algorithm.name()),
            Self::Content => write!(f, "content"),
            Self::Always => write!(f, "always"),
            Self::Any(strategies) => {
                let names: Vec<String> = strategies.iter().map(|s| s.to_string()).collect();
                write!(f, "{}", names.join(" or "))
            }
        }
    }
}

/// Both metadata records, or `None` when the destination is missing
fn metadata_pair(source: &Path, destination: &Path) -> Option<(Metadata, Metadata)> {
    let dst = std::fs::metadata(destination).ok()?;
    match std::fs::metadata(source) {
        Ok(src) => Some((src, dst)),
        Err(e) => {
            tracing::warn!("Can't stat {}: {}", source.display(), e);
            None
        }
    }
}

fn by_mod_time(source: &Path, destination: &Path) -> bool {
    let Some((src, dst)) = metadata_pair(source, destination) else {
        return true;
    };
    match (src.modified(), dst.modified()) {
        (Ok(a), Ok(b)) => a != b,
        _ => true,
    }
}

fn by_size(source: &Path, destination: &Path) -> bool {
    match metadata_pair(source, destination) {
        Some((src, dst)) => src.len() != dst.len(),
        None => true,
    }
}

fn by_head_tail(source: &Path, destination: &Path) -> bool {
    let Some((src, dst)) = metadata_pair(source, destination) else {
        return true;
    };
    if src.len() != dst.len() {
        return true;
    }

    let len = src.len();
    let window = SAMPLE_WINDOW.min(len);
    if window == 0 {
        return false;
    }

    let mut offsets = vec![0];
    if len > window {
        offsets.push(len - window);
    }

    for offset in offsets {
        match (read_window(source, offset, window), read_window(destination, offset, window)) {
            (Ok(a), Ok(b)) if a == b => {}
            (Ok(_), Ok(_)) => return true,
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(
                    "Can't sample {} against {}: {}",
                    source.display(),
                    destination.display(),
                    e
                );
                return true;
            }
        }
    }
    false
}

fn read_window(path: &Path, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Existence check shared by the content strategies
///
/// `Some(decision)` when at most one file exists, `None` when both do.
fn existence_decision(source: &Path, destination: &Path) -> Option<bool> {
    match (source.exists(), destination.exists()) {
        (true, true) => None,
        (a, b) => Some(a != b),
    }
}

fn by_hash(source: &Path, destination: &Path, algorithm: HashAlgorithm, pool: &WorkerPool) -> bool {
    if let Some(decision) = existence_decision(source, destination) {
        return decision;
    }

    let pending: Vec<_> = [source, destination]
        .into_iter()
        .map(|path| {
            let owned = path.to_path_buf();
            (path, pool.submit(move || hash_file(&owned, algorithm)))
        })
        .collect();

    let mut digests = Vec::with_capacity(2);
    for (path, handle) in pending {
        let digest: Option<Result<HashResult>> = match handle {
            Ok(handle) => handle.join(),
            // Pool already shut down; hash here
            Err(_) => Some(hash_file(path, algorithm)),
        };
        match digest {
            Some(Ok(digest)) => digests.push(digest),
            Some(Err(e)) => {
                tracing::warn!("Can't hash {}: {}", path.display(), e);
                return false;
            }
            None => return false,
        }
    }

    !digests[0].verify(&digests[1])
}

fn by_content(source: &Path, destination: &Path) -> bool {
    if let Some(decision) = existence_decision(source, destination) {
        return decision;
    }

    match compare_files(source, destination) {
        Ok(equal) => !equal,
        Err(e) => {
            tracing::warn!(
                "Can't compare {} with {}: {}",
                source.display(),
                destination.display(),
                e
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        src: std::path::PathBuf,
        dst: std::path::PathBuf,
        pool: WorkerPool,
    }

    fn fixture(src: Option<&[u8]>, dst: Option<&[u8]>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let src_path = dir.path().join("src.bin");
        let dst_path = dir.path().join("dst.bin");
        if let Some(content) = src {
            fs::write(&src_path, content).unwrap();
        }
        if let Some(content) = dst {
            fs::write(&dst_path, content).unwrap();
        }
        Fixture {
            _dir: dir,
            src: src_path,
            dst: dst_path,
            pool: WorkerPool::new(2, 16).unwrap(),
        }
    }

    impl Fixture {
        fn check(&self, strategy: &Strategy) -> bool {
            strategy.should_copy(&self.src, &self.dst, &self.pool)
        }
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 241) as u8).collect()
    }

    #[test]
    fn test_missing_destination_always_copies() {
        let f = fixture(Some(b"data"), None);
        for strategy in [
            Strategy::ModTime,
            Strategy::Size,
            Strategy::HeadTail,
            Strategy::Hash(HashAlgorithm::Sha256),
            Strategy::Content,
            Strategy::Always,
        ] {
            assert!(f.check(&strategy), "{}", strategy);
        }
    }

    #[test]
    fn test_mod_time_any_difference() {
        let f = fixture(Some(b"same"), Some(b"same"));
        set_file_mtime(&f.src, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
        set_file_mtime(&f.dst, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
        assert!(!f.check(&Strategy::ModTime));

        // Destination newer than source still counts
        set_file_mtime(&f.dst, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
        assert!(f.check(&Strategy::ModTime));

        set_file_mtime(&f.dst, FileTime::from_unix_time(1_500_000_000, 0)).unwrap();
        assert!(f.check(&Strategy::ModTime));
    }

    #[test]
    fn test_size() {
        assert!(!fixture(Some(b"abc"), Some(b"xyz")).check(&Strategy::Size));
        assert!(fixture(Some(b"abc"), Some(b"abcd")).check(&Strategy::Size));
    }

    #[test]
    fn test_head_tail() {
        let content = patterned(10_000);
        let f = fixture(Some(&content), Some(&content));
        assert!(!f.check(&Strategy::HeadTail));

        let mut head = content.clone();
        head[10] ^= 1;
        assert!(fixture(Some(&content), Some(&head)).check(&Strategy::HeadTail));

        let mut tail = content.clone();
        tail[9_999] ^= 1;
        assert!(fixture(Some(&content), Some(&tail)).check(&Strategy::HeadTail));

        // Interior changes are invisible to sampling
        let mut interior = content.clone();
        interior[5_000] ^= 1;
        assert!(!fixture(Some(&content), Some(&interior)).check(&Strategy::HeadTail));
    }

    #[test]
    fn test_head_tail_small_and_empty() {
        assert!(!fixture(Some(b""), Some(b"")).check(&Strategy::HeadTail));
        assert!(!fixture(Some(b"tiny"), Some(b"tiny")).check(&Strategy::HeadTail));
        assert!(fixture(Some(b"tiny"), Some(b"tinY")).check(&Strategy::HeadTail));
    }

    #[test]
    fn test_head_tail_window_boundary() {
        // One byte past the window: the tail sample starts at offset 1
        let content = patterned(SAMPLE_WINDOW as usize + 1);
        let mut last = content.clone();
        *last.last_mut().unwrap() ^= 0xFF;
        assert!(fixture(Some(&content), Some(&last)).check(&Strategy::HeadTail));
    }

    #[test]
    fn test_hash() {
        let strategy = Strategy::Hash(HashAlgorithm::Sha256);
        let content = patterned(50_000);
        assert!(!fixture(Some(&content), Some(&content)).check(&strategy));

        let mut changed = content.clone();
        changed[25_000] ^= 1;
        assert!(fixture(Some(&content), Some(&changed)).check(&strategy));
    }

    #[test]
    fn test_hash_existence() {
        let strategy = Strategy::Hash(HashAlgorithm::Blake3);
        assert!(fixture(None, Some(b"orphan")).check(&strategy));
        assert!(!fixture(None, None).check(&strategy));
    }

    #[test]
    fn test_hash_read_error_means_unchanged() {
        let strategy = Strategy::Hash(HashAlgorithm::Sha256);
        let f = fixture(Some(b""), None);
        fs::create_dir(&f.dst).unwrap();
        fs::write(f.dst.join("inner"), b"x").unwrap();

        // Hashed on the pool, then inline once the pool is gone
        assert!(!f.check(&strategy));
        f.pool.shutdown();
        assert!(!f.check(&strategy));
    }

    #[test]
    fn test_content_read_error_means_unchanged() {
        let f = fixture(None, None);
        fs::create_dir(&f.dst).unwrap();
        fs::write(f.dst.join("inner"), b"x").unwrap();
        // Same length as the directory entry so the comparison has to open both
        let dir_len = fs::metadata(&f.dst).unwrap().len();
        fs::write(&f.src, vec![0u8; dir_len as usize]).unwrap();
        assert!(!f.check(&Strategy::Content));

        // Existence asymmetry still forces a copy
        fs::remove_file(&f.src).unwrap();
        assert!(f.check(&Strategy::Content));
        assert!(f.check(&Strategy::Hash(HashAlgorithm::Blake3)));
    }

    #[test]
    fn test_hash_single_worker_and_shut_down_pool() {
        let strategy = Strategy::Hash(HashAlgorithm::Sha256);
        let mut f = fixture(Some(b"left"), Some(b"right"));
        f.pool = WorkerPool::new(1, 1).unwrap();
        assert!(f.check(&strategy));

        f.pool.shutdown();
        assert!(f.check(&strategy));
        fs::write(&f.dst, b"left").unwrap();
        assert!(!f.check(&strategy));
    }

    #[test]
    fn test_content() {
        let content = patterned(30_000);
        assert!(!fixture(Some(&content), Some(&content)).check(&Strategy::Content));

        let mut interior = content.clone();
        interior[15_000] ^= 1;
        assert!(fixture(Some(&content), Some(&interior)).check(&Strategy::Content));

        assert!(fixture(None, Some(b"orphan")).check(&Strategy::Content));
        assert!(!fixture(None, None).check(&Strategy::Content));
    }

    #[test]
    fn test_combine() {
        assert_eq!(Strategy::combine(vec![]), Strategy::Always);
        assert_eq!(Strategy::combine(vec![Strategy::Size]), Strategy::Size);

        let f = fixture(Some(b"abc"), Some(b"xyz"));
        assert!(!f.check(&Strategy::combine(vec![Strategy::Size])));
        assert!(f.check(&Strategy::combine(vec![Strategy::Size, Strategy::Content])));
        assert!(f.check(&Strategy::Any(vec![])));
    }

    #[test]
    fn test_from_kinds() {
        let strategy = Strategy::from_kinds(&[StrategyKind::Size, StrategyKind::Hash], HashAlgorithm::Blake3);
        assert_eq!(
            strategy,
            Strategy::Any(vec![Strategy::Size, Strategy::Hash(HashAlgorithm::Blake3)])
        );
        assert_eq!(strategy.to_string(), "size or BLAKE3 hash");
        assert_eq!(Strategy::from_kinds(&[], HashAlgorithm::Sha256), Strategy::Always);
    }
}
