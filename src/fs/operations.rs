//! File operations: destination preparation and chunked transfer
//!
//! The transfer moves bytes with `copy_file_range` on Linux so the data never
//! passes through user space, falling back to a buffered copy when the
//! kernel refuses the first call (cross-device on older kernels, unsupported
//! filesystems).

use crate::core::CancelToken;
use crate::error::{IoResultExt, Result, SyncError};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Outcome of a transfer that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Bytes written to the destination
    pub transferred: u64,
    /// Whether the transfer stopped early on cancellation
    pub cancelled: bool,
}

/// Make room for a fresh copy at `destination`
///
/// Removes a stale destination file and creates missing parent directories.
/// A parent created concurrently by another task is not an error. Every
/// failure returned from here is fatal for the run.
pub fn prepare_destination(destination: &Path) -> Result<()> {
    if std::fs::symlink_metadata(destination).is_ok() {
        std::fs::remove_file(destination).map_err(|source| SyncError::StaleDestination {
            path: destination.to_path_buf(),
            source,
        })?;
    }

    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => return Ok(()),
    };

    match std::fs::metadata(parent) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(SyncError::NotADirectory(parent.to_path_buf())),
        Err(_) => match std::fs::create_dir_all(parent) {
            Ok(()) => Ok(()),
            // Lost a race with a sibling creating the same directory
            Err(_) if parent.is_dir() => Ok(()),
            Err(source) => Err(SyncError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            }),
        },
    }
}

/// Copy the whole of `source` to `destination`
///
/// See [`transfer_range`].
pub fn transfer<F>(
    source: &Path,
    destination: &Path,
    chunk_size: usize,
    token: &CancelToken,
    on_chunk: F,
) -> Result<TransferOutcome>
where
    F: FnMut(u64),
{
    let len = std::fs::metadata(source).with_path(source)?.len();
    transfer_range(source, destination, len, chunk_size, token, on_chunk)
}

/// Copy the first `len` bytes of `source` to a freshly truncated `destination`
///
/// Bytes move in chunks of at most `chunk_size`. After each chunk
/// `on_chunk` receives the running total. The token is checked before every
/// chunk; a cancelled transfer leaves the partial destination in place.
/// A source that ends before `len` bytes is an `UnexpectedEof` error.
pub fn transfer_range<F>(
    source: &Path,
    destination: &Path,
    len: u64,
    chunk_size: usize,
    token: &CancelToken,
    mut on_chunk: F,
) -> Result<TransferOutcome>
where
    F: FnMut(u64),
{
    let mut src = File::open(source).with_path(source)?;
    let mut dst = File::create(destination).with_path(destination)?;

    let chunk_size = chunk_size.max(1) as u64;
    let mut zero_copy = cfg!(target_os = "linux");
    let mut transferred: u64 = 0;

    while transferred < len {
        if token.is_cancelled() {
            tracing::debug!(
                "Transfer of {} cancelled at {} of {} bytes",
                source.display(),
                transferred,
                len
            );
            return Ok(TransferOutcome {
                transferred,
                cancelled: true,
            });
        }

        let want = chunk_size.min(len - transferred);

        let copied = if zero_copy {
            match copy_chunk_zero_copy(&src, &dst, transferred, want) {
                Ok(n) => n,
                Err(err) if transferred == 0 => {
                    tracing::debug!("copy_file_range unavailable for {}: {}", source.display(), err);
                    zero_copy = false;
                    copy_chunk_buffered(&mut src, &mut dst, want).with_path(source)?
                }
                Err(err) => return Err(SyncError::io(source, err)),
            }
        } else {
            copy_chunk_buffered(&mut src, &mut dst, want).with_path(source)?
        };

        transferred += copied;
        if copied < want {
            return Err(SyncError::io(
                source,
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("source ended after {} of {} bytes", transferred, len),
                ),
            ));
        }

        on_chunk(transferred);
    }

    dst.flush().with_path(destination)?;

    Ok(TransferOutcome {
        transferred,
        cancelled: false,
    })
}

/// Copy up to `want` bytes at `offset` in kernel space; short only at EOF
#[cfg(target_os = "linux")]
fn copy_chunk_zero_copy(src: &File, dst: &File, offset: u64, want: u64) -> std::io::Result<u64> {
    use std::os::unix::io::AsRawFd;

    let mut offset_in = offset as i64;
    let mut offset_out = offset as i64;
    let mut copied: u64 = 0;

    while copied < want {
        let to_copy = (want - copied).min(i64::MAX as u64) as usize;

        let n = unsafe {
            libc::copy_file_range(
                src.as_raw_fd(),
                &mut offset_in,
                dst.as_raw_fd(),
                &mut offset_out,
                to_copy,
                0,
            )
        };

        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            break; // EOF
        }
        copied += n as u64;
    }

    Ok(copied)
}

#[cfg(not(target_os = "linux"))]
fn copy_chunk_zero_copy(_src: &File, _dst: &File, _offset: u64, _want: u64) -> std::io::Result<u64> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "copy_file_range is Linux only",
    ))
}

/// Copy up to `want` bytes from the current positions; short only at EOF
fn copy_chunk_buffered(src: &mut File, dst: &mut File, want: u64) -> std::io::Result<u64> {
    let mut limited = Read::by_ref(src).take(want);
    std::io::copy(&mut limited, dst)
}
