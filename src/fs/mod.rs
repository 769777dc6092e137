//! Filesystem layer
//!
//! Tree scanning and the byte-moving primitives used by copy tasks.

pub mod operations;
pub mod scanner;

pub use operations::{prepare_destination, transfer, transfer_range, TransferOutcome};
pub use scanner::{CopyCandidate, ScanResult, Scanner};
