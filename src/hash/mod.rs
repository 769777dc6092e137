//! Hash computation and content comparison module
//!
//! Provides streamed hashing with XXHash3, BLAKE3 and SHA-256, and
//! block-wise byte comparison of whole files.

mod integrity;

pub use integrity::*;
