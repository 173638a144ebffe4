//! Low-level primitives the LOB engine is built on.
//!
//! Includes byte utilities, the in-memory page store, mini-transactions and
//! the redo log they append to.

/// Byte-level utilities and encoding/decoding.
///
/// Bounds-checked big-endian accessors, varints and a parsing cursor.
pub mod bytes;

/// Mini-transactions: page latches and redo capture.
pub mod mtr;

/// Page store abstraction and its in-memory implementation.
///
/// Manages page allocation, the free-page cache and page frames.
pub mod pager;

/// Checksummed redo batches produced by committed mini-transactions.
pub mod wal;
