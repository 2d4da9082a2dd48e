//! Error types for sniperkv
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using SniperError
pub type Result<T> = std::result::Result<T, SniperError>;

/// Unified error type for sniperkv operations
#[derive(Debug, Error)]
pub enum SniperError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    KeyNotFound,

    /// The digest is already mapped to a different key.
    #[error("Hash collision: digest {digest:#010x} is held by a different key")]
    Collision { digest: u32 },

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt state: {0}")]
    CorruptState(String),

    #[error("Key too long: {0} bytes (max {})", u16::MAX)]
    KeyTooLong(usize),

    #[error("Record too large: {0} bytes")]
    RecordTooLarge(u64),

    #[error("Shard {shard} is full")]
    ShardFull { shard: usize },

    #[error("Value is not a counter: expected 8 bytes, got {0}")]
    InvalidCounter(usize),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration / Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store at {0:?} is open")]
    StoreOpen(PathBuf),
}

impl SniperError {
    /// True for [`SniperError::KeyNotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, SniperError::KeyNotFound)
    }

    /// True for [`SniperError::Collision`]
    pub fn is_collision(&self) -> bool {
        matches!(self, SniperError::Collision { .. })
    }
}
