//! # sniperkv
//!
//! An embedded, disk-resident key-value store with:
//! - A hashed, sharded index of 32-bit digests to packed 32-bit addresses
//! - Power-of-two slot allocation with per-class free-lists
//! - Hash collision detection by reading stored keys back
//! - Crash recovery by scanning self-describing slot files
//! - Per-shard Single-writer/multi-reader concurrency
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Host Process                         │
//! │                    (Many Caller Threads)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  Get / Set / Delete / Incr / Decr
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                          Store                              │
//! │          digest = xxh32(key), shard = digest % N            │
//! └──────┬──────────────────────┬───────────────────────┬───────┘
//!        │                      │                       │
//!        ▼                      ▼                       ▼
//!  ┌───────────┐          ┌───────────┐           ┌───────────┐
//!  │  Shard 0  │          │  Shard 1  │    ...    │ Shard N-1 │
//!  │ (RwLock)  │          │ (RwLock)  │           │ (RwLock)  │
//!  │ index     │          │ index     │           │ index     │
//!  │ free-list │          │ free-list │           │ free-list │
//!  └─────┬─────┘          └─────┬─────┘           └─────┬─────┘
//!        ▼                      ▼                       ▼
//!  shard_00000.kv         shard_00001.kv          shard_0NNNN.kv
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use sniperkv::{Config, Store};
//!
//! fn main() -> sniperkv::Result<()> {
//!     let store = Store::open(Config::builder().data_dir("/tmp/sniper").build())?;
//!     store.set(b"hello", b"world")?;
//!     assert_eq!(store.get(b"hello")?, b"world".to_vec());
//!     assert_eq!(store.incr(b"visits", 1)?, 1);
//!     store.close()
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod addr;
pub mod file;
pub mod hash;
pub mod pow2;
pub mod shard;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, SniperError};
pub use config::{Config, ConfigBuilder, SyncStrategy};
pub use store::{delete_store, restore_store, Store};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of sniperkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
