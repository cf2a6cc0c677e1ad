//! # tierstream
//!
//! A storage engine for append-only streams of timestamped datapoints with:
//! - An atomic hot tier holding the recent tail of every stream
//! - A cold tier of immutable, compressed, fixed-size batches
//! - A promotion pipeline that moves completed batches from hot to cold
//! - Range reads that cross the tier boundary transparently
//! - WAL + checkpoint durability for the hot tier
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         StreamDb                             │
//! │        insert / range / time_to_index / delete               │
//! └──────────┬──────────────────────────────────────┬───────────┘
//!            │ writes                                │ reads
//! ┌──────────▼──────────┐                  ┌─────────▼──────────┐
//! │      Hot Tier       │                  │    DataRange       │
//! │ per-stream slots    │◄─────────────────┤ hot tail or        │
//! │ batch queue         │                  │ cold then hot      │
//! └──┬───────────┬──────┘                  └─────────┬──────────┘
//!    │           │ completed batches                 │
//!    ▼           ▼                                   │
//! ┌──────┐  ┌─────────────────┐  insert/trim/ack  ┌──▼─────────────┐
//! │ WAL  │  │ Promotion       ├──────────────────►│   Cold Tier    │
//! │ +snap│  │ workers/sweeper │                   │ (batch files)  │
//! └──────┘  └─────────────────┘                   └────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod datapoint;
pub mod wal;
pub mod hot;
pub mod cold;
pub mod pipeline;
pub mod range;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, TierError};
pub use config::Config;
pub use datapoint::{Datapoint, Payload, Scope, StreamKey};
pub use engine::StreamDb;
pub use range::DataRange;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of tierstream
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
