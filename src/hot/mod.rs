//! Hot Tier Module
//!
//! Recent, not yet archived datapoints of every stream, plus the batch
//! queue feeding the promotion pipeline.
//!
//! ## Concurrency Model
//! ```text
//!   streams: RwLock<BTreeMap<StreamKey, Arc<Mutex<HotStream>>>>
//!                               │
//!            map lock: lookup / create / remove slots only
//!                               │
//!            slot lock: every read or mutation of one stream
//! ```
//! Lock order: checkpoint gate → stream slot → WAL writer → queue.
//! Mutators hold the gate shared; a checkpoint holds it exclusively so the
//! snapshot and the WAL truncation see no mutation in between.
//!
//! ## Generations
//! Each stream key carries a generation that starts at 0 and grows by one
//! every time the key is deleted and created again. Batch references and
//! archived batches carry it too, so work queued for a deleted incarnation
//! never touches the one that replaced it.

mod cache;
mod queue;
mod snapshot;
mod table;

pub use cache::HotCache;
pub use queue::{BatchQueue, BatchRef};
pub use snapshot::{HotSnapshot, StreamState};
pub use table::{resolve_indices, HotStream, PreparedInsert, StreamMeta, TimeLookup, RESTAMP_EPSILON};

use crate::datapoint::Datapoint;

/// Answer of a hot tier range read
#[derive(Debug, Clone, PartialEq)]
pub enum HotRange {
    /// The hot tier holds the whole range
    Data(Vec<Datapoint>),
    /// The range starts below the hot floor; read it through the cold tier
    Cold,
}
