//! Datapoint Module
//!
//! The unit of data stored in a stream, the keys that address streams, and
//! the binary codec shared by the hot tier, the WAL and cold batches.
//!
//! ## Stream Addressing
//! ```text
//!   owner ──┬── stream "temp" ──┬── substream ""          (primary)
//!           │                   └── substream "downlink"  (reverse channel)
//!           └── stream "gps"  ──── substream ""
//! ```
//! Every substream is an independent append log. The owner groups
//! everything that can be deleted with one call.

mod payload;
pub mod codec;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use payload::Payload;

/// A single timestamped value
///
/// Field order is the wire order: `[timestamp][origin][payload]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    /// Seconds since the epoch, sub-second precision allowed
    pub timestamp: f64,

    /// Writer identity when it differs from the stream's owner
    pub origin: Option<String>,

    /// Opaque value
    pub payload: Payload,
}

impl Datapoint {
    pub fn new(timestamp: f64, payload: impl Into<Payload>) -> Self {
        Self {
            timestamp,
            origin: None,
            payload: payload.into(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

impl fmt::Display for Datapoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[T={} D={}", self.timestamp, self.payload)?;
        if let Some(origin) = &self.origin {
            write!(f, " O={}", origin)?;
        }
        write!(f, "]")
    }
}

/// Identifies one append log: `(owner, stream, substream)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    pub owner: String,
    pub stream: String,
    pub substream: String,
}

impl StreamKey {
    pub fn new(owner: impl Into<String>, stream: impl Into<String>, substream: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            stream: stream.into(),
            substream: substream.into(),
        }
    }

    /// The primary partition of a stream
    pub fn primary(owner: impl Into<String>, stream: impl Into<String>) -> Self {
        Self::new(owner, stream, "")
    }

    /// The reverse-channel partition of a stream
    pub fn downlink(owner: impl Into<String>, stream: impl Into<String>) -> Self {
        Self::new(owner, stream, "downlink")
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{}:{}", self.owner, self.stream, self.substream)
    }
}

/// The set of stream keys touched by a delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// Exactly one substream
    Substream(StreamKey),

    /// Every substream of one stream
    Stream { owner: String, stream: String },

    /// Everything under an owner
    Owner(String),
}

impl Scope {
    pub fn contains(&self, key: &StreamKey) -> bool {
        match self {
            Scope::Substream(k) => k == key,
            Scope::Stream { owner, stream } => &key.owner == owner && &key.stream == stream,
            Scope::Owner(owner) => &key.owner == owner,
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            Scope::Substream(k) => &k.owner,
            Scope::Stream { owner, .. } => owner,
            Scope::Owner(owner) => owner,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Substream(k) => write!(f, "{}", k),
            Scope::Stream { owner, stream } => write!(f, "{{{}}}{}:*", owner, stream),
            Scope::Owner(owner) => write!(f, "{{{}}}*", owner),
        }
    }
}

/// True if timestamps never decrease
pub fn is_timestamp_ordered(points: &[Datapoint]) -> bool {
    points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
}

/// Position of the first datapoint with a timestamp strictly greater than
/// `timestamp`, or `None` if there is no such datapoint.
///
/// Requires `points` to be timestamp ordered.
pub fn find_time_index(points: &[Datapoint], timestamp: f64) -> Option<usize> {
    let pos = points.partition_point(|dp| dp.timestamp <= timestamp);
    if pos < points.len() {
        Some(pos)
    } else {
        None
    }
}
