//! Concurrent in-memory market state shared between recorder tasks and
//! facade callers.

pub mod depth;
pub mod registry;
pub mod spread_history;
pub mod stats;

pub use depth::{
    filter_and_merge, BookDelta, DeltaOutcome, DepthError, LevelUpdate, OrderBookStore,
    SequencePolicy,
};
pub use registry::OrderRegistry;
pub use spread_history::{sample_spreads, SpreadRingBuffer};
