//! Reference host
//!
//! An in-memory object heap and a trace replayer that drives the analyzer the
//! way an instrumentation host would.

pub mod heap;
pub mod trace;

pub use heap::{Heap, HeapValue, View};
pub use trace::{parse_trace, Replayer, TraceEvent, TraceValue};
