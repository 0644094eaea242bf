//! Runtime shape and array-representation analyzer
//!
//! Observes property reads and writes and function invocations of a dynamically
//! typed, prototype-based program, and reports the patterns that defeat JIT
//! optimizations: polymorphic property accesses, array representation flips,
//! reads of uninitialized elements, incontiguous array writes and fields
//! created outside their constructor.

pub mod analyzer;
pub mod arrays;
pub mod config;
pub mod error;
pub mod host;
pub mod report;
pub mod shape;
pub mod snapshot;
pub mod stack;
pub mod store;
pub mod value;

pub use analyzer::{Analyzer, Invocation};
pub use arrays::{ArrayMeta, ArrayTracker, RepresentationKind};
pub use config::{AnalyzerConfig, StaticLocations, DEFAULT_WARNING_LIMIT};
pub use error::{AnalysisError, AnalysisResult};
pub use report::{severity_weight, write_report, CountFinding, PolymorphicFinding, ReportWriter, Section};
pub use shape::{equal_signatures, signature_of, signature_to_display_string, ShapeSignature, Signature};
pub use snapshot::Snapshot;
pub use stack::{CallStack, StackFrame};
pub use store::{Category, CounterStore, ShapeEntry, StoreNode, Tally};
pub use value::{
    ElementKind, HostArray, HostObject, HostResolver, Identity, NoResolver, PropertyKey, Scalar, ScalarKind, Site,
    Unrepresentable, Value,
};
