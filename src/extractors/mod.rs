//! Request extractors.

pub mod trace;
pub use trace::TraceId;
