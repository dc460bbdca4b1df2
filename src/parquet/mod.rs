//! Columnar output
//!
//! # Module Structure
//!
//! - `schema`: Arrow schema from the probed column layout, writer settings
//! - `batch`: Row-to-column batch building with type coercion
//! - `merge`: Segment verification, concatenation and atomic promotion

pub mod batch;
pub mod merge;
pub mod schema;

pub use batch::BatchBuilder;
pub use merge::{merge_segments, remove_segments, MergeOutcome, MergeTarget};
pub use schema::{output_metadata, table_schema, writer_properties};
