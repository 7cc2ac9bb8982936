//! # vecguard-filter
//!
//! Pure validation logic on the read and write paths:
//! - `build_mandatory_filter` / `build_search_filter` produce the
//!   non-removable `(project_id, language)` predicate for searches
//! - `SchemaValidator` checks points before they are sent to the engine
//! - `content_hash` derives the deduplication digest from source text

pub mod filter;
pub mod hash;
pub mod schema;

pub use filter::{
    build_mandatory_filter, build_search_filter, Condition, FilterCheck, Refinement, Refinements,
    SearchFilter,
};
pub use hash::{content_hash, normalize_text};
pub use schema::SchemaValidator;
