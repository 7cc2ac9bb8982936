//! # vecguard-types
//!
//! Shared domain types for the vecguard isolation service.
//!
//! - Context: `ProjectId`, `Language` and the per-request `IsolationContext`
//! - Points: raw `VectorPoint` input, `ValidatedPoint`, stored `PointPayload`
//! - Errors: the `IsolationError` taxonomy surfaced to callers
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use vecguard_types::IsolationContext;
//!
//! let ctx = IsolationContext::parse("acme", "en").unwrap();
//! assert_eq!(ctx.language().as_str(), "en");
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod point;

pub use config::{
    CollectionSettings, Distance, EngineSettings, HealthSettings, IngestSettings,
    ResilienceSettings, SearchSettings, Settings,
};
pub use context::{IsolationContext, Language, ProjectId};
pub use error::IsolationError;
pub use point::{
    payload_fields, ContentHash, PointId, PointKind, PointMetadata, PointPayload, SearchHit,
    ValidatedPoint, VectorPoint,
};
