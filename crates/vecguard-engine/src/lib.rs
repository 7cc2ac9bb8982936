//! # vecguard-engine
//!
//! Access to the external ANN index engine.
//!
//! - `IndexEngine`: the async trait every backend implements
//! - `QdrantEngine`: REST client for a Qdrant server
//! - `InMemoryEngine`: brute-force in-process engine for tests and local runs
//! - `EnginePool`, `CircuitBreaker`, `ResiliencePolicy`: the call-site policy
//!   wrapped around every engine request

pub mod engine;
pub mod error;
pub mod memory;
pub mod pool;
pub mod qdrant;
pub mod resilience;

pub use engine::{
    CollectionHealth, CollectionInfo, CollectionSpec, FieldIndex, FieldSchema, IndexEngine,
    ScoredPoint,
};
pub use error::EngineError;
pub use memory::InMemoryEngine;
pub use pool::{EnginePool, PoolPermit};
pub use qdrant::QdrantEngine;
pub use resilience::{CircuitBreaker, CircuitState, ResiliencePolicy, RetryPolicy};
