//! End-to-end test infrastructure for vecguard.
//!
//! Provides a shared TestHarness that runs a full `IsolationService` over
//! the in-memory engine, plus helpers for building points and vectors.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use vecguard_engine::InMemoryEngine;
use vecguard_service::{IsolationService, StaticProjectDirectory};
use vecguard_types::{
    IsolationContext, Language, PointKind, ProjectId, Settings, VectorPoint,
};

/// Dimension used by harnesses that do not need production-size vectors.
pub const SMALL_DIMENSION: usize = 8;

/// Projects registered in every harness: two English, one Russian.
pub const PROJECTS: [(&str, &str); 3] = [("proj-a", "en"), ("proj-b", "ru"), ("proj-c", "en")];

/// Shared test harness for E2E tests.
///
/// Holds the engine so tests can inject faults and count calls, and the
/// service under test.
pub struct TestHarness {
    pub engine: Arc<InMemoryEngine>,
    pub directory: Arc<StaticProjectDirectory>,
    pub settings: Settings,
    pub service: IsolationService,
}

impl TestHarness {
    /// Start a service with `SMALL_DIMENSION` vectors and default settings.
    pub async fn new() -> Self {
        Self::with_settings(test_settings(SMALL_DIMENSION)).await
    }

    /// Start a service against a fresh engine.
    pub async fn with_settings(settings: Settings) -> Self {
        Self::with_engine(settings, Arc::new(InMemoryEngine::new())).await
    }

    /// Start a service against an engine the caller prepared.
    pub async fn with_engine(settings: Settings, engine: Arc<InMemoryEngine>) -> Self {
        let directory = Arc::new(project_directory());
        let service = IsolationService::start(&settings, engine.clone(), directory.clone())
            .await
            .expect("Failed to start isolation service");
        Self {
            engine,
            directory,
            settings,
            service,
        }
    }

    pub fn dimension(&self) -> usize {
        self.settings.collection.dimension
    }

    pub fn collection(&self) -> &str {
        &self.settings.collection.name
    }
}

/// Settings with the given dimension and short timeouts.
pub fn test_settings(dimension: usize) -> Settings {
    let mut settings = Settings::default();
    settings.collection.dimension = dimension;
    settings.resilience.initial_backoff_ms = 1;
    settings.resilience.max_backoff_ms = 5;
    settings.health.check_timeout_ms = 500;
    settings
}

/// Directory holding `PROJECTS`.
pub fn project_directory() -> StaticProjectDirectory {
    let directory = StaticProjectDirectory::new();
    for (project, language) in PROJECTS {
        directory.insert(
            ProjectId::parse(project).expect("valid project id"),
            Language::parse(language).expect("valid language"),
        );
    }
    directory
}

/// Context for one of the registered projects.
pub fn ctx(project: &str) -> IsolationContext {
    let (_, language) = PROJECTS
        .iter()
        .find(|(p, _)| *p == project)
        .expect("project is registered in the harness");
    IsolationContext::parse(project, language).expect("valid context")
}

/// Unit vector along `axis`.
pub fn axis_vector(dimension: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; dimension];
    v[axis % dimension] = 1.0;
    v
}

/// Vector pointing mostly along `axis` with a small component on the next
/// axis, so scores fall as `tilt` grows.
pub fn tilted_vector(dimension: usize, axis: usize, tilt: f32) -> Vec<f32> {
    let mut v = axis_vector(dimension, axis);
    v[(axis + 1) % dimension] = tilt;
    v
}

/// Reproducible random vectors.
pub fn random_vectors(dimension: usize, count: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect())
        .collect()
}

/// A valid point scoped to `project` with distinct text.
pub fn point(project: &str, vector: Vec<f32>, text: &str) -> VectorPoint {
    let language = ctx(project).language().as_str().to_string();
    VectorPoint::new(vector)
        .with_scope(project, language)
        .with_kind(PointKind::Knowledge)
        .with_text(text)
        .with_created_at(base_time())
}

/// `count` valid points for `project`, created one second apart.
pub fn points(project: &str, dimension: usize, count: usize, prefix: &str) -> Vec<VectorPoint> {
    random_vectors(dimension, count, count as u64)
        .into_iter()
        .enumerate()
        .map(|(i, vector)| {
            point(project, vector, &format!("{prefix} {i}"))
                .with_id(format!("{prefix}-{i}"))
                .with_created_at(base_time() + chrono::Duration::seconds(i as i64))
        })
        .collect()
}

/// Fixed timestamp so ordering tests are deterministic.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 29, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}
