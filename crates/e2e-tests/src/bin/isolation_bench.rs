use std::time::Instant;

use clap::Parser;
use serde::Serialize;

use e2e_tests::{ctx, random_vectors, test_settings, TestHarness, PROJECTS};
use vecguard_service::{LatencyPercentiles, UpsertReport};
use vecguard_types::{PointKind, VectorPoint};

#[derive(Parser, Debug)]
#[command(
    name = "isolation_bench",
    about = "Search latency and upsert throughput benchmark over the in-memory engine"
)]
struct Args {
    /// Points loaded per project.
    #[arg(long, default_value_t = 2_000)]
    points: usize,
    /// Searches issued per project.
    #[arg(long, default_value_t = 200)]
    queries: usize,
    #[arg(long, default_value_t = 1536)]
    dimension: usize,
    #[arg(long, default_value_t = 10)]
    limit: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    points_per_project: usize,
    projects: usize,
    dimension: usize,
    upsert_ms: u128,
    upsert_points_per_sec: f64,
    searches: u64,
    search_latency: LatencyPercentiles,
    isolation_violations: u64,
}

fn project_points(project: &str, language: &str, vectors: Vec<Vec<f32>>) -> Vec<VectorPoint> {
    vectors
        .into_iter()
        .enumerate()
        .map(|(i, vector)| {
            VectorPoint::new(vector)
                .with_scope(project, language)
                .with_kind(PointKind::Knowledge)
                .with_text(format!("{project} bench {i}"))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let harness = TestHarness::with_settings(test_settings(args.dimension)).await;

    let started = Instant::now();
    let mut stored = 0usize;
    for (offset, (project, language)) in PROJECTS.iter().enumerate() {
        let vectors = random_vectors(args.dimension, args.points, args.seed + offset as u64);
        let report: UpsertReport = harness
            .service
            .upsert_many(&ctx(project), project_points(project, language, vectors))
            .await?;
        if !report.is_complete() {
            return Err(format!(
                "upsert for {project} incomplete: {} rejected, {} failed batches",
                report.rejected.len(),
                report.failed_batches.len()
            )
            .into());
        }
        stored += report.stored();
    }
    let upsert_elapsed = started.elapsed();

    for (offset, (project, _)) in PROJECTS.iter().enumerate() {
        let context = ctx(project);
        let seed = args.seed * 1_000 + offset as u64;
        let queries = random_vectors(args.dimension, args.queries, seed);
        for query in &queries {
            harness
                .service
                .search(query, &context, args.limit, None)
                .await?;
        }
    }

    let snapshot = harness.service.metrics();
    let report = BenchReport {
        points_per_project: args.points,
        projects: PROJECTS.len(),
        dimension: args.dimension,
        upsert_ms: upsert_elapsed.as_millis(),
        upsert_points_per_sec: stored as f64 / upsert_elapsed.as_secs_f64().max(f64::EPSILON),
        searches: snapshot.search_requests,
        search_latency: snapshot.search_latency,
        isolation_violations: snapshot.isolation_violations,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
