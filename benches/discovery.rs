use chrono::{TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

use recondb::{EntityType, IngestRequest, Payload, ReconConfig, Reconciler, RelationshipEngine, SourceSystem};

const LABS: usize = 200;
const ASSETS: usize = 2_000;

fn payload(value: serde_json::Value) -> Payload {
    serde_json::from_value(value).unwrap()
}

/// Labs `pi0..pi199` with three members each; assets spread over owners,
/// last users, OU paths and lab-named groups so every method fires somewhere.
fn seeded(workers: usize) -> Reconciler {
    let config = ReconConfig {
        workers,
        ..ReconConfig::default()
    };
    let recon = Reconciler::new(config).unwrap();
    let at = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();

    for i in 0..LABS {
        let pi = format!("pi{i:03}");
        let members: Vec<String> = (0..3).map(|m| format!("u{i:03}{m}")).collect();
        recon
            .ingest(
                IngestRequest::new(
                    EntityType::Lab,
                    SourceSystem::GroupDirectory,
                    format!("lab-{pi}"),
                    payload(json!({"pi_uniqname": pi, "members": members, "group_name": format!("{pi}-users")})),
                )
                .at(at),
            )
            .unwrap();
        recon
            .ingest(
                IngestRequest::new(
                    EntityType::Lab,
                    SourceSystem::Directory,
                    format!("OU={pi}"),
                    payload(json!({"pi_uniqname": pi, "ou_dn": format!("OU={pi},OU=Research,DC=example,DC=edu")})),
                )
                .at(at),
            )
            .unwrap();
    }

    for a in 0..ASSETS {
        let lab = a % LABS;
        let name = format!("ws-{a:05}");
        let body = match a % 4 {
            0 => json!({"name": name, "owner": format!("pi{lab:03}"), "function": "research"}),
            1 => json!({"name": name, "owner": format!("u{lab:03}1"), "last_user": format!("u{:03}2", (lab + 1) % LABS)}),
            2 => json!({"name": name, "distinguished_name": format!("CN={name},OU=pi{lab:03},OU=Research,DC=example,DC=edu")}),
            _ => json!({"name": name, "member_of": [format!("pi{lab:03}-users")], "function": "classroom"}),
        };
        let source = if a % 4 == 2 || a % 4 == 3 {
            SourceSystem::Directory
        } else {
            SourceSystem::EndpointManagement
        };
        recon
            .ingest(IngestRequest::new(EntityType::ComputingAsset, source, format!("dev-{a}"), payload(body)).at(at))
            .unwrap();
    }

    recon.reconcile(EntityType::Lab).unwrap();
    recon.reconcile(EntityType::ComputingAsset).unwrap();
    recon
}

fn bench_discover_sequential(c: &mut Criterion) {
    let recon = seeded(1);
    let query = recon.query();
    let labs = query.table(EntityType::Lab).unwrap().to_vec();
    let assets = query.table(EntityType::ComputingAsset).unwrap().to_vec();
    let engine = RelationshipEngine::default();

    let mut group = c.benchmark_group("discovery");
    group.throughput(Throughput::Elements(ASSETS as u64));
    group.bench_function("discover_sequential", |b| {
        b.iter(|| engine.discover(&labs, &assets));
    });
    group.finish();
}

fn bench_relationship_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("relationship_pass");
    group.throughput(Throughput::Elements(ASSETS as u64));
    group.sample_size(20);
    for workers in [1, 4] {
        // Relationship passes are idempotent, so one seeded store serves
        // every iteration.
        let recon = seeded(workers);
        group.bench_function(format!("workers_{workers}"), |b| {
            b.iter(|| recon.reconcile_relationships().unwrap());
        });
    }
    group.finish();
}

criterion_group!(discovery, bench_discover_sequential, bench_relationship_pass);
criterion_main!(discovery);
