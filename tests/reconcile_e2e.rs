//! End-to-end reconciliation tests.
//!
//! Raw records from several sources go through ingestion, merge, scoring
//! and master resolution. Covers:
//! - Pass idempotence
//! - Source priority and the raw history behind it
//! - The change gate
//! - Master grouping across natural keys

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};

use recondb::{
    ChangeStatus, EntityType, IngestRequest, Payload, RecordKey, ReconConfig, Reconciler, SourceSystem,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 6, 0, 0).unwrap()
}

fn request(entity_type: EntityType, source: SourceSystem, external_id: &str, value: Value) -> IngestRequest {
    let payload: Payload = serde_json::from_value(value).unwrap();
    IngestRequest::new(entity_type, source, external_id, payload).at(t0())
}

fn hr_jsmith(job_title: &str) -> IngestRequest {
    request(
        EntityType::Person,
        SourceSystem::Hr,
        "00012345",
        json!({
            "uniqname": "jsmith",
            "email": "john.smith@hr.example.edu",
            "name": "Smith, John",
            "job_title": job_title,
            "dept_id": "D100",
            "employee_id": "00012345",
            "last_sync": "2024-09-01T06:00:00Z",
        }),
    )
}

fn seed_people(recon: &Reconciler) {
    recon
        .ingest(request(
            EntityType::Person,
            SourceSystem::Directory,
            "CN=jsmith",
            json!({
                "uniqname": "jsmith",
                "mail": "jsmith@example.edu",
                "display_name": "John Smith",
                "employee_id": "00012345",
            }),
        ))
        .unwrap();
    recon.ingest(hr_jsmith("Research Scientist")).unwrap();
    recon
        .ingest(request(
            EntityType::Person,
            SourceSystem::Ticketing,
            "u-991",
            json!({"username": "john.smith", "primary_email": "JSmith@Example.edu", "full_name": "John Smith"}),
        ))
        .unwrap();
}

#[test]
fn test_priority_picks_directory_email() {
    let recon = Reconciler::new(ReconConfig::default()).unwrap();
    seed_people(&recon);
    recon.reconcile(EntityType::Person).unwrap();

    let jsmith = recon.query().entity(EntityType::Person, "JSmith").unwrap().unwrap();
    assert_eq!(jsmith.field("email"), Some(&json!("jsmith@example.edu")));
    assert_eq!(jsmith.field_sources.get("email"), Some(&SourceSystem::Directory));
    assert_eq!(jsmith.field("display_name"), Some(&json!("Smith, John")));
    assert_eq!(jsmith.field_sources.get("display_name"), Some(&SourceSystem::Hr));
    assert_eq!(jsmith.sources, vec![SourceSystem::Directory, SourceSystem::Hr]);
    assert!((jsmith.quality_score - 1.0).abs() < f64::EPSILON);
    assert!(jsmith.quality_flags.is_empty());

    // The losing value is still in the raw store.
    let key = RecordKey {
        entity_type: EntityType::Person,
        source_system: SourceSystem::Hr,
        external_id: "00012345".to_string(),
    };
    let history = recon.query().raw_history(&key).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].payload["email"], json!("john.smith@hr.example.edu"));
}

#[test]
fn test_quality_flags_on_thin_record() {
    let recon = Reconciler::new(ReconConfig::default()).unwrap();
    seed_people(&recon);
    recon.reconcile(EntityType::Person).unwrap();

    let thin = recon.query().entity(EntityType::Person, "john.smith").unwrap().unwrap();
    assert_eq!(thin.quality_flags, vec!["missing_department", "missing_job_title", "single_source"]);
    assert!((thin.quality_score - 0.65).abs() < 1e-9);

    let low = recon.query().by_quality(EntityType::Person, 0.0, 0.9).unwrap();
    assert_eq!(low.len(), 1);
    assert_eq!(low[0].natural_key, "john.smith");
    assert_eq!(recon.query().flagged(EntityType::Person, "single_source").unwrap().len(), 1);
}

#[test]
fn test_rerun_is_identical() {
    let recon = Reconciler::new(ReconConfig::default()).unwrap();
    seed_people(&recon);
    recon
        .ingest(request(
            EntityType::Lab,
            SourceSystem::GroupDirectory,
            "lab-jsmith",
            json!({"pi_uniqname": "jsmith", "members": ["akim"], "group_name": "jsmith-lab"}),
        ))
        .unwrap();
    recon
        .ingest(request(
            EntityType::ComputingAsset,
            SourceSystem::EndpointManagement,
            "dev-1",
            json!({"name": "jsmith-ws01", "owner": "jsmith", "serial": "C02XK1"}),
        ))
        .unwrap();

    recon.reconcile_all().unwrap();
    let query = recon.query();
    let people = query.table(EntityType::Person).unwrap();
    let rows = query.relationships().unwrap();
    let master = query.master_for(EntityType::Person, "jsmith").unwrap();

    recon.reconcile_all().unwrap();
    assert_eq!(*query.table(EntityType::Person).unwrap(), *people);
    assert_eq!(*query.relationships().unwrap(), *rows);
    assert_eq!(query.master_for(EntityType::Person, "jsmith").unwrap(), master);
    assert!(!rows.is_empty());
}

#[test]
fn test_identical_payload_does_not_touch_entity() {
    let recon = Reconciler::new(ReconConfig::default()).unwrap();
    seed_people(&recon);
    recon.reconcile(EntityType::Person).unwrap();
    let before = recon.query().entity(EntityType::Person, "jsmith").unwrap().unwrap();

    let mut again = hr_jsmith("Research Scientist").at(t0() + Duration::days(1));
    again
        .payload
        .insert("last_sync".to_string(), json!("2024-09-02T06:00:00Z"));
    let outcome = recon.ingest(again).unwrap();
    assert_eq!(outcome.status, ChangeStatus::Unchanged);

    recon.reconcile(EntityType::Person).unwrap();
    let after = recon.query().entity(EntityType::Person, "jsmith").unwrap().unwrap();
    assert_eq!(after.updated_at, before.updated_at);
    assert!((after.quality_score - before.quality_score).abs() < f64::EPSILON);
    assert_eq!(after, before);
}

#[test]
fn test_new_version_supersedes_current_row() {
    let recon = Reconciler::new(ReconConfig::default()).unwrap();
    seed_people(&recon);
    recon.reconcile(EntityType::Person).unwrap();
    let first = recon.ingest(hr_jsmith("Research Scientist")).unwrap();
    assert_eq!(first.status, ChangeStatus::Unchanged);

    let later = t0() + Duration::hours(6);
    let outcome = recon.ingest(hr_jsmith("Senior Research Scientist").at(later)).unwrap();
    assert!(matches!(outcome.status, ChangeStatus::Changed { previous: Some(_) }));

    recon.reconcile(EntityType::Person).unwrap();
    let jsmith = recon.query().entity(EntityType::Person, "jsmith").unwrap().unwrap();
    assert_eq!(jsmith.field("job_title"), Some(&json!("Senior Research Scientist")));
    assert_eq!(jsmith.updated_at, later);
}

#[test]
fn test_master_groups_by_shared_email() {
    let recon = Reconciler::new(ReconConfig::default()).unwrap();
    seed_people(&recon);
    recon.reconcile(EntityType::Person).unwrap();

    let (master, mappings) = recon
        .query()
        .master_for(EntityType::Person, "john.smith")
        .unwrap()
        .unwrap();
    assert_eq!(master.member_keys, vec!["john.smith", "jsmith"]);
    assert_eq!(master.source_count, 3);
    assert_eq!(mappings.len(), 2);
    let primaries: Vec<_> = mappings.iter().filter(|m| m.is_primary_source).collect();
    assert_eq!(primaries.len(), 1);
    assert_eq!(primaries[0].natural_key, "jsmith");
    assert!(master.conflicts.contains(&"display_name".to_string()));
    assert!(!master.conflicts.contains(&"email".to_string()));
    assert!(master.confidence_score > 0.5 && master.confidence_score <= 1.0);

    let same = recon.query().master_for(EntityType::Person, "jsmith").unwrap().unwrap();
    assert_eq!(same.0.master_id, master.master_id);
}

#[test]
fn test_departments_share_a_master_by_code() {
    let recon = Reconciler::new(ReconConfig::default()).unwrap();
    recon
        .ingest(request(
            EntityType::Department,
            SourceSystem::Hr,
            "185500",
            json!({"dept_id": "185500", "dept_name": "Chemistry", "department_code": "CHEM"}),
        ))
        .unwrap();
    recon
        .ingest(request(
            EntityType::Department,
            SourceSystem::Ticketing,
            "dept-chem",
            json!({"department_code": "CHEM", "name": "Chemistry Department"}),
        ))
        .unwrap();
    let report = recon.reconcile(EntityType::Department).unwrap();
    assert_eq!(report.consolidated, 2);
    assert_eq!(report.masters, 1);

    let (master, mappings) = recon
        .query()
        .master_for(EntityType::Department, "chem")
        .unwrap()
        .unwrap();
    assert_eq!(master.member_keys, vec!["185500", "chem"]);
    assert_eq!(master.source_count, 2);
    assert_eq!(mappings.len(), 2);
    let hr = recon.query().entity(EntityType::Department, "185500").unwrap().unwrap();
    assert_eq!(hr.field("department_code"), Some(&json!("CHEM")));
}

#[test]
fn test_grant_amounts_are_summed() {
    let recon = Reconciler::new(ReconConfig::default()).unwrap();
    for (id, amount) in [("G-1", json!("1,250,000")), ("G-2", json!(250_000))] {
        recon
            .ingest(request(
                EntityType::Lab,
                SourceSystem::Grants,
                id,
                json!({"pi_uniqname": "jdoe", "grant_id": id, "award_amount": amount}),
            ))
            .unwrap();
    }
    recon.reconcile(EntityType::Lab).unwrap();

    let lab = recon.query().entity(EntityType::Lab, "jdoe").unwrap().unwrap();
    assert_eq!(lab.field("total_grant_dollars"), Some(&json!(1_500_000)));
    assert_eq!(lab.tokens("grants", Some("grant_id")), vec!["g-1", "g-2"]);
    assert!(!lab.has_flag("no_grant_funding"));
    assert!(lab.has_flag("no_members"));
}

#[test]
fn test_rejected_ingest_is_not_stored() {
    let recon = Reconciler::new(ReconConfig::default()).unwrap();
    let err = recon
        .ingest(request(EntityType::Department, SourceSystem::Hr, "D100", json!({"dept_name": "Physics"})))
        .unwrap_err();
    assert!(err.is_validation());

    let err = recon
        .ingest(request(EntityType::Department, SourceSystem::Hr, "", json!({"dept_id": "D100"})))
        .unwrap_err();
    assert!(err.is_validation());

    let report = recon.reconcile(EntityType::Department).unwrap();
    assert_eq!(report.raw_records, 0);
    assert_eq!(report.consolidated, 0);
}
