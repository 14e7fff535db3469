//! Ingestion and reporting flows through the public API
//!
//! Covers the all-or-nothing batch contract against a recording collaborator,
//! history carried across batches, and the read path over both stores.

use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Mutex;

use qc_engine::aggregation::{group_by_level, grouped_mean_and_sd, AggregationError};
use qc_engine::store::{
    ExistenceCheck, HistoryLookup, MeasurementFilter, MeasurementQuery, MeasurementSink,
};
use qc_engine::{
    BaselineStore, BaselineUpdate, GroupKey, IngestError, IngestionGuard, InMemoryRepository,
    Measurement, MeasurementCandidate, Reports, RuleCode, SledRepository, StatsError, StoreError,
};

fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn candidate(ts: NaiveDateTime, level: &str, value: f64) -> MeasurementCandidate {
    MeasurementCandidate {
        timestamp: ts,
        name: "Cholesterol".to_string(),
        level: level.to_string(),
        level_lot: "LOT-7".to_string(),
        test_lot: "R-2".to_string(),
        value,
        unit: "mmol/L".to_string(),
        mean: if level == "High" { 50.0 } else { 10.0 },
        sd: 1.0,
    }
}

// ============================================================================
// Recording collaborator
// ============================================================================

/// Knows one stored key and records every write it receives.
#[derive(Default)]
struct RecordingStore {
    stored: Vec<(NaiveDateTime, String, String)>,
    writes: Mutex<Vec<usize>>,
    existence_calls: Mutex<usize>,
}

impl ExistenceCheck for RecordingStore {
    fn exists(
        &self,
        timestamp: NaiveDateTime,
        level: &str,
        name: &str,
    ) -> Result<bool, StoreError> {
        *self.existence_calls.lock().unwrap() += 1;
        Ok(self.stored.iter().any(|(ts, l, n)| {
            *ts == timestamp && l == level && n.eq_ignore_ascii_case(name)
        }))
    }
}

impl HistoryLookup for RecordingStore {
    fn recent_z_scores(
        &self,
        _group: &GroupKey,
        _before: NaiveDateTime,
        _limit: usize,
    ) -> Result<Vec<f64>, StoreError> {
        Ok(Vec::new())
    }
}

impl MeasurementSink for RecordingStore {
    fn save_all(&self, measurements: &[Measurement]) -> Result<(), StoreError> {
        self.writes.lock().unwrap().push(measurements.len());
        Ok(())
    }
}

impl MeasurementQuery for RecordingStore {
    fn find_by_filter(&self, _filter: &MeasurementFilter) -> Result<Vec<Measurement>, StoreError> {
        Ok(Vec::new())
    }

    fn name_exists(&self, _name: &str) -> Result<bool, StoreError> {
        Ok(false)
    }
}

#[test]
fn one_duplicate_leaves_whole_batch_unpersisted() {
    let store = RecordingStore {
        stored: vec![(at(1, 8), "Normal".to_string(), "CHOLESTEROL".to_string())],
        ..RecordingStore::default()
    };
    let guard = IngestionGuard::default();
    let batch = vec![
        candidate(at(1, 7), "Normal", 10.1),
        candidate(at(1, 8), "Normal", 10.2),
        candidate(at(1, 9), "Normal", 10.3),
    ];

    let err = guard.ingest_and_persist(batch, &store).unwrap_err();
    let IngestError::Duplicate(dup) = err else {
        panic!("expected duplicate error");
    };
    assert_eq!(dup.collisions.len(), 1);
    assert_eq!(dup.collisions[0].key.timestamp, at(1, 8));
    assert_eq!(dup.collisions[0].key.name, "CHOLESTEROL");
    assert!(dup.to_string().contains("CHOLESTEROL/Normal"));

    assert!(store.writes.lock().unwrap().is_empty());
    assert_eq!(*store.existence_calls.lock().unwrap(), 3);
}

#[test]
fn clean_batch_is_written_once() {
    let store = RecordingStore::default();
    let guard = IngestionGuard::default();
    let batch = vec![
        candidate(at(1, 7), "Normal", 10.1),
        candidate(at(1, 8), "High", 49.0),
        candidate(at(1, 9), "Normal", 13.5),
    ];
    let accepted = guard.ingest_and_persist(batch, &store).unwrap();
    assert_eq!(*store.writes.lock().unwrap(), vec![3]);
    assert_eq!(accepted[2].rule(), RuleCode::OneThreeS);
    assert!(accepted[2].is_rejected());
}

// ============================================================================
// Store-backed flows
// ============================================================================

#[test]
fn ten_x_fires_across_batches() {
    let repo = InMemoryRepository::new();
    let guard = IngestionGuard::default();

    let first: Vec<_> = (1..=5).map(|d| candidate(at(d, 8), "Normal", 10.4)).collect();
    let accepted = guard.ingest_and_persist(first, &repo).unwrap();
    assert!(accepted.iter().all(|m| m.rule() == RuleCode::None));

    let second: Vec<_> = (6..=10).map(|d| candidate(at(d, 8), "Normal", 10.6)).collect();
    let accepted = guard.ingest_and_persist(second, &repo).unwrap();
    assert_eq!(accepted.last().unwrap().rule(), RuleCode::TenX);
    assert_eq!(repo.len(), 10);
}

#[test]
fn backfilled_run_ignores_later_history() {
    let repo = InMemoryRepository::new();
    let guard = IngestionGuard::default();
    guard
        .ingest_and_persist(vec![candidate(at(5, 8), "Normal", 12.5)], &repo)
        .unwrap();

    let accepted = guard
        .ingest_and_persist(vec![candidate(at(1, 8), "Normal", 12.5)], &repo)
        .unwrap();
    assert_eq!(accepted[0].rule(), RuleCode::OneTwoS);
    assert!(!accepted[0].is_rejected());

    // A run after both still sees them in timestamp order
    let accepted = guard
        .ingest_and_persist(vec![candidate(at(6, 8), "Normal", 12.5)], &repo)
        .unwrap();
    assert_eq!(accepted[0].rule(), RuleCode::TwoTwoS);
}

#[test]
fn sled_backfill_ignores_later_history() {
    let dir = tempfile::tempdir().unwrap();
    let repo = SledRepository::open(dir.path().join("qc.db")).unwrap();
    let guard = IngestionGuard::default();
    guard
        .ingest_and_persist(vec![candidate(at(5, 8), "Normal", 12.5)], &repo)
        .unwrap();

    let accepted = guard
        .ingest_and_persist(
            vec![
                candidate(at(1, 8), "Normal", 12.5),
                candidate(at(2, 8), "Normal", 10.0),
            ],
            &repo,
        )
        .unwrap();
    assert_eq!(accepted[0].rule(), RuleCode::OneTwoS);
    assert_eq!(accepted[1].rule(), RuleCode::None);
    assert_eq!(repo.count(), 3);
}

#[test]
fn lot_change_starts_a_fresh_history() {
    let repo = InMemoryRepository::new();
    let guard = IngestionGuard::default();
    guard
        .ingest_and_persist(vec![candidate(at(1, 8), "Normal", 12.2)], &repo)
        .unwrap();

    let new_lot = MeasurementCandidate {
        level_lot: "LOT-8".to_string(),
        ..candidate(at(2, 8), "Normal", 12.4)
    };
    let accepted = guard.ingest_and_persist(vec![new_lot], &repo).unwrap();
    assert_eq!(accepted[0].rule(), RuleCode::OneTwoS);
}

#[test]
fn grouped_summary_matches_worked_example() {
    let repo = InMemoryRepository::new();
    let guard = IngestionGuard::default();
    guard
        .ingest_and_persist(
            vec![
                candidate(at(1, 8), "Normal", 10.0),
                candidate(at(1, 9), "Normal", 11.0),
                candidate(at(1, 10), "Normal", 9.0),
                candidate(at(1, 11), "High", 50.0),
            ],
            &repo,
        )
        .unwrap();

    let all = repo
        .find_by_filter(&MeasurementFilter::for_name("cholesterol"))
        .unwrap();
    let summaries = grouped_mean_and_sd(&group_by_level(&all));
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].level, "High");
    assert!(summaries[0].insufficient_data);
    assert_eq!(summaries[1].level, "Normal");
    assert!((summaries[1].mean.unwrap() - 10.0).abs() < 1e-9);
    assert!((summaries[1].sd.unwrap() - 1.0).abs() < 1e-9);

    let by_level = Reports::new(&repo)
        .grouped_by_level(&MeasurementFilter::for_name("cholesterol"))
        .unwrap();
    let normal: Vec<f64> = by_level["Normal"].iter().map(|m| m.value()).collect();
    assert_eq!(normal, vec![10.0, 11.0, 9.0]);
    assert_eq!(by_level["High"].len(), 1);
}

#[test]
fn sled_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let repo = SledRepository::open(dir.path().join("qc.db")).unwrap();
    let guard = IngestionGuard::default();

    guard
        .ingest_and_persist(
            vec![
                candidate(at(3, 8), "Normal", 12.1),
                candidate(at(3, 9), "Normal", 12.3),
            ],
            &repo,
        )
        .unwrap();
    let again = guard.ingest_and_persist(vec![candidate(at(3, 9), "Normal", 9.0)], &repo);
    assert!(matches!(again, Err(IngestError::Duplicate(_))));
    assert_eq!(repo.count(), 2);

    let reports = Reports::new(&repo);
    reports.ensure_analyte_exists("Cholesterol").unwrap();
    let stats = reports
        .mean_and_sd(&MeasurementFilter::for_name("cholesterol").level("Normal"))
        .unwrap();
    assert_eq!(stats.count, 2);
    assert!((stats.mean - 12.2).abs() < 1e-9);

    // The second point completed a 2-2s, so only the first stays in control
    let clean = reports
        .grouped_summaries(&MeasurementFilter::for_name("cholesterol"), true)
        .unwrap();
    assert_eq!(clean.len(), 1);
    assert_eq!(clean[0].count, 1);
    assert!(clean[0].insufficient_data);

    let empty = reports.mean_and_sd(
        &MeasurementFilter::for_name("cholesterol").between(Some(at(4, 0)), None),
    );
    assert!(matches!(
        empty,
        Err(AggregationError::Stats(StatsError::EmptyInput))
    ));
}

#[test]
fn baseline_update_only_affects_later_measurements() {
    let repo = InMemoryRepository::new();
    let guard = IngestionGuard::default();
    let group = GroupKey::new("cholesterol", "Normal", "LOT-7");

    let mut baselines = BaselineStore::new();
    baselines.set(&group, 10.0, 1.0, None).unwrap();
    guard
        .ingest_and_persist(vec![candidate(at(1, 8), "Normal", 10.5)], &repo)
        .unwrap();

    baselines.update_baseline(&group, 11.0).unwrap();
    baselines.update_baseline(&group, 11.0).unwrap();
    assert_eq!(baselines.get(&group).unwrap().mean, 11.0);

    let stored = repo.find_by_filter(&MeasurementFilter::default()).unwrap();
    assert_eq!(stored[0].mean(), 10.0);
}
