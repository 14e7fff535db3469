//! Sled-backed measurement store.
//!
//! One tree, four key families:
//!
//! - `m | ts(8) | id(8)` → JSON measurement (sorts chronologically)
//! - `k | NAME 0x1f level 0x1f ts(8)` → record key (duplicate index)
//! - `g | NAME 0x1f level 0x1f lot 0x1f ts(8)` → z-score as f64 bits, empty
//!   when the run could not be scored (history index)
//! - `n | NAME` → empty (analyte name index)
//!
//! `ts` is the timestamp in microseconds with the sign bit flipped, big-endian,
//! so byte order matches time order for dates before 1970 too.

use chrono::NaiveDateTime;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    ExistenceCheck, HistoryLookup, MeasurementFilter, MeasurementQuery, MeasurementSink,
    StoreError,
};
use crate::types::{normalize_name, GroupKey, Measurement, MeasurementKey};

const RECORD_PREFIX: u8 = b'm';
const INDEX_PREFIX: u8 = b'k';
const GROUP_PREFIX: u8 = b'g';
const NAME_PREFIX: u8 = b'n';
const SEPARATOR: u8 = 0x1f;

const TREE_NAME: &str = "measurements";

#[derive(Clone)]
pub struct SledRepository {
    db: Arc<sled::Db>,
    tree: sled::Tree,
}

impl SledRepository {
    /// Open or create the store at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        let tree = db.open_tree(TREE_NAME)?;
        info!(path = %path.as_ref().display(), "Measurement store opened");
        Ok(Self {
            db: Arc::new(db),
            tree,
        })
    }

    /// Number of stored measurements
    pub fn count(&self) -> usize {
        self.tree.scan_prefix([RECORD_PREFIX]).count()
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.tree.flush()?;
        Ok(())
    }
}

/// Everything one measurement writes, encoded ahead of the transaction.
struct PendingWrite {
    key: MeasurementKey,
    index: Vec<u8>,
    record: Vec<u8>,
    body: Vec<u8>,
    group: Vec<u8>,
    z_score: Vec<u8>,
    name: Vec<u8>,
}

fn ts_bytes(ts: NaiveDateTime) -> [u8; 8] {
    let micros = ts.and_utc().timestamp_micros();
    ((micros as u64) ^ (1 << 63)).to_be_bytes()
}

fn record_key(ts: NaiveDateTime, id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.push(RECORD_PREFIX);
    key.extend_from_slice(&ts_bytes(ts));
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn index_key(key: &MeasurementKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.name.len() + key.level.len() + 11);
    out.push(INDEX_PREFIX);
    out.extend_from_slice(key.name.as_bytes());
    out.push(SEPARATOR);
    out.extend_from_slice(key.level.as_bytes());
    out.push(SEPARATOR);
    out.extend_from_slice(&ts_bytes(key.timestamp));
    out
}

/// `g | NAME 0x1f level 0x1f lot 0x1f`, the prefix of a group's history.
fn group_prefix(group: &GroupKey) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(group.name.len() + group.level.len() + group.level_lot.len() + 12);
    out.push(GROUP_PREFIX);
    for part in [&group.name, &group.level, &group.level_lot] {
        out.extend_from_slice(part.as_bytes());
        out.push(SEPARATOR);
    }
    out
}

fn group_key(group: &GroupKey, ts: NaiveDateTime) -> Vec<u8> {
    let mut out = group_prefix(group);
    out.extend_from_slice(&ts_bytes(ts));
    out
}

fn name_key(name: &str) -> Vec<u8> {
    let mut out = vec![NAME_PREFIX];
    out.extend_from_slice(normalize_name(name).as_bytes());
    out
}

fn encode_z(z: Option<f64>) -> Vec<u8> {
    z.map(|z| z.to_bits().to_be_bytes().to_vec()).unwrap_or_default()
}

fn decode_z(bytes: &[u8]) -> Option<f64> {
    let bits: [u8; 8] = bytes.try_into().ok()?;
    Some(f64::from_bits(u64::from_be_bytes(bits)))
}

impl ExistenceCheck for SledRepository {
    fn exists(
        &self,
        timestamp: NaiveDateTime,
        level: &str,
        name: &str,
    ) -> Result<bool, StoreError> {
        let key = MeasurementKey::new(timestamp, level, name);
        Ok(self.tree.contains_key(index_key(&key))?)
    }
}

impl HistoryLookup for SledRepository {
    /// Reads only the group's history index, newest first.
    fn recent_z_scores(
        &self,
        group: &GroupKey,
        before: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<f64>, StoreError> {
        let start = group_prefix(group);
        let end = group_key(group, before);

        let mut z_scores = Vec::with_capacity(limit);
        for item in self.tree.range(start..end).rev() {
            if z_scores.len() >= limit {
                break;
            }
            let (_key, value) = item?;
            if let Some(z) = decode_z(&value) {
                z_scores.push(z);
            }
        }
        z_scores.reverse();
        Ok(z_scores)
    }
}

impl MeasurementSink for SledRepository {
    /// The duplicate check and every insert run in one sled transaction, so
    /// concurrent writers sharing a clone cannot both store the same key.
    fn save_all(&self, measurements: &[Measurement]) -> Result<(), StoreError> {
        let mut pending = Vec::with_capacity(measurements.len());
        let mut seen = HashSet::with_capacity(measurements.len());

        for m in measurements {
            let key = m.key();
            let index = index_key(&key);
            if !seen.insert(index.clone()) {
                return Err(StoreError::Conflict(key));
            }
            pending.push(PendingWrite {
                index,
                record: record_key(m.timestamp(), self.db.generate_id()?),
                body: serde_json::to_vec(m)?,
                group: group_key(&m.group(), m.timestamp()),
                z_score: encode_z(m.z_score()),
                name: name_key(m.name()),
                key,
            });
        }

        self.tree
            .transaction(|tx| -> ConflictableTransactionResult<(), StoreError> {
                for w in &pending {
                    if tx.get(w.index.as_slice())?.is_some() {
                        return Err(ConflictableTransactionError::Abort(StoreError::Conflict(
                            w.key.clone(),
                        )));
                    }
                    tx.insert(w.index.as_slice(), w.record.as_slice())?;
                    tx.insert(w.record.as_slice(), w.body.as_slice())?;
                    tx.insert(w.group.as_slice(), w.z_score.as_slice())?;
                    tx.insert(w.name.as_slice(), Vec::<u8>::new())?;
                }
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => StoreError::Database(e),
            })?;

        debug!(count = measurements.len(), "Measurements stored");
        Ok(())
    }
}

impl MeasurementQuery for SledRepository {
    fn find_by_filter(&self, filter: &MeasurementFilter) -> Result<Vec<Measurement>, StoreError> {
        let mut start = vec![RECORD_PREFIX];
        match filter.start {
            Some(ts) => start.extend_from_slice(&ts_bytes(ts)),
            None => start.extend_from_slice(&[0u8; 8]),
        }
        let mut end = vec![RECORD_PREFIX];
        match filter.end {
            Some(ts) => end.extend_from_slice(&ts_bytes(ts)),
            None => end.extend_from_slice(&[0xffu8; 8]),
        }
        end.extend_from_slice(&[0xffu8; 8]);

        let mut out = Vec::new();
        for item in self.tree.range(start..=end) {
            let (_key, value) = item?;
            let m: Measurement = serde_json::from_slice(&value)?;
            if filter.matches(&m) {
                out.push(m);
            }
        }
        Ok(out)
    }

    fn name_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.tree.contains_key(name_key(name))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleValidator;
    use crate::types::MeasurementCandidate;
    use chrono::NaiveDate;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(7, 30, 0)
            .unwrap()
    }

    fn candidate(ts: NaiveDateTime, value: f64) -> MeasurementCandidate {
        MeasurementCandidate {
            timestamp: ts,
            name: "Albumin".to_string(),
            level: "Normal".to_string(),
            level_lot: "A-01".to_string(),
            test_lot: String::new(),
            value,
            unit: "g/dL".to_string(),
            mean: 4.0,
            sd: 0.5,
        }
    }

    fn measurement(ts: NaiveDateTime, value: f64) -> Measurement {
        RuleValidator::default().stamp(candidate(ts, value), &[])
    }

    #[test]
    fn test_timestamp_bytes_sort_chronologically() {
        let early = NaiveDate::from_ymd_opt(1965, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert!(ts_bytes(early) < ts_bytes(at(1)));
        assert!(ts_bytes(at(1)) < ts_bytes(at(2)));
    }

    #[test]
    fn test_round_trip_through_sled() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SledRepository::open(dir.path().join("qc.db")).unwrap();

        repo.save_all(&[measurement(at(2), 4.5), measurement(at(1), 4.0)]).unwrap();
        assert_eq!(repo.count(), 2);
        assert!(repo.exists(at(1), "Normal", "albumin").unwrap());
        assert!(repo.name_exists("ALBUMIN").unwrap());
        assert!(!repo.name_exists("Sodium").unwrap());

        let all = repo.find_by_filter(&MeasurementFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].timestamp(), at(1));

        let group = GroupKey::new("albumin", "Normal", "A-01");
        assert_eq!(repo.recent_z_scores(&group, at(9), 10).unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_history_index_is_bounded_and_per_group() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SledRepository::open(dir.path().join("qc.db")).unwrap();

        let other_lot = RuleValidator::default().stamp(
            MeasurementCandidate {
                level_lot: "A-02".to_string(),
                ..candidate(at(2), 5.0)
            },
            &[],
        );
        let unscorable = RuleValidator::default().stamp(
            MeasurementCandidate {
                sd: 0.0,
                ..candidate(at(3), 4.0)
            },
            &[],
        );
        repo.save_all(&[
            measurement(at(1), 4.5),
            other_lot,
            unscorable,
            measurement(at(4), 3.5),
            measurement(at(5), 5.0),
        ])
        .unwrap();

        let group = GroupKey::new("ALBUMIN", "Normal", "A-01");
        assert_eq!(repo.recent_z_scores(&group, at(5), 10).unwrap(), vec![1.0, -1.0]);
        assert_eq!(repo.recent_z_scores(&group, at(4), 10).unwrap(), vec![1.0]);
        assert_eq!(repo.recent_z_scores(&group, at(6), 1).unwrap(), vec![2.0]);
        assert!(repo.recent_z_scores(&group, at(1), 10).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_writers_store_a_key_once() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SledRepository::open(dir.path().join("qc.db")).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let repo = repo.clone();
                std::thread::spawn(move || repo.save_all(&[measurement(at(1), 4.0)]).is_ok())
            })
            .collect();
        let stored = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(stored, 1);
        assert_eq!(repo.count(), 1);
    }

    #[test]
    fn test_conflicting_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SledRepository::open(dir.path().join("qc.db")).unwrap();
        repo.save_all(&[measurement(at(1), 4.0)]).unwrap();

        let result = repo.save_all(&[measurement(at(3), 4.1), measurement(at(1), 4.0)]);
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(repo.count(), 1);
    }

    #[test]
    fn test_range_filter_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SledRepository::open(dir.path().join("qc.db")).unwrap();
        repo.save_all(&[
            measurement(at(1), 4.0),
            measurement(at(2), 4.1),
            measurement(at(3), 4.2),
        ])
        .unwrap();

        let filter = MeasurementFilter::for_name("albumin").between(Some(at(2)), Some(at(3)));
        let found = repo.find_by_filter(&filter).unwrap();
        assert_eq!(found.len(), 2);
    }
}
